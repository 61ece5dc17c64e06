use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Classified validation failures.
///
/// Every failure is terminal for the call that produced it; callers can rely
/// on the variant to tell transient conditions (`DiscoveryFailure`) apart
/// from permanent rejections (`SignatureInvalid`, `UnacceptableIssuer`).
///
/// Variants carry rendered strings rather than wrapped source errors so the
/// enum stays `Clone`; the key cache broadcasts one loader failure to every
/// concurrent waiter.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("algorithm '{0}' is not permitted")]
    UnsupportedAlgorithm(String),
    #[error("issuer not acceptable: {0}")]
    UnacceptableIssuer(String),
    #[error("discovery failed: {0}")]
    DiscoveryFailure(String),
    #[error("signing key not found: {0}")]
    KeyNotFound(String),
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
    #[error("token expired: {0}")]
    ClaimExpired(String),
    #[error("token not yet valid: {0}")]
    ClaimNotYetValid(String),
    #[error("audience mismatch: {0}")]
    AudienceMismatch(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
