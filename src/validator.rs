use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::algorithm::Algorithm;
use crate::error::{AuthError, AuthResult};
use crate::issuer::IssuerPolicy;
use crate::jwt::Jwt;
use crate::resolver::KeySetResolver;

/// Immutable validation policy.
///
/// Built once and shared by reference; the `with_*` methods derive a new
/// configuration instead of mutating in place, so a long-lived validator can
/// be reconfigured without racing in-flight validations.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    permitted_algorithms: HashSet<Algorithm>,
    require_exp: bool,
    require_nbf: bool,
    leeway: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            permitted_algorithms: Algorithm::default_permitted(),
            require_exp: true,
            require_nbf: true,
            leeway: Duration::ZERO,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permitted_algorithms(mut self, algorithms: HashSet<Algorithm>) -> Self {
        self.permitted_algorithms = algorithms;
        self
    }

    /// Derive a configuration that additionally permits `algorithm`. This is
    /// the only way `none` or an HMAC algorithm becomes acceptable.
    pub fn permit_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.permitted_algorithms.insert(algorithm);
        self
    }

    pub fn with_require_exp(mut self, require_exp: bool) -> Self {
        self.require_exp = require_exp;
        self
    }

    pub fn with_require_nbf(mut self, require_nbf: bool) -> Self {
        self.require_nbf = require_nbf;
        self
    }

    /// Clock-skew tolerance applied symmetrically to `exp` and `nbf`.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn permitted_algorithms(&self) -> &HashSet<Algorithm> {
        &self.permitted_algorithms
    }

    pub fn require_exp(&self) -> bool {
        self.require_exp
    }

    pub fn require_nbf(&self) -> bool {
        self.require_nbf
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }
}

/// Validates compact JWS tokens against a key-set resolver and an issuer
/// policy.
///
/// A validation either produces a fully checked [`Jwt`] or exactly one
/// classified [`AuthError`]; there is no partial success.
#[derive(Clone)]
pub struct JwtValidator {
    config: ValidatorConfig,
    resolver: Arc<dyn KeySetResolver>,
    issuers: IssuerPolicy,
}

impl JwtValidator {
    pub fn new(resolver: Arc<dyn KeySetResolver>, issuers: IssuerPolicy) -> Self {
        JwtValidator {
            config: ValidatorConfig::default(),
            resolver,
            issuers,
        }
    }

    /// Derive a validator with a different configuration.
    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn issuer_policy(&self) -> &IssuerPolicy {
        &self.issuers
    }

    /// Validate `token` and return its decoded form.
    ///
    /// `expected_audiences` must intersect the token's `aud` claim unless the
    /// list is empty, in which case the audience check is skipped. With
    /// `require_signature` unset, a token with an empty signature passes
    /// without key resolution; a signature that is present is always
    /// verified.
    pub async fn validate_token(
        &self,
        token: &str,
        expected_audiences: &[String],
        require_signature: bool,
    ) -> AuthResult<Jwt> {
        let jwt = Jwt::parse(token)?;
        if jwt.claim_count() == 0 {
            return Err(AuthError::MalformedToken(
                "token payload contains no claims".to_string(),
            ));
        }

        let algorithm = jwt.algorithm();
        if !self.config.permitted_algorithms.contains(&algorithm) {
            return Err(AuthError::UnsupportedAlgorithm(algorithm.name().to_string()));
        }

        // The issuer must be acceptable before any network activity, so an
        // attacker-controlled `iss` cannot aim discovery at their endpoint.
        let issuer = jwt
            .issuer()
            .map(str::to_string)
            .ok_or_else(|| AuthError::UnacceptableIssuer("token has no iss claim".to_string()))?;
        if !self.issuers.is_acceptable(&issuer) {
            return Err(AuthError::UnacceptableIssuer(issuer));
        }

        if algorithm == Algorithm::None && !jwt.signature().is_empty() {
            return Err(AuthError::MalformedToken(
                "unsecured token carries a signature".to_string(),
            ));
        }

        if jwt.signature().is_empty() {
            if require_signature {
                return Err(AuthError::SignatureInvalid(
                    "token is not signed".to_string(),
                ));
            }
        } else {
            let kid = jwt
                .kid()
                .ok_or_else(|| {
                    AuthError::KeyNotFound("token header has no kid".to_string())
                })?
                .to_string();
            let key = self.resolver.find_key(&issuer, &kid).await?;
            let verified =
                key.verify(algorithm, jwt.signing_input().as_bytes(), jwt.signature())?;
            if !verified {
                return Err(AuthError::SignatureInvalid(format!(
                    "{algorithm} signature mismatch for kid '{kid}'"
                )));
            }
        }

        let now = Utc::now().timestamp();
        let leeway = self.config.leeway.as_secs() as i64;
        check_exp(jwt.expiration(), now, leeway, self.config.require_exp)?;
        check_nbf(jwt.not_before(), now, leeway, self.config.require_nbf)?;
        check_audience(&jwt, expected_audiences)?;

        debug!(
            alg = algorithm.name(),
            kid = jwt.kid().unwrap_or(""),
            issuer = %issuer,
            "token validated"
        );
        Ok(jwt)
    }
}

/// `exp` passes while `exp >= now - leeway`.
fn check_exp(exp: Option<i64>, now: i64, leeway: i64, required: bool) -> AuthResult<()> {
    match exp {
        Some(exp) if exp < now - leeway => Err(AuthError::ClaimExpired(format!(
            "exp {exp} is past the accepted horizon {}",
            now - leeway
        ))),
        Some(_) => Ok(()),
        None if required => Err(AuthError::ClaimExpired(
            "token does not carry an exp claim".to_string(),
        )),
        None => Ok(()),
    }
}

/// `nbf` passes while `nbf <= now + leeway`.
fn check_nbf(nbf: Option<i64>, now: i64, leeway: i64, required: bool) -> AuthResult<()> {
    match nbf {
        Some(nbf) if nbf > now + leeway => Err(AuthError::ClaimNotYetValid(format!(
            "nbf {nbf} is after the accepted horizon {}",
            now + leeway
        ))),
        Some(_) => Ok(()),
        None if required => Err(AuthError::ClaimNotYetValid(
            "token does not carry an nbf claim".to_string(),
        )),
        None => Ok(()),
    }
}

fn check_audience(jwt: &Jwt, expected: &[String]) -> AuthResult<()> {
    if expected.is_empty() {
        // An empty expectation list deliberately skips the check.
        return Ok(());
    }
    if expected.iter().any(|audience| jwt.has_audience(audience)) {
        return Ok(());
    }
    Err(AuthError::AudienceMismatch(
        "none of the expected audiences are claimed by the token".to_string(),
    ))
}
