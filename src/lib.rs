//! Bearer-token verification against statically configured or
//! OpenID-discovered key sets.
//!
//! The crate validates compact JWS tokens (RFC 7515) end to end: algorithm
//! policy, issuer acceptability, key resolution through an expiry-aware
//! single-flight cache, multi-family signature verification (RSA,
//! RSASSA-PSS, ECDSA, Ed25519, HMAC), and temporal/audience claim checks.
//! Every failure is a single classified [`AuthError`]; no partial result is
//! ever returned.

pub mod algorithm;
pub mod cache;
pub mod discovery;
pub mod error;
pub mod issuer;
pub mod jwk;
pub mod jwt;
pub mod resolver;
pub mod validator;

pub use algorithm::{Algorithm, AlgorithmInfo, KeyFamily};
pub use cache::{Timed, TimedCache};
pub use discovery::{CachePolicy, DiscoveryDocument};
pub use error::{AuthError, AuthResult};
pub use issuer::{IssuerPolicy, IssuerRule};
pub use jwk::{CachedKey, Jwk, JwkSet};
pub use jwt::Jwt;
pub use resolver::{DiscoveryKeyResolver, KeySetResolver, StaticKeyResolver};
pub use validator::{JwtValidator, ValidatorConfig};
