use std::collections::HashSet;
use std::fmt;

use crate::error::{AuthError, AuthResult};

/// JWS signature algorithms per RFC 7518, plus the unsecured `none`.
///
/// `none` exists so that the registry is structurally complete, but it is
/// excluded from [`Algorithm::default_permitted`] and a validator will only
/// accept it when it has been allow-listed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    None,
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
    ES512,
    EdDSA,
}

/// Key family an algorithm belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Hmac,
    Rsa,
    RsaPss,
    EllipticCurve,
    EdDsa,
    Unsecured,
}

impl KeyFamily {
    /// Whether key material of family `key` can serve this algorithm family.
    /// RSASSA-PSS signatures verify with plain RSA keys.
    pub fn accepts_key(self, key: KeyFamily) -> bool {
        match self {
            KeyFamily::RsaPss => key == KeyFamily::Rsa,
            KeyFamily::Unsecured => false,
            other => key == other,
        }
    }
}

/// Static per-algorithm data: family, native primitive, minimum key length
/// in bits, and the curve parameter where one applies.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmInfo {
    pub family: KeyFamily,
    pub primitive: &'static str,
    pub min_key_bits: u32,
    pub curve: Option<&'static str>,
}

impl Algorithm {
    pub const ALL: [Algorithm; 14] = [
        Algorithm::None,
        Algorithm::HS256,
        Algorithm::HS384,
        Algorithm::HS512,
        Algorithm::RS256,
        Algorithm::RS384,
        Algorithm::RS512,
        Algorithm::PS256,
        Algorithm::PS384,
        Algorithm::PS512,
        Algorithm::ES256,
        Algorithm::ES384,
        Algorithm::ES512,
        Algorithm::EdDSA,
    ];

    pub fn info(self) -> AlgorithmInfo {
        match self {
            Algorithm::None => AlgorithmInfo {
                family: KeyFamily::Unsecured,
                primitive: "unsecured",
                min_key_bits: 0,
                curve: None,
            },
            Algorithm::HS256 => AlgorithmInfo {
                family: KeyFamily::Hmac,
                primitive: "hmac-sha256",
                min_key_bits: 256,
                curve: None,
            },
            Algorithm::HS384 => AlgorithmInfo {
                family: KeyFamily::Hmac,
                primitive: "hmac-sha384",
                min_key_bits: 384,
                curve: None,
            },
            Algorithm::HS512 => AlgorithmInfo {
                family: KeyFamily::Hmac,
                primitive: "hmac-sha512",
                min_key_bits: 512,
                curve: None,
            },
            Algorithm::RS256 => AlgorithmInfo {
                family: KeyFamily::Rsa,
                primitive: "rsa-pkcs1-sha256",
                min_key_bits: 2048,
                curve: None,
            },
            Algorithm::RS384 => AlgorithmInfo {
                family: KeyFamily::Rsa,
                primitive: "rsa-pkcs1-sha384",
                min_key_bits: 2048,
                curve: None,
            },
            Algorithm::RS512 => AlgorithmInfo {
                family: KeyFamily::Rsa,
                primitive: "rsa-pkcs1-sha512",
                min_key_bits: 2048,
                curve: None,
            },
            Algorithm::PS256 => AlgorithmInfo {
                family: KeyFamily::RsaPss,
                primitive: "rsa-pss-sha256",
                min_key_bits: 2048,
                curve: None,
            },
            Algorithm::PS384 => AlgorithmInfo {
                family: KeyFamily::RsaPss,
                primitive: "rsa-pss-sha384",
                min_key_bits: 2048,
                curve: None,
            },
            Algorithm::PS512 => AlgorithmInfo {
                family: KeyFamily::RsaPss,
                primitive: "rsa-pss-sha512",
                min_key_bits: 2048,
                curve: None,
            },
            Algorithm::ES256 => AlgorithmInfo {
                family: KeyFamily::EllipticCurve,
                primitive: "ecdsa-p256-sha256",
                min_key_bits: 256,
                curve: Some("P-256"),
            },
            Algorithm::ES384 => AlgorithmInfo {
                family: KeyFamily::EllipticCurve,
                primitive: "ecdsa-p384-sha384",
                min_key_bits: 384,
                curve: Some("P-384"),
            },
            Algorithm::ES512 => AlgorithmInfo {
                family: KeyFamily::EllipticCurve,
                primitive: "ecdsa-p521-sha512",
                min_key_bits: 521,
                curve: Some("P-521"),
            },
            Algorithm::EdDSA => AlgorithmInfo {
                family: KeyFamily::EdDsa,
                primitive: "ed25519",
                min_key_bits: 256,
                curve: Some("Ed25519"),
            },
        }
    }

    pub fn family(self) -> KeyFamily {
        self.info().family
    }

    pub fn min_key_bits(self) -> u32 {
        self.info().min_key_bits
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::None => "none",
            Algorithm::HS256 => "HS256",
            Algorithm::HS384 => "HS384",
            Algorithm::HS512 => "HS512",
            Algorithm::RS256 => "RS256",
            Algorithm::RS384 => "RS384",
            Algorithm::RS512 => "RS512",
            Algorithm::PS256 => "PS256",
            Algorithm::PS384 => "PS384",
            Algorithm::PS512 => "PS512",
            Algorithm::ES256 => "ES256",
            Algorithm::ES384 => "ES384",
            Algorithm::ES512 => "ES512",
            Algorithm::EdDSA => "EdDSA",
        }
    }

    pub fn from_name(name: &str) -> AuthResult<Algorithm> {
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == name)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(name.to_string()))
    }

    /// The `jsonwebtoken` equivalent, where one exists. ES512 and `none`
    /// have no counterpart there and are handled separately by the codec.
    pub(crate) fn native(self) -> Option<jsonwebtoken::Algorithm> {
        match self {
            Algorithm::None | Algorithm::ES512 => None,
            Algorithm::HS256 => Some(jsonwebtoken::Algorithm::HS256),
            Algorithm::HS384 => Some(jsonwebtoken::Algorithm::HS384),
            Algorithm::HS512 => Some(jsonwebtoken::Algorithm::HS512),
            Algorithm::RS256 => Some(jsonwebtoken::Algorithm::RS256),
            Algorithm::RS384 => Some(jsonwebtoken::Algorithm::RS384),
            Algorithm::RS512 => Some(jsonwebtoken::Algorithm::RS512),
            Algorithm::PS256 => Some(jsonwebtoken::Algorithm::PS256),
            Algorithm::PS384 => Some(jsonwebtoken::Algorithm::PS384),
            Algorithm::PS512 => Some(jsonwebtoken::Algorithm::PS512),
            Algorithm::ES256 => Some(jsonwebtoken::Algorithm::ES256),
            Algorithm::ES384 => Some(jsonwebtoken::Algorithm::ES384),
            Algorithm::EdDSA => Some(jsonwebtoken::Algorithm::EdDSA),
        }
    }

    /// The default permitted set: asymmetric algorithms only. HMAC requires
    /// the caller to opt in, and `none` is never implicitly permitted.
    pub fn default_permitted() -> HashSet<Algorithm> {
        [
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
            Algorithm::ES256,
            Algorithm::ES384,
            Algorithm::ES512,
            Algorithm::EdDSA,
        ]
        .into_iter()
        .collect()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
