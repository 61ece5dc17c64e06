use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use signature::Verifier;

use crate::algorithm::{Algorithm, KeyFamily};
use crate::error::{AuthError, AuthResult};

/// A single JSON Web Key as defined in RFC 7517.
///
/// Only the members this crate consumes are modeled; unknown members are
/// ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

/// A JWK Set: `{ "keys": [ ... ] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    fn bare(kid: &str, kty: &str) -> Jwk {
        Jwk {
            kid: Some(kid.to_string()),
            kty: kty.to_string(),
            use_field: Some("sig".to_string()),
            alg: None,
            crv: None,
            x: None,
            y: None,
            n: None,
            e: None,
            k: None,
        }
    }

    pub fn from_rsa(kid: &str, key: &rsa::RsaPublicKey) -> Jwk {
        use rsa::traits::PublicKeyParts;
        let mut jwk = Jwk::bare(kid, "RSA");
        jwk.n = Some(URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()));
        jwk.e = Some(URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()));
        jwk
    }

    pub fn from_p256(kid: &str, key: &p256::ecdsa::VerifyingKey) -> Jwk {
        let point = key.to_encoded_point(false);
        let mut jwk = Jwk::bare(kid, "EC");
        jwk.crv = Some("P-256".to_string());
        jwk.x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x));
        jwk.y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y));
        jwk
    }

    pub fn from_p384(kid: &str, key: &p384::ecdsa::VerifyingKey) -> Jwk {
        let point = key.to_encoded_point(false);
        let mut jwk = Jwk::bare(kid, "EC");
        jwk.crv = Some("P-384".to_string());
        jwk.x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x));
        jwk.y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y));
        jwk
    }

    pub fn from_p521(kid: &str, key: &p521::ecdsa::VerifyingKey) -> Jwk {
        let point = key.to_encoded_point(false);
        let mut jwk = Jwk::bare(kid, "EC");
        jwk.crv = Some("P-521".to_string());
        jwk.x = point.x().map(|x| URL_SAFE_NO_PAD.encode(x));
        jwk.y = point.y().map(|y| URL_SAFE_NO_PAD.encode(y));
        jwk
    }

    pub fn from_ed25519(kid: &str, key: &ed25519_dalek::VerifyingKey) -> Jwk {
        let mut jwk = Jwk::bare(kid, "OKP");
        jwk.crv = Some("Ed25519".to_string());
        jwk.x = Some(URL_SAFE_NO_PAD.encode(key.as_bytes()));
        jwk
    }

    pub fn from_secret(kid: &str, secret: &[u8]) -> Jwk {
        let mut jwk = Jwk::bare(kid, "oct");
        jwk.k = Some(URL_SAFE_NO_PAD.encode(secret));
        jwk
    }

    /// The key family this JWK's material belongs to, if recognized.
    pub fn family(&self) -> Option<KeyFamily> {
        match self.kty.as_str() {
            "RSA" => Some(KeyFamily::Rsa),
            "EC" => Some(KeyFamily::EllipticCurve),
            "OKP" => Some(KeyFamily::EdDsa),
            "oct" => Some(KeyFamily::Hmac),
            _ => None,
        }
    }
}

enum KeyMaterial {
    Rsa(DecodingKey),
    // P-256 and P-384 verify through jsonwebtoken; P-521 is not modeled
    // there and verifies through the p521 ECDSA types directly.
    Ec {
        key: DecodingKey,
        curve: &'static str,
    },
    EcP521(p521::ecdsa::VerifyingKey),
    Ed25519(DecodingKey),
    Hmac(DecodingKey),
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        match self {
            KeyMaterial::Rsa(key) => KeyMaterial::Rsa(key.clone()),
            KeyMaterial::Ec { key, curve } => KeyMaterial::Ec {
                key: key.clone(),
                curve,
            },
            KeyMaterial::EcP521(key) => KeyMaterial::EcP521(key.clone()),
            KeyMaterial::Ed25519(key) => KeyMaterial::Ed25519(key.clone()),
            KeyMaterial::Hmac(key) => KeyMaterial::Hmac(key.clone()),
        }
    }
}

/// A JWK decoded into verification-ready key material.
#[derive(Clone)]
pub struct CachedKey {
    kid: String,
    family: KeyFamily,
    key_bits: u32,
    material: KeyMaterial,
}

impl std::fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let material = match self.material {
            KeyMaterial::Rsa(_) => "Rsa",
            KeyMaterial::Ec { .. } => "Ec",
            KeyMaterial::EcP521(_) => "EcP521",
            KeyMaterial::Ed25519(_) => "Ed25519",
            KeyMaterial::Hmac(_) => "Hmac",
        };
        f.debug_struct("CachedKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("key_bits", &self.key_bits)
            .field("material", &material)
            .finish()
    }
}

impl CachedKey {
    /// Decode a JWK into usable key material.
    ///
    /// Fails with `ConfigurationError` for keys this crate cannot use:
    /// missing `kid`, unknown `kty`/`crv`, or undecodable members. A JWK
    /// that decodes here may still be rejected at verification time by the
    /// per-algorithm minimum key length.
    pub fn from_jwk(jwk: &Jwk) -> AuthResult<CachedKey> {
        let kid = jwk
            .kid
            .clone()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| {
                AuthError::ConfigurationError("JWK does not specify a kid".to_string())
            })?;

        match jwk.kty.as_str() {
            "RSA" => {
                let n = required(jwk.n.as_deref(), &kid, "n")?;
                let e = required(jwk.e.as_deref(), &kid, "e")?;
                let modulus = decode_member(n, &kid, "n")?;
                let key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    AuthError::ConfigurationError(format!(
                        "invalid RSA components in JWK '{kid}': {err}"
                    ))
                })?;
                Ok(CachedKey {
                    kid,
                    family: KeyFamily::Rsa,
                    key_bits: modulus_bits(&modulus),
                    material: KeyMaterial::Rsa(key),
                })
            }
            "EC" => {
                let crv = required(jwk.crv.as_deref(), &kid, "crv")?;
                let x = required(jwk.x.as_deref(), &kid, "x")?;
                let y = required(jwk.y.as_deref(), &kid, "y")?;
                match crv {
                    "P-256" | "P-384" => {
                        let key = DecodingKey::from_ec_components(x, y).map_err(|err| {
                            AuthError::ConfigurationError(format!(
                                "invalid EC components in JWK '{kid}': {err}"
                            ))
                        })?;
                        let (curve, bits) = if crv == "P-256" {
                            ("P-256", 256)
                        } else {
                            ("P-384", 384)
                        };
                        Ok(CachedKey {
                            kid,
                            family: KeyFamily::EllipticCurve,
                            key_bits: bits,
                            material: KeyMaterial::Ec { key, curve },
                        })
                    }
                    "P-521" => {
                        let x = decode_member(x, &kid, "x")?;
                        let y = decode_member(y, &kid, "y")?;
                        let key = p521_key(&kid, &x, &y)?;
                        Ok(CachedKey {
                            kid,
                            family: KeyFamily::EllipticCurve,
                            key_bits: 521,
                            material: KeyMaterial::EcP521(key),
                        })
                    }
                    other => Err(AuthError::ConfigurationError(format!(
                        "unsupported EC curve '{other}' in JWK '{kid}'"
                    ))),
                }
            }
            "OKP" => {
                let crv = required(jwk.crv.as_deref(), &kid, "crv")?;
                if crv != "Ed25519" {
                    return Err(AuthError::ConfigurationError(format!(
                        "unsupported OKP curve '{crv}' in JWK '{kid}'"
                    )));
                }
                let x = required(jwk.x.as_deref(), &kid, "x")?;
                let key = DecodingKey::from_ed_components(x).map_err(|err| {
                    AuthError::ConfigurationError(format!(
                        "invalid Ed25519 component in JWK '{kid}': {err}"
                    ))
                })?;
                Ok(CachedKey {
                    kid,
                    family: KeyFamily::EdDsa,
                    key_bits: 256,
                    material: KeyMaterial::Ed25519(key),
                })
            }
            "oct" => {
                let k = required(jwk.k.as_deref(), &kid, "k")?;
                let secret = decode_member(k, &kid, "k")?;
                Ok(CachedKey {
                    kid,
                    family: KeyFamily::Hmac,
                    key_bits: (secret.len() * 8) as u32,
                    material: KeyMaterial::Hmac(DecodingKey::from_secret(&secret)),
                })
            }
            other => Err(AuthError::ConfigurationError(format!(
                "unsupported key type '{other}' in JWK '{kid}'"
            ))),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// Verify `signature` over `message` for `algorithm`.
    ///
    /// Returns `Ok(false)` for a routine mismatch. An error is raised only
    /// for structural problems: an algorithm/key-family mismatch, a curve
    /// mismatch, or a key shorter than the algorithm's minimum.
    pub fn verify(
        &self,
        algorithm: Algorithm,
        message: &[u8],
        signature: &[u8],
    ) -> AuthResult<bool> {
        if !algorithm.family().accepts_key(self.family) {
            return Err(AuthError::ConfigurationError(format!(
                "algorithm {algorithm} cannot be verified with a {:?} key ('{}')",
                self.family, self.kid
            )));
        }
        if self.key_bits < algorithm.min_key_bits() {
            return Err(AuthError::ConfigurationError(format!(
                "key '{}' is {} bits, below the {} minimum for {algorithm}",
                self.kid,
                self.key_bits,
                algorithm.min_key_bits()
            )));
        }

        let native_key = match (&self.material, algorithm) {
            (KeyMaterial::EcP521(key), Algorithm::ES512) => {
                let signature = match p521::ecdsa::Signature::from_slice(signature) {
                    Ok(signature) => signature,
                    // A signature of the wrong shape can never match.
                    Err(_) => return Ok(false),
                };
                return Ok(key.verify(message, &signature).is_ok());
            }
            (KeyMaterial::EcP521(_), _) | (KeyMaterial::Ec { .. }, Algorithm::ES512) => {
                return Err(self.curve_mismatch(algorithm));
            }
            (KeyMaterial::Ec { key, curve }, _) => {
                if algorithm.info().curve != Some(*curve) {
                    return Err(self.curve_mismatch(algorithm));
                }
                key
            }
            (KeyMaterial::Rsa(key), _)
            | (KeyMaterial::Ed25519(key), _)
            | (KeyMaterial::Hmac(key), _) => key,
        };

        let native_alg = algorithm.native().ok_or_else(|| {
            AuthError::ConfigurationError(format!(
                "algorithm {algorithm} has no signature primitive"
            ))
        })?;
        jsonwebtoken::crypto::verify(
            &URL_SAFE_NO_PAD.encode(signature),
            message,
            native_key,
            native_alg,
        )
        .map_err(|err| {
            AuthError::ConfigurationError(format!(
                "key '{}' cannot verify {algorithm} signatures: {err}",
                self.kid
            ))
        })
    }

    fn curve_mismatch(&self, algorithm: Algorithm) -> AuthError {
        AuthError::ConfigurationError(format!(
            "key '{}' is on the wrong curve for {algorithm}",
            self.kid
        ))
    }
}

fn required<'a>(member: Option<&'a str>, kid: &str, name: &str) -> AuthResult<&'a str> {
    member.filter(|value| !value.is_empty()).ok_or_else(|| {
        AuthError::ConfigurationError(format!("JWK '{kid}' is missing the '{name}' member"))
    })
}

fn decode_member(value: &str, kid: &str, name: &str) -> AuthResult<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(value).map_err(|err| {
        AuthError::ConfigurationError(format!(
            "JWK '{kid}' member '{name}' is not base64url: {err}"
        ))
    })
}

/// Bit length of a big-endian modulus, ignoring leading zero octets.
fn modulus_bits(bytes: &[u8]) -> u32 {
    let mut bytes = bytes;
    while let Some((first, rest)) = bytes.split_first() {
        if *first == 0 {
            bytes = rest;
        } else {
            return (bytes.len() as u32 - 1) * 8 + (8 - first.leading_zeros());
        }
    }
    0
}

fn p521_key(kid: &str, x: &[u8], y: &[u8]) -> AuthResult<p521::ecdsa::VerifyingKey> {
    let x = p521::FieldBytes::clone_from_slice(&p521_coordinate(kid, x)?);
    let y = p521::FieldBytes::clone_from_slice(&p521_coordinate(kid, y)?);
    let point = p521::EncodedPoint::from_affine_coordinates(&x, &y, false);
    p521::ecdsa::VerifyingKey::from_encoded_point(&point).map_err(|err| {
        AuthError::ConfigurationError(format!("JWK '{kid}' is not a valid P-521 point: {err}"))
    })
}

/// P-521 coordinates are 66 octets; some producers strip leading zeros.
fn p521_coordinate(kid: &str, bytes: &[u8]) -> AuthResult<[u8; 66]> {
    if bytes.len() > 66 {
        return Err(AuthError::ConfigurationError(format!(
            "JWK '{kid}' P-521 coordinate is {} octets",
            bytes.len()
        )));
    }
    let mut padded = [0u8; 66];
    padded[66 - bytes.len()..].copy_from_slice(bytes);
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signature::Signer;

    const MESSAGE: &[u8] = b"header.payload";

    fn rsa_private_key() -> rsa::RsaPrivateKey {
        let mut rng = rsa::rand_core::OsRng;
        rsa::RsaPrivateKey::new(&mut rng, 2048).expect("key generation")
    }

    #[test]
    fn rsa_round_trip_verifies() {
        use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};

        let private_key = rsa_private_key();
        let jwk = Jwk::from_rsa("k1", &private_key.to_public_key());
        let key = CachedKey::from_jwk(&jwk).expect("decode");
        assert_eq!(key.kid(), "k1");
        assert_eq!(key.family(), KeyFamily::Rsa);
        assert_eq!(key.key_bits(), 2048);

        let pem = private_key.to_pkcs1_pem(LineEnding::LF).expect("pem");
        let encoding = jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).expect("key");
        let signature = jsonwebtoken::crypto::sign(MESSAGE, &encoding, jsonwebtoken::Algorithm::RS256)
            .expect("sign");
        let signature = URL_SAFE_NO_PAD.decode(signature).expect("b64");

        assert!(key.verify(Algorithm::RS256, MESSAGE, &signature).unwrap());
        assert!(!key.verify(Algorithm::RS256, b"tampered", &signature).unwrap());
        // PSS signatures are a different scheme, so a PKCS#1 signature must
        // not verify under PS256 even with the same key.
        assert!(!key.verify(Algorithm::PS256, MESSAGE, &signature).unwrap());
    }

    #[test]
    fn p256_round_trip_verifies() {
        let signing_key = p256::ecdsa::SigningKey::from_slice(&[0x11; 32]).expect("scalar");
        let jwk = Jwk::from_p256("ec1", signing_key.verifying_key());
        let key = CachedKey::from_jwk(&jwk).expect("decode");
        assert_eq!(key.family(), KeyFamily::EllipticCurve);
        assert_eq!(key.key_bits(), 256);

        let signature: p256::ecdsa::Signature = signing_key.sign(MESSAGE);
        let bytes = signature.to_bytes();

        assert!(key.verify(Algorithm::ES256, MESSAGE, bytes.as_slice()).unwrap());
        assert!(!key
            .verify(Algorithm::ES256, b"tampered", bytes.as_slice())
            .unwrap());
    }

    #[test]
    fn p521_round_trip_verifies() {
        let mut scalar = [0u8; 66];
        scalar[65] = 7;
        let signing_key = p521::ecdsa::SigningKey::from_slice(&scalar).expect("scalar");
        let jwk = Jwk::from_p521("ec5", &p521::ecdsa::VerifyingKey::from(&signing_key));
        let key = CachedKey::from_jwk(&jwk).expect("decode");
        assert_eq!(key.key_bits(), 521);

        let signature: p521::ecdsa::Signature = signing_key.sign(MESSAGE);
        let bytes = signature.to_bytes();

        assert!(key.verify(Algorithm::ES512, MESSAGE, bytes.as_slice()).unwrap());
        assert!(!key
            .verify(Algorithm::ES512, b"tampered", bytes.as_slice())
            .unwrap());
        // Garbage of the wrong length is a mismatch, not an error.
        assert!(!key.verify(Algorithm::ES512, MESSAGE, b"short").unwrap());
    }

    #[test]
    fn ed25519_round_trip_verifies() {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[1u8; 32]);
        let jwk = Jwk::from_ed25519("ed1", &signing_key.verifying_key());
        let key = CachedKey::from_jwk(&jwk).expect("decode");
        assert_eq!(key.family(), KeyFamily::EdDsa);

        let signature = signing_key.sign(MESSAGE).to_bytes();
        assert!(key.verify(Algorithm::EdDSA, MESSAGE, &signature).unwrap());
        assert!(!key.verify(Algorithm::EdDSA, b"tampered", &signature).unwrap());
    }

    #[test]
    fn hmac_round_trip_verifies() {
        let secret = [0x42u8; 32];
        let jwk = Jwk::from_secret("h1", &secret);
        let key = CachedKey::from_jwk(&jwk).expect("decode");
        assert_eq!(key.key_bits(), 256);

        let encoding = jsonwebtoken::EncodingKey::from_secret(&secret);
        let signature = jsonwebtoken::crypto::sign(MESSAGE, &encoding, jsonwebtoken::Algorithm::HS256)
            .expect("sign");
        let signature = URL_SAFE_NO_PAD.decode(signature).expect("b64");

        assert!(key.verify(Algorithm::HS256, MESSAGE, &signature).unwrap());

        let other = jsonwebtoken::EncodingKey::from_secret(&[0x43u8; 32]);
        let forged = jsonwebtoken::crypto::sign(MESSAGE, &other, jsonwebtoken::Algorithm::HS256)
            .expect("sign");
        let forged = URL_SAFE_NO_PAD.decode(forged).expect("b64");
        assert!(!key.verify(Algorithm::HS256, MESSAGE, &forged).unwrap());
    }

    #[test]
    fn family_mismatch_is_an_error_not_false() {
        let signing_key = p256::ecdsa::SigningKey::from_slice(&[0x11; 32]).expect("scalar");
        let key = CachedKey::from_jwk(&Jwk::from_p256("ec1", signing_key.verifying_key()))
            .expect("decode");

        let err = key.verify(Algorithm::RS256, MESSAGE, &[0u8; 256]).unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
    }

    #[test]
    fn curve_mismatch_is_an_error() {
        let signing_key = p256::ecdsa::SigningKey::from_slice(&[0x11; 32]).expect("scalar");
        let key = CachedKey::from_jwk(&Jwk::from_p256("ec1", signing_key.verifying_key()))
            .expect("decode");

        let err = key.verify(Algorithm::ES384, MESSAGE, &[0u8; 96]).unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
        let err = key.verify(Algorithm::ES512, MESSAGE, &[0u8; 132]).unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
    }

    #[test]
    fn short_rsa_modulus_is_rejected_at_verification() {
        // 1024-bit modulus: decodes fine, fails the RS256 minimum.
        let jwk = Jwk {
            n: Some(URL_SAFE_NO_PAD.encode([0x80u8; 128])),
            e: Some("AQAB".to_string()),
            ..Jwk::bare("small", "RSA")
        };
        let key = CachedKey::from_jwk(&jwk).expect("decode");
        assert_eq!(key.key_bits(), 1024);

        let err = key.verify(Algorithm::RS256, MESSAGE, &[0u8; 128]).unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
    }

    #[test]
    fn jwk_without_kid_is_rejected() {
        let mut jwk = Jwk::from_secret("h1", &[0u8; 32]);
        jwk.kid = None;
        let err = CachedKey::from_jwk(&jwk).unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
    }

    #[test]
    fn unknown_kty_is_rejected() {
        let jwk = Jwk::bare("x", "EC2");
        let err = CachedKey::from_jwk(&jwk).unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
    }

    #[test]
    fn modulus_bit_length_ignores_leading_zeros() {
        assert_eq!(modulus_bits(&[0x80, 0x00]), 16);
        assert_eq!(modulus_bits(&[0x00, 0x80, 0x00]), 16);
        assert_eq!(modulus_bits(&[0x01]), 1);
        assert_eq!(modulus_bits(&[0x00]), 0);
        assert_eq!(modulus_bits(&[]), 0);
    }

    #[test]
    fn jwk_set_parses_mixed_families() {
        let body = serde_json::json!({
            "keys": [
                { "kid": "a", "kty": "RSA", "n": URL_SAFE_NO_PAD.encode([0x80u8; 256]), "e": "AQAB" },
                { "kid": "b", "kty": "OKP", "crv": "Ed25519",
                  "x": URL_SAFE_NO_PAD.encode([0x10u8; 32]) },
            ]
        });
        let set: JwkSet = serde_json::from_value(body).expect("parse");
        assert_eq!(set.keys.len(), 2);
        assert_eq!(set.keys[0].family(), Some(KeyFamily::Rsa));
        assert_eq!(set.keys[1].family(), Some(KeyFamily::EdDsa));
    }
}
