#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use token_verify::Jwk;

pub struct RsaKeyMaterial {
    pub public_key: RsaPublicKey,
    pub encoding: EncodingKey,
    pub modulus: String,
    pub exponent: String,
}

pub fn generate_rsa_material() -> RsaKeyMaterial {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
    let public_key = private_key.to_public_key();

    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .expect("private pem");
    let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key");
    let modulus = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let exponent = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

    RsaKeyMaterial {
        public_key,
        encoding,
        modulus,
        exponent,
    }
}

pub fn mint_rs256(encoding: &EncodingKey, kid: &str, issuer: &str, audience: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": "user-1",
        "iss": issuer,
        "aud": audience,
        "scope": "openid profile",
        "exp": now + 3600,
        "nbf": now - 60,
        "iat": now,
    });

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(&header, &claims, encoding).expect("sign token")
}

pub fn jwks_value(kid: &str, material: &RsaKeyMaterial) -> Value {
    let jwk = Jwk::from_rsa(kid, &material.public_key);
    json!({ "keys": [serde_json::to_value(jwk).expect("serialize jwk")] })
}

pub fn discovery_value(issuer: &str, jwks_uri: &str) -> Value {
    json!({
        "issuer": issuer,
        "jwks_uri": jwks_uri,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "response_types_supported": ["code", "id_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256", "ES256"],
    })
}
