use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::algorithm::Algorithm;
use crate::error::{AuthError, AuthResult};

/// A decoded JWT (RFC 7519).
///
/// Holds the decoded header and payload objects, the exact bytes that were
/// signed, and the raw signature. Immutable once parsed; every claim
/// accessor is a pure projection over the payload. A `Jwt` is created per
/// validation call and is never cached.
#[derive(Debug, Clone)]
pub struct Jwt {
    header: Value,
    payload: Value,
    signing_input: String,
    signature: Vec<u8>,
    algorithm: Algorithm,
}

impl Jwt {
    /// Parse a compact JWS serialization.
    ///
    /// This establishes structure only: three `.`-separated segments,
    /// unpadded base64url, JSON objects for header and payload, and a known
    /// `alg` name. Nothing here is trusted until validation completes.
    pub fn parse(token: &str) -> AuthResult<Jwt> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(AuthError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let header = decode_json_segment(segments[0], "header")?;
        let payload = decode_json_segment(segments[1], "payload")?;
        let signature = URL_SAFE_NO_PAD
            .decode(segments[2])
            .map_err(|err| AuthError::MalformedToken(format!("signature segment: {err}")))?;

        let algorithm = match header.get("alg") {
            Some(Value::String(name)) => Algorithm::from_name(name)?,
            Some(_) => {
                return Err(AuthError::MalformedToken(
                    "header 'alg' is not a string".to_string(),
                ))
            }
            None => {
                return Err(AuthError::MalformedToken(
                    "header does not specify 'alg'".to_string(),
                ))
            }
        };

        Ok(Jwt {
            header,
            payload,
            signing_input: format!("{}.{}", segments[0], segments[1]),
            signature,
            algorithm,
        })
    }

    pub fn header(&self) -> &Value {
        &self.header
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The exact bytes the signature covers: `base64url(header) + "." +
    /// base64url(payload)`.
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// Number of claims in the payload.
    pub fn claim_count(&self) -> usize {
        self.payload.as_object().map_or(0, |claims| claims.len())
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// A claim normalized to a list of strings: a bare string becomes a
    /// one-element list, an array is rendered element-wise.
    pub fn claim_as_list(&self, name: &str) -> Vec<String> {
        match self.payload.get(name) {
            Some(Value::String(value)) => vec![value.clone()],
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| match value {
                    Value::String(value) => value.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn issuer(&self) -> Option<&str> {
        self.payload.get("iss").and_then(Value::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }

    /// The `aud` claim, normalized to a list whether the token carries a
    /// string or an array.
    pub fn audience(&self) -> Vec<String> {
        self.claim_as_list("aud")
    }

    pub fn has_audience(&self, audience: &str) -> bool {
        self.audience().iter().any(|value| value == audience)
    }

    /// Scopes from the space-delimited `scope` claim.
    pub fn scopes(&self) -> Vec<String> {
        match self.payload.get("scope").and_then(Value::as_str) {
            Some(scope) if !scope.is_empty() => {
                scope.split(' ').map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().iter().any(|value| value == scope)
    }

    pub fn groups(&self) -> Vec<String> {
        self.claim_as_list("groups")
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups().iter().any(|value| value == group)
    }

    pub fn roles(&self) -> Vec<String> {
        self.claim_as_list("roles")
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|value| value == role)
    }

    /// `exp` as seconds since the epoch.
    pub fn expiration(&self) -> Option<i64> {
        self.payload.get("exp").and_then(Value::as_i64)
    }

    /// `exp` as a calendar timestamp.
    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.expiration()
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// `nbf` as seconds since the epoch.
    pub fn not_before(&self) -> Option<i64> {
        self.payload.get("nbf").and_then(Value::as_i64)
    }

    /// `nbf` as a calendar timestamp.
    pub fn not_before_time(&self) -> Option<DateTime<Utc>> {
        self.not_before()
            .and_then(|nbf| Utc.timestamp_opt(nbf, 0).single())
    }
}

fn decode_json_segment(segment: &str, name: &str) -> AuthResult<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| AuthError::MalformedToken(format!("{name} segment: {err}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|err| AuthError::MalformedToken(format!("{name} is not JSON: {err}")))?;
    if !value.is_object() {
        return Err(AuthError::MalformedToken(format!(
            "{name} is not a JSON object"
        )));
    }
    Ok(value)
}
