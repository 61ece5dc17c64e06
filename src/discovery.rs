use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::Timed;
use crate::error::{AuthError, AuthResult};

/// The subset of an OpenID Connect discovery document this crate consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub response_modes_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub subject_types_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub acr_values_supported: Vec<String>,
    /// When this document was fetched; not part of the wire format.
    #[serde(skip)]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// How long fetched resources may be cached.
///
/// The lifetime of a fetched key set comes from its `Cache-Control: max-age`
/// directive, falling back to `default_lifetime` when the header is absent,
/// and never dropping below `minimum_lifetime` so a misconfigured endpoint
/// cannot force a fetch per validation.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub default_lifetime: Duration,
    pub minimum_lifetime: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            default_lifetime: Duration::from_secs(60),
            minimum_lifetime: Duration::ZERO,
        }
    }
}

impl CachePolicy {
    pub fn new(default_lifetime: Duration, minimum_lifetime: Duration) -> Self {
        CachePolicy {
            default_lifetime,
            minimum_lifetime,
        }
    }

    fn lifetime(&self, max_age: Option<u64>) -> Duration {
        let advertised = max_age
            .map(Duration::from_secs)
            .unwrap_or(self.default_lifetime);
        advertised.max(self.minimum_lifetime)
    }
}

/// The well-known discovery URL for an issuer.
pub(crate) fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// GET a JSON resource and pair it with the expiry its response headers call
/// for.
pub(crate) async fn fetch_with_expiry<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    policy: CachePolicy,
) -> AuthResult<Timed<T>> {
    let requested_at = SystemTime::now();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| AuthError::DiscoveryFailure(format!("GET {url}: {err}")))?;

    if !response.status().is_success() {
        return Err(AuthError::DiscoveryFailure(format!(
            "HTTP {} from {url}",
            response.status()
        )));
    }

    let max_age = max_age(response.headers());
    let body: T = response
        .json()
        .await
        .map_err(|err| AuthError::DiscoveryFailure(format!("invalid JSON from {url}: {err}")))?;

    let lifetime = policy.lifetime(max_age);
    debug!(url, lifetime_secs = lifetime.as_secs(), "fetched");
    Ok(Timed::new(body, requested_at + lifetime))
}

/// Fetch and screen the discovery document for `issuer`.
///
/// The document's own `issuer` field must equal the issuer that was asked
/// for; a mismatch is rejected before anything else trusts the document.
pub(crate) async fn fetch_discovery(
    client: &reqwest::Client,
    issuer: &str,
    policy: CachePolicy,
) -> AuthResult<Timed<DiscoveryDocument>> {
    let url = discovery_url(issuer);
    let fetched = fetch_with_expiry::<DiscoveryDocument>(client, &url, policy).await?;
    let expires_at = fetched.expires_at();
    let mut document = fetched.value().clone();

    if document.issuer != issuer {
        warn!(
            requested = issuer,
            claimed = %document.issuer,
            "discovery document claims a different issuer"
        );
        return Err(AuthError::DiscoveryFailure(format!(
            "discovery document from {url} claims issuer '{}'",
            document.issuer
        )));
    }

    document.fetched_at = Some(Utc::now());
    Ok(Timed::new(document, expires_at))
}

/// Smallest positive `max-age` across all `Cache-Control` headers.
fn max_age(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let mut smallest: Option<u64> = None;
    for header in headers.get_all(reqwest::header::CACHE_CONTROL) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for directive in header.split(',') {
            let mut parts = directive.splitn(2, '=');
            let name = parts.next().unwrap_or("").trim();
            if !name.eq_ignore_ascii_case("max-age") {
                continue;
            }
            let value = parts.next().unwrap_or("").trim().trim_matches('"');
            match value.parse::<u64>() {
                Ok(seconds) if seconds > 0 => {
                    smallest = Some(smallest.map_or(seconds, |current| current.min(seconds)));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(directive = value, %err, "invalid max-age cache-control directive");
                }
            }
        }
    }
    smallest
}
