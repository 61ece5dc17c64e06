use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::{Timed, TimedCache};
use crate::discovery::{fetch_discovery, fetch_with_expiry, CachePolicy, DiscoveryDocument};
use crate::error::{AuthError, AuthResult};
use crate::jwk::{CachedKey, Jwk, JwkSet};

/// Inline keys never expire; push their deadline far enough out that it
/// never comes up.
const INLINE_KEY_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Resolves the signing key for an (issuer, kid) pair.
#[async_trait]
pub trait KeySetResolver: Send + Sync {
    async fn find_key(&self, issuer: &str, kid: &str) -> AuthResult<CachedKey>;
}

/// Key resolution from a fixed configuration: inline JWKs and/or a static
/// list of JWKS URLs, with no OpenID discovery involved.
///
/// Keys are cached by `kid`, so every configured endpoint must use globally
/// unique key ids. On a miss, one single-flight pass fetches every URL and
/// side-loads all keys found; a kid that still cannot be found fails without
/// another fetch until its cache entry expires.
#[derive(Clone)]
pub struct StaticKeyResolver {
    client: reqwest::Client,
    jwks_urls: Arc<Vec<String>>,
    policy: CachePolicy,
    keys: TimedCache<String, CachedKey>,
}

impl StaticKeyResolver {
    pub fn new<I, S>(client: reqwest::Client, jwks_urls: I, policy: CachePolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticKeyResolver {
            client,
            jwks_urls: Arc::new(jwks_urls.into_iter().map(Into::into).collect()),
            policy,
            keys: TimedCache::new(),
        }
    }

    /// A resolver that serves nothing but explicitly added keys.
    pub fn from_keys<'a, I>(keys: I) -> AuthResult<Self>
    where
        I: IntoIterator<Item = &'a Jwk>,
    {
        let resolver = StaticKeyResolver::new(
            reqwest::Client::new(),
            Vec::<String>::new(),
            CachePolicy::default(),
        );
        for jwk in keys {
            resolver.add_key(jwk)?;
        }
        Ok(resolver)
    }

    /// Install a key directly, bypassing any fetch.
    pub fn add_key(&self, jwk: &Jwk) -> AuthResult<()> {
        let key = CachedKey::from_jwk(jwk)?;
        self.keys.put(
            key.kid().to_string(),
            key,
            SystemTime::now() + INLINE_KEY_LIFETIME,
        );
        Ok(())
    }

    pub fn remove_key(&self, kid: &str) {
        self.keys.invalidate(&kid.to_string());
    }

    pub fn contains_key(&self, kid: &str) -> bool {
        self.keys.contains_key(&kid.to_string())
    }
}

#[async_trait]
impl KeySetResolver for StaticKeyResolver {
    async fn find_key(&self, _issuer: &str, kid: &str) -> AuthResult<CachedKey> {
        let client = self.client.clone();
        let jwks_urls = Arc::clone(&self.jwks_urls);
        let policy = self.policy;
        let cache = self.keys.clone();
        let wanted = kid.to_string();

        self.keys
            .get(kid.to_string(), move || async move {
                if jwks_urls.is_empty() {
                    return Err(AuthError::KeyNotFound(wanted));
                }

                let mut found: Option<Timed<CachedKey>> = None;
                for url in jwks_urls.iter() {
                    let fetched =
                        match fetch_with_expiry::<JwkSet>(&client, url, policy).await {
                            Ok(fetched) => fetched,
                            Err(err) => {
                                warn!(url = %url, %err, "failed to fetch JWKS");
                                continue;
                            }
                        };
                    let expires_at = fetched.expires_at();
                    for (kid, key) in decode_key_set(url, fetched.value()) {
                        if kid == wanted {
                            if found.is_none() {
                                found = Some(Timed::new(key, expires_at));
                            }
                        } else {
                            cache.put(kid, key, expires_at);
                        }
                    }
                }

                found.ok_or(AuthError::KeyNotFound(wanted))
            })
            .await
    }
}

/// Key resolution through OpenID Connect discovery.
///
/// Discovery documents and key-set snapshots are cached per issuer; a
/// snapshot is replaced wholesale on refresh, never patched in place. A kid
/// that is absent from a live snapshot fails with `KeyNotFound` and no
/// additional fetch; the next validation after expiry (or after
/// [`DiscoveryKeyResolver::invalidate`]) picks up rotated keys.
#[derive(Clone)]
pub struct DiscoveryKeyResolver {
    client: reqwest::Client,
    policy: CachePolicy,
    documents: TimedCache<String, DiscoveryDocument>,
    key_sets: TimedCache<String, Arc<HashMap<String, CachedKey>>>,
}

impl DiscoveryKeyResolver {
    pub fn new(client: reqwest::Client, policy: CachePolicy) -> Self {
        DiscoveryKeyResolver {
            client,
            policy,
            documents: TimedCache::new(),
            key_sets: TimedCache::new(),
        }
    }

    /// The discovery document for `issuer`, fetched or served from cache.
    pub async fn discovery_document(&self, issuer: &str) -> AuthResult<DiscoveryDocument> {
        let client = self.client.clone();
        let policy = self.policy;
        let issuer = issuer.to_string();
        self.documents
            .get(issuer.clone(), move || async move {
                fetch_discovery(&client, &issuer, policy).await
            })
            .await
    }

    /// Drop any cached state for `issuer` so the next lookup refetches.
    pub fn invalidate(&self, issuer: &str) {
        self.documents.invalidate(&issuer.to_string());
        self.key_sets.invalidate(&issuer.to_string());
    }

    async fn key_set(&self, issuer: &str) -> AuthResult<Arc<HashMap<String, CachedKey>>> {
        let resolver = self.clone();
        let issuer_owned = issuer.to_string();
        self.key_sets
            .get(issuer.to_string(), move || async move {
                let document = resolver.discovery_document(&issuer_owned).await?;
                let fetched = fetch_with_expiry::<JwkSet>(
                    &resolver.client,
                    &document.jwks_uri,
                    resolver.policy,
                )
                .await?;
                let expires_at = fetched.expires_at();
                let keys: HashMap<String, CachedKey> =
                    decode_key_set(&document.jwks_uri, fetched.value())
                        .into_iter()
                        .collect();
                debug!(issuer = %issuer_owned, keys = keys.len(), "refreshed key set");
                Ok(Timed::new(Arc::new(keys), expires_at))
            })
            .await
    }
}

#[async_trait]
impl KeySetResolver for DiscoveryKeyResolver {
    async fn find_key(&self, issuer: &str, kid: &str) -> AuthResult<CachedKey> {
        let snapshot = self.key_set(issuer).await?;
        snapshot
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))
    }
}

/// Decode every usable key in a fetched set. Unparseable entries are skipped
/// with a warning; the first occurrence of a kid wins.
fn decode_key_set(source: &str, set: &JwkSet) -> Vec<(String, CachedKey)> {
    let mut keys: Vec<(String, CachedKey)> = Vec::with_capacity(set.keys.len());
    for jwk in &set.keys {
        match CachedKey::from_jwk(jwk) {
            Ok(key) => {
                if keys.iter().any(|(kid, _)| kid == key.kid()) {
                    warn!(source, kid = key.kid(), "duplicate kid in key set; keeping the first");
                    continue;
                }
                keys.push((key.kid().to_string(), key));
            }
            Err(err) => {
                warn!(source, %err, "skipping unusable JWK");
            }
        }
    }
    keys
}
