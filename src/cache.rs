use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::watch;

use crate::error::{AuthError, AuthResult};

/// A value paired with the absolute instant after which it must no longer be
/// served from cache.
#[derive(Debug, Clone)]
pub struct Timed<V> {
    value: V,
    expires_at: SystemTime,
}

impl<V> Timed<V> {
    pub fn new(value: V, expires_at: SystemTime) -> Self {
        Timed { value, expires_at }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    fn expired_at(&self, now: SystemTime) -> bool {
        self.expires_at < now
    }
}

type LoadOutcome<V> = Option<AuthResult<Timed<V>>>;

enum Slot<V> {
    Ready(Timed<V>),
    Pending(watch::Receiver<LoadOutcome<V>>),
}

/// Expiry-aware cache with single-flight loading.
///
/// `get` invokes its loader at most once per key regardless of how many
/// callers miss concurrently; every waiter observes the same success or
/// failure. Failures are never cached, so the next call after a failed load
/// retries independently. Eviction is lazy: expired entries are only
/// discarded when the key is next accessed.
///
/// The loader runs on a spawned task, so a caller that stops awaiting does
/// not abort an in-flight load; its result is still committed for later
/// callers.
pub struct TimedCache<K, V> {
    slots: Arc<Mutex<HashMap<K, Slot<V>>>>,
}

impl<K, V> Clone for TimedCache<K, V> {
    fn clone(&self) -> Self {
        TimedCache {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> Default for TimedCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        TimedCache {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether the key currently holds a live value or an in-flight load.
    pub fn contains_key(&self, key: &K) -> bool {
        let slots = self.slots.lock().expect("cache lock poisoned");
        match slots.get(key) {
            Some(Slot::Ready(entry)) => !entry.expired_at(SystemTime::now()),
            Some(Slot::Pending(_)) => true,
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<K> {
        let slots = self.slots.lock().expect("cache lock poisoned");
        slots.keys().cloned().collect()
    }

    /// Install a value directly, replacing whatever the key held.
    pub fn put(&self, key: K, value: V, expires_at: SystemTime) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        slots.insert(key, Slot::Ready(Timed::new(value, expires_at)));
    }

    pub fn invalidate(&self, key: &K) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        slots.remove(key);
    }

    /// Return the cached value for `key`, or run `loader` to produce one.
    ///
    /// If another caller is already loading the same key, this call waits on
    /// that load instead of starting its own.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> AuthResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<Timed<V>>> + Send + 'static,
    {
        let mut rx = {
            let mut slots = self.slots.lock().expect("cache lock poisoned");
            match slots.get(&key) {
                Some(Slot::Ready(entry)) if !entry.expired_at(SystemTime::now()) => {
                    return Ok(entry.value().clone());
                }
                Some(Slot::Pending(rx)) => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key.clone(), Slot::Pending(rx.clone()));
                    let slots_handle = Arc::clone(&self.slots);
                    let load = loader();
                    let task_key = key.clone();
                    tokio::spawn(async move {
                        let outcome = load.await;
                        {
                            let mut slots =
                                slots_handle.lock().expect("cache lock poisoned");
                            match &outcome {
                                Ok(entry) => {
                                    slots.insert(task_key, Slot::Ready(entry.clone()));
                                }
                                Err(_) => {
                                    slots.remove(&task_key);
                                }
                            }
                        }
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        loop {
            if let Some(outcome) = rx.borrow_and_update().as_ref() {
                return match outcome {
                    Ok(entry) => Ok(entry.value().clone()),
                    Err(err) => Err(err.clone()),
                };
            }
            if rx.changed().await.is_err() {
                // Loader task died without publishing. Clear the stale
                // pending slot so the next caller can retry.
                let mut slots = self.slots.lock().expect("cache lock poisoned");
                if let Some(Slot::Pending(current)) = slots.get(&key) {
                    if current.same_channel(&rx) {
                        slots.remove(&key);
                    }
                }
                return Err(AuthError::ConfigurationError(
                    "cache loader aborted before completing".to_string(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn in_one_minute() -> SystemTime {
        SystemTime::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn get_returns_cached_value_without_loading() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        cache.put("k".to_string(), 7, in_one_minute());

        let value = cache
            .get("k".to_string(), || async {
                panic!("loader must not run on a cache hit")
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn loader_runs_once_for_concurrent_callers() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make_loader = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Timed::new(42, SystemTime::now() + Duration::from_secs(60)))
            }
        };

        let (a, b) = tokio::join!(
            cache.get("k".to_string(), make_loader(Arc::clone(&calls))),
            cache.get("k".to_string(), make_loader(Arc::clone(&calls))),
        );
        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_reloaded() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        cache.put(
            "k".to_string(),
            1,
            SystemTime::now() - Duration::from_secs(1),
        );

        let value = cache
            .get("k".to_string(), || async {
                Ok(Timed::new(2, SystemTime::now() + Duration::from_secs(60)))
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn failures_propagate_and_are_not_cached() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AuthError::DiscoveryFailure("boom".to_string()))
            }
        };
        let err = cache.get("k".to_string(), failing).await.unwrap_err();
        assert!(matches!(err, AuthError::DiscoveryFailure(_)));
        assert!(!cache.contains_key(&"k".to_string()));

        let value = cache
            .get("k".to_string(), {
                let calls = Arc::clone(&calls);
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Timed::new(3, SystemTime::now() + Duration::from_secs(60)))
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_failure() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make_loader = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(AuthError::DiscoveryFailure("down".to_string()))
            }
        };

        let (a, b) = tokio::join!(
            cache.get("k".to_string(), make_loader(Arc::clone(&calls))),
            cache.get("k".to_string(), make_loader(Arc::clone(&calls))),
        );
        assert!(matches!(a.unwrap_err(), AuthError::DiscoveryFailure(_)));
        assert!(matches!(b.unwrap_err(), AuthError::DiscoveryFailure(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn put_and_introspection() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        assert!(!cache.contains_key(&"a".to_string()));

        cache.put("a".to_string(), 1, in_one_minute());
        cache.put("b".to_string(), 2, in_one_minute());
        assert!(cache.contains_key(&"a".to_string()));

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        cache.invalidate(&"a".to_string());
        assert!(!cache.contains_key(&"a".to_string()));
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_the_load() {
        let cache: TimedCache<String, u32> = TimedCache::new();

        let first = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get("k".to_string(), || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(Timed::new(9, SystemTime::now() + Duration::from_secs(60)))
                    })
                    .await
            }
        });
        // Give the caller time to start the load, then abandon it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        first.abort();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let value = cache
            .get("k".to_string(), || async {
                panic!("value should already be committed")
            })
            .await
            .unwrap();
        assert_eq!(value, 9);
    }
}
