//! Memoization of vendor lookups in the shared cache.

use std::future::Future;
use std::time::Duration;

use sb_core::cache::{get_json, set_json};
use sb_core::{CacheHandle, ConnectorResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Returns the cached value for `key`, or runs `fetch` and caches its result.
///
/// Without a cache this is just `fetch`. Cache failures are logged and
/// never fail the lookup; errors from `fetch` are not cached.
pub async fn get_or_fetch<T, F, Fut>(
    cache: Option<&CacheHandle>,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> ConnectorResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ConnectorResult<T>>,
{
    let Some(cache) = cache else {
        return fetch().await;
    };

    match get_json::<T>(cache.as_ref(), key).await {
        Ok(Some(value)) => {
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "Cache read failed"),
    }

    let value = fetch().await?;
    if let Err(e) = set_json(cache.as_ref(), key, &value, ttl).await {
        warn!(key = %key, error = %e, "Cache write failed");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::{ConnectorError, MokaSharedCache};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetches_once_then_hits() {
        let cache: CacheHandle = Arc::new(MokaSharedCache::new(100));
        let calls = &AtomicU32::new(0);

        for _ in 0..3 {
            let ttl = Duration::from_secs(60);
            let value: String = get_or_fetch(Some(&cache), "k", ttl, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fetched".to_string())
            })
            .await
            .unwrap();
            assert_eq!(value, "fetched");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: CacheHandle = Arc::new(MokaSharedCache::new(100));

        let err = get_or_fetch::<String, _, _>(Some(&cache), "k", Duration::ZERO, || async {
            Err(ConnectorError::Timeout("slow".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectorError::Timeout(_)));

        let value: String = get_or_fetch(Some(&cache), "k", Duration::ZERO, || async {
            Ok("second".to_string())
        })
        .await
        .unwrap();
        assert_eq!(value, "second");
    }

    #[tokio::test]
    async fn test_without_cache_always_fetches() {
        let calls = &AtomicU32::new(0);
        for _ in 0..2 {
            let _: u32 = get_or_fetch(None, "k", Duration::ZERO, || async move {
                Ok(calls.fetch_add(1, Ordering::SeqCst))
            })
            .await
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
