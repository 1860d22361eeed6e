//! Shared cache handed to connectors when they build tools.
//!
//! Connectors memoize vendor lookups here (field mappings, reputation
//! verdicts). The registry stores one [`CacheHandle`] at initialization and
//! forwards it unchanged; implementations synchronize internally.
//!
//! # Example
//!
//! ```
//! use sb_core::cache::{MokaSharedCache, SharedCache};
//! use std::time::Duration;
//!
//! # tokio_test_block_on(async {
//! let cache = MokaSharedCache::new(1_000);
//! cache.set("vt:hash:abc", b"clean", Duration::from_secs(60)).await.unwrap();
//! assert_eq!(cache.get("vt:hash:abc").await.unwrap(), Some(b"clean".to_vec()));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod memory;

pub use memory::MokaSharedCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value cache over bytes with per-entry TTL.
///
/// A TTL of `Duration::ZERO` means the entry never expires.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

/// The cache handle shared across connector instances.
pub type CacheHandle = Arc<dyn SharedCache>;

/// Reads a JSON value stored with [`set_json`].
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn SharedCache,
    key: &str,
) -> CacheResult<Option<T>> {
    match cache.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Stores `value` as JSON.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn SharedCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> CacheResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    cache.set(key, &bytes, ttl).await
}
