/// OCR result cache keyed by image content.
///
/// Key schema:
/// - `medalert:v1:ocr:{sha256(engine|image)}`: recognized text (TTL from config)
///
/// Only successful recognitions are stored. Extraction and analysis results are
/// not cached.
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::redis::RedisCache;

const KEY_PREFIX: &str = "medalert:v1:";
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// String key-value storage with expiry. Implementations swallow their own errors.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> bool;
    async fn is_available(&self) -> bool;
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        RedisCache::get(self, key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        RedisCache::set_with_ttl(self, key, value, ttl_secs).await
    }

    async fn is_available(&self) -> bool {
        RedisCache::is_available(self).await
    }
}

pub struct ScanCache {
    store: Box<dyn CacheStore>,
    ttl_secs: u64,
}

impl ScanCache {
    pub fn new(store: impl CacheStore + 'static, ttl_secs: u64) -> Self {
        Self {
            store: Box::new(store),
            ttl_secs,
        }
    }

    pub async fn is_available(&self) -> bool {
        self.store.is_available().await
    }

    pub async fn get_ocr_text(&self, image: &[u8], engine: u8) -> Option<String> {
        let key = ocr_key(image, engine);
        let text = self.store.get(&key).await?;
        debug!(key, "ocr cache hit");
        Some(text)
    }

    pub async fn set_ocr_text(&self, image: &[u8], engine: u8, text: &str) {
        self.store
            .set_with_ttl(&ocr_key(image, engine), text, self.ttl_secs)
            .await;
    }
}

fn ocr_key(image: &[u8], engine: u8) -> String {
    let mut hasher = Sha256::new();
    hasher.update(engine.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(image);
    format!("{KEY_PREFIX}ocr:{:x}", hasher.finalize())
}
