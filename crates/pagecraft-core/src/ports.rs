//! Abstract ports the engine depends on.
//!
//! Concrete implementations live in the provider and storage crates;
//! the in-memory image store here backs tests and embedded use.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Bounds reference-image payload size before it is sent to a provider.
///
/// Compression never fails: if the target cannot be met at the floor
/// quality/resolution, implementations return the smallest achievable
/// result (documented degrade policy, not an error).
pub trait ReferenceCompressor: Send + Sync {
    /// Produces output `<= max_kb` when possible; returns the input
    /// unchanged if it is already within the bound.
    fn compress(&self, bytes: &[u8], max_kb: u32) -> Vec<u8>;
}

/// Pass-through compressor for tests and callers that bound payloads
/// themselves.
pub struct NoopCompressor;

impl ReferenceCompressor for NoopCompressor {
    fn compress(&self, bytes: &[u8], _max_kb: u32) -> Vec<u8> {
        bytes.to_vec()
    }
}

/// Persists generated image bytes and resolves image refs back to them.
///
/// Writes must be atomic from the reader's point of view: a reader never
/// observes a partially written image.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persists the bytes for one page, returning an opaque image ref.
    async fn save(&self, task_id: &str, page: u32, bytes: &[u8]) -> Result<String>;

    /// Loads the bytes behind an image ref.
    async fn load(&self, image_ref: &str) -> Result<Vec<u8>>;
}

/// In-memory image store.
#[derive(Default)]
pub struct MemoryImageStore {
    images: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    counter: AtomicU64,
}

impl MemoryImageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn save(&self, task_id: &str, page: u32, bytes: &[u8]) -> Result<String> {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let image_ref = format!("{task_id}_page_{page:03}_{counter}.png");
        self.images
            .write()
            .await
            .insert(image_ref.clone(), bytes.to_vec());
        Ok(image_ref)
    }

    async fn load(&self, image_ref: &str) -> Result<Vec<u8>> {
        self.images
            .read()
            .await
            .get(image_ref)
            .cloned()
            .ok_or_else(|| crate::error::EngineError::storage(format!("unknown image ref: {image_ref}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip_and_unique_refs() {
        let store = MemoryImageStore::new();
        let first = store.save("t", 1, &[1, 2]).await.unwrap();
        let second = store.save("t", 1, &[3, 4]).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.load(&second).await.unwrap(), vec![3, 4]);
        assert!(store.load("missing").await.is_err());
    }

    #[tokio::test]
    async fn concurrent_saves_never_collide() {
        let store = Arc::new(MemoryImageStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.save("t", 1, &[0]).await.unwrap()
            }));
        }
        let mut refs = std::collections::HashSet::new();
        for handle in handles {
            assert!(refs.insert(handle.await.unwrap()));
        }
    }

    #[test]
    fn noop_compressor_passes_through() {
        let bytes = vec![7u8; 32];
        assert_eq!(NoopCompressor.compress(&bytes, 1), bytes);
    }
}
