//! Content-addressed image blob store (§6). Files are named by their
//! SHA-256 hash with reference-count semantics: `save` is idempotent by
//! hash and bumps the refcount; `remove_reference` drops it and deletes
//! the blob once the count reaches zero.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores `bytes` under its SHA-256 hash, returning that hash. Calling
    /// this again with identical bytes only bumps the reference count.
    async fn save(&self, bytes: Vec<u8>) -> Vec<u8>;

    /// Drops one reference to `hash`; deletes the blob once the count
    /// reaches zero. A no-op if `hash` is unknown (already-deleted images
    /// are dereferenced defensively by callers during rollback).
    async fn remove_reference(&self, hash: &[u8]);

    async fn get(&self, hash: &[u8]) -> Option<Vec<u8>>;
}

#[derive(Default)]
pub struct InMemoryImageStore {
    blobs: Mutex<HashMap<Vec<u8>, (Vec<u8>, u32)>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn save(&self, bytes: Vec<u8>) -> Vec<u8> {
        let hash = Sha256::digest(&bytes).to_vec();
        let mut blobs = self.blobs.lock();
        blobs.entry(hash.clone()).and_modify(|(_, refcount)| *refcount += 1).or_insert((bytes, 1));
        hash
    }

    async fn remove_reference(&self, hash: &[u8]) {
        let mut blobs = self.blobs.lock();
        if let Some((_, refcount)) = blobs.get_mut(hash) {
            *refcount -= 1;
            if *refcount == 0 {
                blobs.remove(hash);
            }
        }
    }

    async fn get(&self, hash: &[u8]) -> Option<Vec<u8>> {
        self.blobs.lock().get(hash).map(|(bytes, _)| bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_is_idempotent_by_hash() {
        let store = InMemoryImageStore::new();
        let h1 = store.save(vec![1, 2, 3]).await;
        let h2 = store.save(vec![1, 2, 3]).await;
        assert_eq!(h1, h2);
        store.remove_reference(&h1).await;
        // One reference remains.
        assert!(store.get(&h1).await.is_some());
        store.remove_reference(&h1).await;
        assert!(store.get(&h1).await.is_none());
    }
}
