//! In-memory [`KvStore`] backed by `dashmap`.
//!
//! Each key lives in its own shard slot, so the entry API gives per-key
//! atomicity for `cmp_and_swap` without a global lock.

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};

use super::kv::KvStore;
use crate::errors::Result;

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<(String, String), Vec<u8>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(bucket: &str, key: &str) -> (String, String) {
        (bucket.to_string(), key.to_string())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&Self::slot(bucket, key)).map(|v| v.value().clone()))
    }

    async fn set(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(Self::slot(bucket, key), value.to_vec());
        Ok(())
    }

    async fn cmp_and_swap(
        &self,
        bucket: &str,
        key: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool> {
        let swapped = match self.entries.entry(Self::slot(bucket, key)) {
            Entry::Occupied(mut entry) => match old {
                Some(expected) if entry.get().as_slice() == expected => {
                    entry.insert(new.to_vec());
                    true
                }
                _ => false,
            },
            Entry::Vacant(entry) => {
                if old.is_none() {
                    entry.insert(new.to_vec());
                    true
                } else {
                    false
                }
            }
        };
        Ok(swapped)
    }

    async fn list(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out: Vec<(String, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == bucket)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.entries.remove(&Self::slot(bucket, key));
        Ok(())
    }
}
