use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Keyed cache of serialized query responses. Identical questions skip the
/// whole plan/retrieve/generate pipeline until the entry is evicted.
pub struct ResponseCache {
    entries: DashMap<String, String>,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    pub fn get(&self, question: &str) -> Option<String> {
        self.entries.get(&hash_key(question)).map(|r| r.value().clone())
    }

    pub fn set(&self, question: &str, response: String) {
        if self.entries.len() >= self.max_entries {
            // Simple eviction: clear a quarter when full.
            let to_remove: Vec<_> = self
                .entries
                .iter()
                .take(self.max_entries / 4)
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(hash_key(question), response);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
        }
    }
}

fn hash_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub entries: usize,
}
