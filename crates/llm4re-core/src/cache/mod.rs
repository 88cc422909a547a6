/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Response cache
//!
//! Byte-level cache used by [`crate::llm::CachedLlmClient`] to skip repeated
//! LLM calls for identical prompts.

pub mod memory_cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Llm4ReResult;

pub use memory_cache::MemoryCache;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default TTL for cache entries
    pub default_ttl: Duration,
    /// Maximum total size of the cached values in bytes
    pub max_size: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_size: Some(1024 * 1024 * 100),
        }
    }
}

/// Trait for cache implementations
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Llm4ReResult<Option<Vec<u8>>>;

    /// Set a value in the cache with the configured TTL
    async fn set(&self, key: &str, value: Vec<u8>) -> Llm4ReResult<()>;
}

/// Generate a cache key from components
pub fn generate_cache_key(components: &[&str]) -> String {
    use sha2::{Digest, Sha256};

    let combined = components.join("|");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_cache_key() {
        let key1 = generate_cache_key(&["invoke", "", "[1]"]);
        let key2 = generate_cache_key(&["invoke", "", "[2]"]);
        let key3 = generate_cache_key(&["invoke", "", "[1]"]);

        assert_ne!(key1, key2);
        assert_eq!(key1, key3);
        assert_eq!(key1.len(), 64);
    }
}
