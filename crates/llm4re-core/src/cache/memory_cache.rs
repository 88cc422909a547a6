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

//! In-memory cache implementation using moka

use async_trait::async_trait;
use moka::future::Cache as MokaCache;

use crate::cache::{Cache, CacheConfig};
use crate::errors::Llm4ReResult;

/// In-memory cache; entries expire after the configured TTL and the total
/// size of the values is bounded by `max_size`
pub struct MemoryCache {
    cache: MokaCache<String, Vec<u8>>,
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        let builder = MokaCache::builder().time_to_live(config.default_ttl);
        let cache = match config.max_size {
            Some(max_size) => builder
                .weigher(|_key: &String, value: &Vec<u8>| u32::try_from(value.len()).unwrap_or(u32::MAX))
                .max_capacity(max_size)
                .build(),
            None => builder.build(),
        };
        Self { cache }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Llm4ReResult<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Llm4ReResult<()> {
        self.cache.insert(key.to_string(), value).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_cache_get_set() {
        let cache = MemoryCache::new(CacheConfig::default());

        let key = "prompt_key";
        let value = br#"{"rating": 3}"#.to_vec();

        assert_eq!(cache.get(key).await.unwrap(), None);
        cache.set(key, value.clone()).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_memory_cache_ttl() {
        let cache = MemoryCache::new(CacheConfig {
            default_ttl: Duration::from_millis(50),
            max_size: None,
        });

        let key = "ttl_key";
        let value = b"ttl_value".to_vec();
        cache.set(key, value.clone()).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some(value));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get(key).await.unwrap(), None);
    }
}
