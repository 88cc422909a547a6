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

//! Caching wrapper for LLM clients

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    cache::{generate_cache_key, Cache},
    errors::LlmResult,
    llm::{models::Message, LlmClient},
};

/// Wrapper that adds caching to any LlmClient implementation
///
/// Responses are keyed on the active schema and the sent messages. A cache
/// hit does not reach the inner client, so its conversation memory is not
/// extended.
pub struct CachedLlmClient {
    inner: Arc<dyn LlmClient>,
    cache: Arc<dyn Cache>,
    schema: RwLock<Option<Value>>,
}

impl CachedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, cache: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            cache,
            schema: RwLock::new(None),
        }
    }

    async fn invoke_cache_key(&self, messages: &[Message]) -> String {
        let messages_str = serde_json::to_string(messages).unwrap_or_default();
        let schema_str = self
            .schema
            .read()
            .await
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        generate_cache_key(&["invoke", &schema_str, &messages_str])
    }
}

#[async_trait]
impl LlmClient for CachedLlmClient {
    async fn invoke(&self, messages: &[Message]) -> LlmResult<Value> {
        let cache_key = self.invoke_cache_key(messages).await;

        if let Ok(Some(cached_bytes)) = self.cache.get(&cache_key).await {
            if let Ok(cached_response) = serde_json::from_slice::<Value>(&cached_bytes) {
                debug!("Cache hit for {}", cache_key);
                return Ok(cached_response);
            }
        }

        let response = self.inner.invoke(messages).await?;

        if let Ok(serialized) = serde_json::to_vec(&response) {
            let _ = self.cache.set(&cache_key, serialized).await;
        }

        Ok(response)
    }

    async fn reset_memory(&self) {
        self.inner.reset_memory().await;
    }

    async fn update_schema(&self, schema: Option<Value>) {
        *self.schema.write().await = schema.clone();
        self.inner.update_schema(schema).await;
    }
}
