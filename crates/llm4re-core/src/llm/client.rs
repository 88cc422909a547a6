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

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, warn};

use super::config::LlmConfig;
use super::models::Message;
use crate::errors::{LlmError, LlmResult};

/// The LLM collaborator used by evaluators
///
/// `invoke` may return an error-shaped payload instead of failing; callers
/// validate whatever comes back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the messages and return the parsed response content
    async fn invoke(&self, messages: &[Message]) -> LlmResult<Value>;

    /// Forget the conversation history
    async fn reset_memory(&self);

    /// Switch the structured-output schema; `None` falls back to plain JSON mode
    async fn update_schema(&self, schema: Option<Value>);
}

/// Shared plumbing for HTTP-backed clients
pub struct BaseLlmClient {
    pub config: LlmConfig,
}

impl BaseLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// Clean input string of invalid unicode and control characters
    pub fn clean_input(&self, input: &str) -> String {
        let zero_width_chars = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}', '\u{2060}'];
        input
            .chars()
            .filter(|c| !zero_width_chars.contains(c))
            .filter(|&c| (c as u32) >= 32 || c == '\n' || c == '\r' || c == '\t')
            .collect()
    }

    pub fn prepare_messages(&self, messages: &[Message]) -> Vec<Message> {
        messages
            .iter()
            .map(|m| Message {
                role: m.role,
                content: self.clean_input(&m.content),
            })
            .collect()
    }

    /// Retry transport failures with exponential backoff.
    ///
    /// Rate limits and server errors are returned at once so that batch runs
    /// can stop and persist their progress.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> LlmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        let retry_strategy = ExponentialBackoff::from_millis(500)
            .max_delay(Duration::from_secs(30))
            .take(3);

        let retry_condition = |error: &LlmError| {
            let retry = matches!(error, LlmError::Http(_) | LlmError::Timeout { .. });
            if retry {
                debug!("Retrying after transport error: {}", error);
            }
            retry
        };

        RetryIf::spawn(retry_strategy, operation, retry_condition)
            .await
            .map_err(|e| {
                warn!("LLM request failed: {}", e);
                e
            })
    }
}

/// Parse response text as JSON, falling back to the outermost `{...}` span
/// and finally to the raw text.
pub fn parse_content(content: &str) -> Value {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return value;
            }
        }
    }
    Value::String(content.to_string())
}

/// Sliding window over the last `size` exchanges
pub struct ConversationMemory {
    size: usize,
    exchanges: Mutex<VecDeque<Vec<Message>>>,
}

impl ConversationMemory {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            exchanges: Mutex::new(VecDeque::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Messages of the remembered exchanges, oldest first
    pub async fn history(&self) -> Vec<Message> {
        self.exchanges.lock().await.iter().flatten().cloned().collect()
    }

    pub async fn record(&self, prompt: &[Message], reply: Message) {
        if self.size == 0 {
            return;
        }
        let mut exchanges = self.exchanges.lock().await;
        let mut exchange = prompt.to_vec();
        exchange.push(reply);
        exchanges.push_back(exchange);
        while exchanges.len() > self.size {
            exchanges.pop_front();
        }
    }

    pub async fn clear(&self) {
        self.exchanges.lock().await.clear();
    }
}
