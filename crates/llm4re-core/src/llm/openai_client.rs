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
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::client::{parse_content, BaseLlmClient, ConversationMemory, LlmClient};
use super::config::LlmConfig;
use super::models::{Message, TokenUsage};
use crate::errors::{LlmError, LlmResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SCHEMA_NAME: &str = "EvaluationSchema";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

/// What a single HTTP round trip produced
enum Reply {
    Content(String),
    /// Error text of a rejected request, handed on as the response payload
    Rejected(String),
}

impl Reply {
    fn into_payload(self) -> Value {
        match self {
            Reply::Content(content) => parse_content(&content),
            Reply::Rejected(error_text) => Value::String(error_text),
        }
    }
}

/// Outcome of a non-success HTTP status. A rejected request is handed on as
/// its error text; everything else is an infrastructure failure.
fn reply_for_error_status(status: StatusCode, error_text: String) -> LlmResult<Reply> {
    match status {
        StatusCode::BAD_REQUEST => Ok(Reply::Rejected(error_text)),
        StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimit),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::Authentication {
            message: format!("HTTP {} - {}", status, error_text),
        }),
        s if s.is_server_error() => Err(LlmError::ServerError {
            status: s.as_u16(),
            message: error_text,
        }),
        s => Err(LlmError::NetworkError {
            message: format!("HTTP {} - {}", s, error_text),
        }),
    }
}

/// Client for OpenAI-compatible chat completion endpoints (Groq, Anthropic, OpenAI)
pub struct OpenAiClient {
    base_client: BaseLlmClient,
    http_client: Client,
    api_key: String,
    memory: ConversationMemory,
    schema: RwLock<Option<Value>>,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| LlmError::Authentication {
            message: format!("API key for {} is required", config.provider),
        })?;

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            memory: ConversationMemory::new(config.memory_size),
            base_client: BaseLlmClient::new(config),
            http_client,
            api_key,
            schema: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.base_client.config
    }

    async fn response_format(&self) -> Option<Value> {
        if !self.config().structured_output {
            return None;
        }
        match self.schema.read().await.as_ref() {
            Some(schema) => Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_SCHEMA_NAME),
                    "schema": schema
                }
            })),
            None => Some(json!({"type": "json_object"})),
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> LlmResult<Reply> {
        let url = format!("{}/chat/completions", self.config().resolved_base_url());

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        message: e.to_string(),
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST {
                warn!("Request rejected by {}: {}", self.config().provider, error_text);
            }
            return reply_for_error_status(status, error_text);
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| LlmError::NetworkError {
            message: format!("Failed to parse JSON response: {}", e),
        })?;
        if let Some(usage) = &chat_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Token usage"
            );
        }

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyResponse {
                message: "No choices in response".to_string(),
            })?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LlmError::Refusal { message: refusal });
        }

        let content = choice.message.content.ok_or_else(|| LlmError::EmptyResponse {
            message: format!(
                "No content in response (finish reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            ),
        })?;
        Ok(Reply::Content(content))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(&self, messages: &[Message]) -> LlmResult<Value> {
        let prompt = self.base_client.prepare_messages(messages);
        let mut conversation = self.memory.history().await;
        conversation.extend(prompt.iter().cloned());

        let request = ChatRequest {
            model: self.config().model_name(),
            messages: &conversation,
            temperature: self.config().temperature,
            max_tokens: self.config().max_tokens,
            response_format: self.response_format().await,
        };
        debug!(
            model = request.model,
            messages = conversation.len(),
            "Sending chat completion request"
        );

        let reply = self.base_client.execute_with_retry(|| self.send(&request)).await?;
        if let Reply::Content(content) = &reply {
            self.memory.record(&prompt, Message::assistant(content.clone())).await;
        }
        Ok(reply.into_payload())
    }

    async fn reset_memory(&self) {
        self.memory.clear().await;
    }

    async fn update_schema(&self, schema: Option<Value>) {
        *self.schema.write().await = schema;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{ErrorKind, EvalWrapper};
    use crate::llm::config::LlmProvider;

    fn client(structured_output: bool) -> OpenAiClient {
        OpenAiClient::new(
            LlmConfig::new()
                .with_provider(LlmProvider::Groq)
                .with_api_key("test-key".to_string())
                .with_structured_output(structured_output),
        )
        .unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            OpenAiClient::new(LlmConfig::new()),
            Err(LlmError::Authentication { .. })
        ));
    }

    #[tokio::test]
    async fn test_response_format_follows_schema() {
        let client = client(true);
        assert_eq!(
            client.response_format().await,
            Some(json!({"type": "json_object"}))
        );

        client
            .update_schema(Some(json!({"title": "EvaluationSchema", "type": "object"})))
            .await;
        let format = client.response_format().await.unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "EvaluationSchema");
        assert_eq!(format["json_schema"]["schema"]["type"], "object");
    }

    #[test]
    fn test_bad_request_becomes_format_error_payload() {
        let reply = reply_for_error_status(StatusCode::BAD_REQUEST, "json_validate_failed".to_string()).unwrap();
        let payload = reply.into_payload();
        assert_eq!(payload, json!("json_validate_failed"));

        let evaluation = EvalWrapper::metric().wrap(payload, Some("R"));
        assert_eq!(evaluation.kind(), ErrorKind::FormatError);
    }

    #[test]
    fn test_error_status_mapping() {
        assert!(matches!(
            reply_for_error_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            Err(LlmError::RateLimit)
        ));
        assert!(matches!(
            reply_for_error_status(StatusCode::SERVICE_UNAVAILABLE, "down".to_string()),
            Err(LlmError::ServerError { status: 503, .. })
        ));
        assert!(matches!(
            reply_for_error_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            Err(LlmError::ServerError { status: 500, .. })
        ));
        assert!(matches!(
            reply_for_error_status(StatusCode::UNAUTHORIZED, String::new()),
            Err(LlmError::Authentication { .. })
        ));
        assert!(matches!(
            reply_for_error_status(StatusCode::NOT_FOUND, String::new()),
            Err(LlmError::NetworkError { .. })
        ));
    }

    #[test]
    fn test_content_payload_is_parsed() {
        let payload = Reply::Content("{\"rating\": 4}".to_string()).into_payload();
        assert_eq!(payload, json!({"rating": 4}));
    }

    #[tokio::test]
    async fn test_plain_output_has_no_response_format() {
        let client = client(false);
        client.update_schema(Some(json!({"type": "object"}))).await;
        assert_eq!(client.response_format().await, None);
    }
}
