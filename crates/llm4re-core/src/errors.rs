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

use thiserror::Error;

/// Base error type for llm4re operations
#[derive(Debug, Error)]
pub enum Llm4ReError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Prompt template {name} not found")]
    TemplateNotFound { name: String },

    #[error("Static few-shot set {name} not found")]
    StaticExamplesNotFound { name: String },

    #[error("No {kind} description version {version} for metric {metric}")]
    MetricDescriptionNotFound {
        metric: String,
        kind: String,
        version: usize,
    },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Retrieval error: {message}")]
    Retrieval { message: String },

    #[error("Invalid previous-output selector: {message}")]
    InvalidSelector { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Evaluation chain has no links")]
    EmptyChain,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Llm4ReError {
    /// Provider failures that may succeed on a later run
    pub fn is_transient(&self) -> bool {
        matches!(self, Llm4ReError::Llm(e) if e.is_transient())
    }
}

/// LLM-specific error types
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimit,

    #[error("LLM server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("LLM refused to generate a response: {message}")]
    Refusal { message: String },

    #[error("LLM returned an empty response: {message}")]
    EmptyResponse { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },
}

impl LlmError {
    /// Failures of the provider infrastructure rather than of a single request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimit
                | LlmError::ServerError { .. }
                | LlmError::Http(_)
                | LlmError::Timeout { .. }
                | LlmError::NetworkError { .. }
        )
    }
}

/// Result type alias for llm4re operations
pub type Llm4ReResult<T> = Result<T, Llm4ReError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;
