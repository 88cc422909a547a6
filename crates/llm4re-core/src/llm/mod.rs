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

//! LLM collaborator
//!
//! Evaluators talk to models through the [`LlmClient`] trait. The bundled
//! implementation speaks the OpenAI chat-completions protocol, which Groq,
//! Anthropic and OpenAI all expose.

pub mod cached;
pub mod client;
pub mod config;
pub mod models;
pub mod openai_client;

pub use cached::CachedLlmClient;
pub use client::{BaseLlmClient, ConversationMemory, LlmClient};
#[cfg(test)]
pub use client::MockLlmClient;
pub use config::{LlmConfig, LlmProvider};
pub use models::{Message, Role};
pub use openai_client::OpenAiClient;
