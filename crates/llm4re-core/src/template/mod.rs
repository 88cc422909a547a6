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

//! Prompt templates
//!
//! Templates are markdown files with delimited sections that are repeated per
//! metric, per example or per prior chain output, and a user-prompt section
//! that separates the user message from the system message.

pub mod expand;
pub mod processor;
pub mod sections;

pub use expand::{expand, process_variables, Variables};
pub use processor::{
    escape_curly_braces, normalize_newlines, process_chain_context_section, process_one_shot_section,
    rating_expression, render_prompt, split_user_prompt, PromptParts, TemplateContext, TemplateProcessor,
};
pub use sections::{get_sections, process_section, remove_comments, Section, SectionKind};
