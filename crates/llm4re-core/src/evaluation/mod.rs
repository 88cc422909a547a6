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

//! Evaluation validator and response contracts
//!
//! Raw LLM output is wrapped into an [`Evaluation`] whose validity state is
//! decided once, from a structural check against the wrapper's declared
//! [`Shape`], an identity check of the evaluated requirement and the
//! wrapper's no-proposal rule.

pub mod evaluation;
pub mod shape;
pub mod wrapper;

pub use evaluation::{ErrorKind, Evaluation, EvaluationError};
pub use shape::Shape;
pub use wrapper::{EvalWrapper, JudgementKeys};
