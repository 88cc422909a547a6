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

//! Multi-step evaluation chains
//!
//! A chain is a sequence of [`ChainLink`]s run against one evaluator. Every
//! link sees the outputs of the links before it through its
//! [`PrevOutputSelector`], and a reducer folds all outputs into the final
//! evaluation.

#[allow(clippy::module_inception)]
pub mod chain;
pub mod implementations;
pub mod link;

pub use chain::{EvaluationChain, Reducer};
pub use implementations::EvaluationChainKind;
pub use link::{ChainLink, ChainLinkOutput, InputTransform, OutputFilter, PrevOutputSelector};
