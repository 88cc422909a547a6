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

//! The seven requirement quality metrics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::Llm4ReError;

/// Prefix used when metric names are presented as requirement qualities
pub const METRIC_PREFIX: &str = "Requirement ";

/// A fixed quality dimension a requirement is rated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Correctness,
    Unambiguity,
    Completeness,
    Consistency,
    Precision,
    Verifiability,
    Atomicity,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Correctness,
        Metric::Unambiguity,
        Metric::Completeness,
        Metric::Consistency,
        Metric::Precision,
        Metric::Verifiability,
        Metric::Atomicity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Correctness => "Correctness",
            Metric::Unambiguity => "Unambiguity",
            Metric::Completeness => "Completeness",
            Metric::Consistency => "Consistency",
            Metric::Precision => "Precision",
            Metric::Verifiability => "Verifiability",
            Metric::Atomicity => "Atomicity",
        }
    }

    /// Acceptable rating on the 1-5 scale; the zero point for normalization.
    pub fn offset(&self) -> i64 {
        match self {
            Metric::Correctness => 5,
            Metric::Unambiguity => 4,
            Metric::Completeness => 3,
            Metric::Consistency => 5,
            Metric::Precision => 3,
            Metric::Verifiability => 4,
            Metric::Atomicity => 3,
        }
    }

    /// "Requirement Atomicity" style display name
    pub fn wrapped(&self) -> String {
        format!("{}{}", METRIC_PREFIX, self.name())
    }

    pub fn unwrap_name(wrapped: &str) -> Result<Metric, Llm4ReError> {
        wrapped.replace(METRIC_PREFIX, "").parse()
    }

    pub fn all_except(excluded: &[Metric]) -> Vec<Metric> {
        Self::ALL
            .iter()
            .filter(|m| !excluded.contains(m))
            .copied()
            .collect()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Llm4ReError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| Llm4ReError::UnknownMetric(s.to_string()))
    }
}
