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

//! Validated LLM responses

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

use super::wrapper::EvalWrapper;
use crate::helpers::{format_dict, normalize_string};

/// Validity state of an evaluation, decided once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "Wrong Requirement Evaluated")]
    WrongRequirement,
    #[serde(rename = "No Proposed Requirement given")]
    NoProposal,
    #[serde(rename = "Wrong Format")]
    FormatError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::Ok => "ok",
            ErrorKind::WrongRequirement => "Wrong Requirement Evaluated",
            ErrorKind::NoProposal => "No Proposed Requirement given",
            ErrorKind::FormatError => "Wrong Format",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub info: Option<String>,
}

/// Raw LLM output wrapped against the response contract of an [`EvalWrapper`]
#[derive(Debug, Clone)]
pub struct Evaluation {
    content: Value,
    error: EvaluationError,
    wrapper: EvalWrapper,
}

impl Evaluation {
    pub(crate) fn new(content: Value, input_requirement: Option<&str>, wrapper: EvalWrapper) -> Self {
        let error = Self::check(&content, input_requirement, &wrapper);
        Self {
            content,
            error,
            wrapper,
        }
    }

    fn check(content: &Value, input_requirement: Option<&str>, wrapper: &EvalWrapper) -> EvaluationError {
        if let Err(info) = wrapper.format_shape().check(content) {
            return EvaluationError {
                kind: ErrorKind::FormatError,
                info: Some(info),
            };
        }
        if let Some(input) = input_requirement.filter(|s| !s.is_empty()) {
            let evaluated = content.get("requirement").and_then(Value::as_str);
            if evaluated.map(normalize_string) != Some(normalize_string(input)) {
                return EvaluationError {
                    kind: ErrorKind::WrongRequirement,
                    info: None,
                };
            }
        }
        let kind = if wrapper.signals_no_proposal(content) {
            ErrorKind::NoProposal
        } else {
            ErrorKind::Ok
        };
        EvaluationError { kind, info: None }
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn into_content(self) -> Value {
        self.content
    }

    pub fn error(&self) -> &EvaluationError {
        &self.error
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    pub fn wrapper(&self) -> &EvalWrapper {
        &self.wrapper
    }

    /// Field of the wrapped content
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Correct format and the requested requirement was evaluated
    pub fn is_valid(&self) -> bool {
        matches!(self.error.kind, ErrorKind::Ok | ErrorKind::NoProposal)
    }

    /// Valid and an improved requirement was proposed
    pub fn is_complete(&self) -> bool {
        self.error.kind == ErrorKind::Ok
    }

    /// Compute the rating; wrappers may store derived ratings back into the content.
    pub fn parse_rating(&mut self) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        self.wrapper.rate(&mut self.content)
    }

    /// The proposed requirement when complete, otherwise `content[default]` when valid.
    pub fn get_proposed_requirement(&self, default: Option<&str>) -> Option<String> {
        if self.is_complete() {
            return self.wrapper.extract_proposal(&self.content);
        }
        match default {
            Some(key) if self.is_valid() => self.get(key).and_then(value_text),
            _ => None,
        }
    }

    /// Content together with its validation status
    pub fn to_record(&self) -> Value {
        json!({
            "message": self.content,
            "error": self.error,
        })
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_dict(&self.to_record(), false))
    }
}

impl Serialize for Evaluation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;
    use serde_json::json;

    const REQ: &str = "The system shall export reports as PDF.";

    fn metric_content(proposal: Value) -> Value {
        json!({
            "requirement": REQ,
            "rating": 2,
            "justification": "PDF version is not specified.",
            "proposed_requirement": proposal
        })
    }

    #[test]
    fn test_ok_evaluation() {
        let mut eval = EvalWrapper::metric().wrap(
            metric_content(json!("The system shall export reports as PDF/A-2b.")),
            Some(REQ),
        );
        assert_eq!(eval.kind(), ErrorKind::Ok);
        assert!(eval.is_valid());
        assert!(eval.is_complete());
        assert_eq!(eval.parse_rating(), Some(2.0));
        assert_eq!(
            eval.get_proposed_requirement(None).as_deref(),
            Some("The system shall export reports as PDF/A-2b.")
        );
    }

    #[test]
    fn test_wrong_requirement_is_case_and_punctuation_insensitive() {
        let eval = EvalWrapper::metric().wrap(
            metric_content(json!("better")),
            Some("the system shall export reports as pdf"),
        );
        assert_eq!(eval.kind(), ErrorKind::Ok);

        let mut eval = EvalWrapper::metric().wrap(
            metric_content(json!("better")),
            Some("The system shall import reports."),
        );
        assert_eq!(eval.kind(), ErrorKind::WrongRequirement);
        assert!(!eval.is_valid());
        assert_eq!(eval.parse_rating(), None);
        assert_eq!(eval.get_proposed_requirement(Some("requirement")), None);
    }

    #[test]
    fn test_format_error_names_missing_key() {
        let eval = EvalWrapper::metric().wrap(
            json!({"requirement": REQ, "justification": "x"}),
            Some(REQ),
        );
        assert_eq!(eval.kind(), ErrorKind::FormatError);
        assert_eq!(
            eval.error().info.as_deref(),
            Some("Key rating not found at top_level")
        );
    }

    #[test]
    fn test_format_check_runs_before_identity_check() {
        let eval = EvalWrapper::metric().wrap(json!({"requirement": "other"}), Some(REQ));
        assert_eq!(eval.kind(), ErrorKind::FormatError);
    }

    #[test]
    fn test_no_proposal_variants() {
        for proposal in [json!(null), json!(""), json!("No proposal needed.")] {
            let eval = EvalWrapper::metric().wrap(metric_content(proposal), Some(REQ));
            assert_eq!(eval.kind(), ErrorKind::NoProposal);
            assert!(eval.is_valid());
            assert!(!eval.is_complete());
            assert_eq!(
                eval.get_proposed_requirement(Some("requirement")).as_deref(),
                Some(REQ)
            );
            assert_eq!(eval.get_proposed_requirement(None), None);
        }

        let mut content = metric_content(json!(null));
        content.as_object_mut().unwrap().remove("proposed_requirement");
        let eval = EvalWrapper::metric().wrap(content, Some(REQ));
        assert_eq!(eval.kind(), ErrorKind::NoProposal);
    }

    #[test]
    fn test_without_input_requirement_skips_identity_check() {
        let eval = EvalWrapper::metric().wrap(metric_content(json!("better")), None);
        assert!(eval.is_complete());
        let eval = EvalWrapper::metric().wrap(metric_content(json!("better")), Some(""));
        assert!(eval.is_complete());
    }

    #[test]
    fn test_record_serialization() {
        let eval = EvalWrapper::general(vec![Metric::Atomicity]).wrap(json!("rate limited"), None);
        let record = serde_json::to_value(&eval).unwrap();
        assert_eq!(record["message"], "rate limited");
        assert_eq!(record["error"]["type"], "Wrong Format");
        assert_eq!(record["error"]["info"], "Expected dict, got str at top_level");
        assert!(eval.to_string().contains("\"Wrong Format\""));
    }
}
