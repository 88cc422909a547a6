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

//! Batch evaluation of requirement datasets
//!
//! Outputs are JSON files of the form
//! `{"failed_generations": n, "rating_scale": s, "<evaluations|judgements>": [...]}`.
//! A run resumes after the entries and failures already recorded in its
//! output file and always persists what it produced, even when it stops early.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, instrument, warn};

use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::evaluation::{EvalWrapper, Evaluation, JudgementKeys};
use crate::generation::ResponseGenerator;
use crate::helpers::format_dict;
use crate::metrics::Metric;

pub const DEFAULT_RECURSION_LIMIT: usize = 2;
pub const DEFAULT_RATING_SCALE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalType {
    Evaluations,
    Judgements,
}

impl EvalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalType::Evaluations => "evaluations",
            EvalType::Judgements => "judgements",
        }
    }

    /// Wrapper used to re-read stored entries
    fn wrapper(&self) -> EvalWrapper {
        match self {
            EvalType::Evaluations => EvalWrapper::general_all(),
            EvalType::Judgements => EvalWrapper::GeneralJudgement {
                metrics: Metric::ALL.to_vec(),
                keys: JudgementKeys::Assessment,
            },
        }
    }
}

impl FromStr for EvalType {
    type Err = Llm4ReError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evaluations" => Ok(EvalType::Evaluations),
            "judgements" => Ok(EvalType::Judgements),
            other => Err(Llm4ReError::InvalidInput(format!("unknown evaluation type: {}", other))),
        }
    }
}

impl fmt::Display for EvalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn model_file_part(model: &str) -> String {
    model.replace(['-', '.'], "_")
}

/// `<approach>_evaluations_of_<dataset>_by_<model>`
pub fn evaluations_file_name(dataset: &str, model: &str, approach: &str) -> String {
    format!(
        "{}_evaluations_of_{}_by_{}",
        approach,
        dataset,
        model_file_part(model)
    )
}

/// `<judge_approach>_judgements_of_<evaluations file name>`
pub fn judgements_file_name(
    dataset: &str,
    model: &str,
    approach: &str,
    judge_approach: &str,
) -> String {
    format!(
        "{}_judgements_of_{}",
        judge_approach,
        evaluations_file_name(dataset, model, approach)
    )
}

/// Contents of a dataset output file
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetOutput {
    pub eval_type: EvalType,
    pub failed_generations: usize,
    pub rating_scale: u32,
    pub entries: Vec<Value>,
}

impl DatasetOutput {
    pub fn new(eval_type: EvalType, rating_scale: u32) -> Self {
        Self {
            eval_type,
            failed_generations: 0,
            rating_scale,
            entries: Vec::new(),
        }
    }

    /// Number of inputs already handled, successfully or not
    pub fn processed(&self) -> usize {
        self.entries.len() + self.failed_generations
    }

    pub fn from_value(value: &Value, eval_type: EvalType) -> Llm4ReResult<Self> {
        let entries = value
            .get(eval_type.as_str())
            .and_then(Value::as_array)
            .ok_or_else(|| Llm4ReError::InvalidInput(format!("output file has no {} list", eval_type)))?
            .clone();
        Ok(Self {
            eval_type,
            failed_generations: value
                .get("failed_generations")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize,
            rating_scale: value
                .get("rating_scale")
                .and_then(Value::as_u64)
                .map_or(DEFAULT_RATING_SCALE, |s| s as u32),
            entries,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut value = Map::new();
        value.insert("failed_generations".to_string(), json!(self.failed_generations));
        value.insert("rating_scale".to_string(), json!(self.rating_scale));
        value.insert(self.eval_type.as_str().to_string(), Value::Array(self.entries.clone()));
        Value::Object(value)
    }

    pub fn load(path: &Path, eval_type: EvalType) -> Llm4ReResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_value(&serde_json::from_str(&text)?, eval_type)
    }

    /// The stored output at `path`, or an empty one when there is none yet
    pub fn load_or_new(path: &Path, eval_type: EvalType, rating_scale: u32) -> Llm4ReResult<Self> {
        if path.exists() {
            Self::load(path, eval_type)
        } else {
            Ok(Self::new(eval_type, rating_scale))
        }
    }

    pub fn save(&self, path: &Path) -> Llm4ReResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format_dict(&self.to_value(), false))?;
        Ok(())
    }
}

/// Parameters of one batch run
#[derive(Debug, Clone)]
pub struct DatasetRun {
    pub eval_type: EvalType,
    pub output_path: PathBuf,
    /// Exclusive upper bound on the inputs to process
    pub stop_idx: Option<usize>,
    pub rating_scale: u32,
    /// Extra attempts for an invalid generation
    pub recursion_limit: usize,
}

impl DatasetRun {
    pub fn new(eval_type: EvalType, output_path: impl Into<PathBuf>) -> Self {
        Self {
            eval_type,
            output_path: output_path.into(),
            stop_idx: None,
            rating_scale: DEFAULT_RATING_SCALE,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    pub fn with_stop_idx(mut self, stop_idx: Option<usize>) -> Self {
        self.stop_idx = stop_idx;
        self
    }

    pub fn with_recursion_limit(mut self, recursion_limit: usize) -> Self {
        self.recursion_limit = recursion_limit;
        self
    }

    pub fn with_rating_scale(mut self, rating_scale: u32) -> Self {
        self.rating_scale = rating_scale;
        self
    }
}

/// Outcome of a batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    pub generated: usize,
    pub failed: usize,
    pub total_failed: usize,
    /// Error that stopped the batch early
    pub aborted: Option<String>,
    /// The batch stopped on a provider failure; running it again resumes it
    pub resumable: bool,
}

/// Requirements for evaluation runs, stored evaluations for judgement runs
pub async fn evaluate_dataset(
    generator: &ResponseGenerator,
    inputs: &[Value],
    run: &DatasetRun,
) -> Llm4ReResult<DatasetSummary> {
    let mut output = DatasetOutput::load_or_new(&run.output_path, run.eval_type, run.rating_scale)?;
    let summary = process_inputs(generator, inputs, run, &mut output).await;
    info!(
        path = %run.output_path.display(),
        entries = output.entries.len(),
        "Saving {}",
        run.eval_type
    );
    output.save(&run.output_path)?;
    Ok(summary)
}

#[instrument(skip_all, fields(eval_type = %run.eval_type))]
async fn process_inputs(
    generator: &ResponseGenerator,
    inputs: &[Value],
    run: &DatasetRun,
    output: &mut DatasetOutput,
) -> DatasetSummary {
    let start = output.processed();
    let stop = run.stop_idx.map_or(inputs.len(), |s| s.min(inputs.len()));
    let pending = inputs.get(start..stop).unwrap_or_default();
    info!(start, stop, "Processing {} inputs", pending.len());

    let mut summary = DatasetSummary {
        generated: 0,
        failed: 0,
        total_failed: output.failed_generations,
        aborted: None,
        resumable: false,
    };
    for (offset, input) in pending.iter().enumerate() {
        let index = start + offset;
        match generate_entry(generator, input, run).await {
            Ok(Some(entry)) => {
                output.entries.push(entry);
                summary.generated += 1;
                info!("Generated {} {}/{}", run.eval_type, index + 1, stop);
            }
            Ok(None) => {
                output.failed_generations += 1;
                summary.failed += 1;
                warn!(
                    "No valid generation for input {} after {} attempts",
                    index + 1,
                    run.recursion_limit + 1
                );
            }
            Err(e) => {
                if e.is_transient() {
                    error!("Provider unavailable at input {}, stopping batch: {}", index + 1, e);
                } else {
                    error!("Stopping batch at input {}: {}", index + 1, e);
                }
                summary.resumable = e.is_transient();
                summary.aborted = Some(e.to_string());
                break;
            }
        }
    }
    summary.total_failed = output.failed_generations;
    info!(
        generated = summary.generated,
        "Failed generations: {}", summary.total_failed
    );
    summary
}

async fn generate_entry(generator: &ResponseGenerator, input: &Value, run: &DatasetRun) -> Llm4ReResult<Option<Value>> {
    for attempt in 0..=run.recursion_limit {
        let entry = match run.eval_type {
            EvalType::Evaluations => {
                let requirement = input
                    .as_str()
                    .ok_or_else(|| Llm4ReError::InvalidInput(format!("requirement must be a string, got {}", input)))?;
                let evaluation = generator.generate(requirement).await?;
                valid_content(evaluation)
            }
            EvalType::Judgements => {
                let stored = EvalWrapper::general_all().wrap(input.clone(), None);
                let judgement = generator.judge(stored).await?;
                valid_content(judgement).map(|mut content| {
                    if let Some(fields) = content.as_object_mut() {
                        fields.insert(
                            "overall_requirement_rating".to_string(),
                            input.get("overall_rating").cloned().unwrap_or(Value::Null),
                        );
                    }
                    content
                })
            }
        };
        if entry.is_some() {
            return Ok(entry);
        }
        if attempt < run.recursion_limit {
            warn!("Invalid generation, retrying (attempt {})", attempt + 2);
        }
    }
    Ok(None)
}

fn valid_content(evaluation: Evaluation) -> Option<Value> {
    evaluation.is_valid().then(|| evaluation.into_content())
}

/// Re-wrap the stored entries of `path` and refresh their computed ratings.
///
/// Returns the number of entries whose rating could be computed.
pub fn reparse_ratings(path: &Path, eval_type: EvalType) -> Llm4ReResult<usize> {
    let mut output = DatasetOutput::load(path, eval_type)?;
    let wrapper = eval_type.wrapper();
    let mut rated = 0;
    output.entries = output
        .entries
        .into_iter()
        .map(|entry| {
            let mut evaluation = wrapper.wrap(entry, None);
            if evaluation.parse_rating().is_some() {
                rated += 1;
            }
            evaluation.into_content()
        })
        .collect();
    info!(path = %path.display(), rated, "Reparsed ratings");
    output.save(path)?;
    Ok(rated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorSettings;
    use crate::errors::LlmError;
    use crate::evaluator::Evaluator;
    use crate::llm::MockLlmClient;
    use crate::store::InMemoryTemplateStore;
    use mockall::Sequence;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn answer(requirement: &str) -> Value {
        let evaluation: Map<String, Value> = Metric::ALL
            .iter()
            .map(|m| (m.name().to_string(), json!({"rating": m.offset(), "comment": "ok"})))
            .collect();
        json!({
            "requirement": requirement,
            "evaluation": evaluation,
            "proposed_requirement": {"text": format!("{} (improved)", requirement), "justification": "clearer"}
        })
    }

    fn generator(llm: MockLlmClient) -> ResponseGenerator {
        let store = InMemoryTemplateStore::builtin().unwrap();
        let settings = EvaluatorSettings::default().with_n_shots(0);
        ResponseGenerator::new(Evaluator::new(Arc::new(llm), Arc::new(store), settings))
    }

    fn requirements(n: usize) -> Vec<Value> {
        (1..=n).map(|i| json!(format!("Requirement {}", i))).collect()
    }

    #[test]
    fn test_eval_type_names() {
        assert_eq!("judgements".parse::<EvalType>().unwrap(), EvalType::Judgements);
        assert_eq!(EvalType::Evaluations.to_string(), "evaluations");
        assert!("ratings".parse::<EvalType>().is_err());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            evaluations_file_name("PROMISE", "llama-3.3-70b", "basic"),
            "basic_evaluations_of_PROMISE_by_llama_3_3_70b"
        );
        assert_eq!(
            judgements_file_name("PROMISE", "gpt-4o", "basic", "judge_chain"),
            "judge_chain_judgements_of_basic_evaluations_of_PROMISE_by_gpt_4o"
        );
    }

    #[test]
    fn test_output_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.json");
        let mut output = DatasetOutput::new(EvalType::Judgements, 5);
        output.failed_generations = 2;
        output.entries.push(json!({"a": 1}));
        output.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"failed_generations\": 2"));
        let loaded = DatasetOutput::load_or_new(&path, EvalType::Judgements, 5).unwrap();
        assert_eq!(loaded, output);
        assert_eq!(loaded.processed(), 3);
        assert!(DatasetOutput::load(&path, EvalType::Evaluations).is_err());
    }

    #[tokio::test]
    async fn test_retries_then_counts_failure() {
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        let mut seq = Sequence::new();
        // first input: invalid twice, then valid
        llm.expect_invoke().times(2).in_sequence(&mut seq).returning(|_| Ok(json!("not json")));
        llm.expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(answer("Requirement 1")));
        // second input: never valid
        llm.expect_invoke()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_| Ok(answer("Something else")));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let run = DatasetRun::new(EvalType::Evaluations, &path);
        let summary = evaluate_dataset(&generator(llm), &requirements(2), &run).await.unwrap();

        assert_eq!(summary.generated, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.aborted, None);
        assert!(!summary.resumable);
        let output = DatasetOutput::load(&path, EvalType::Evaluations).unwrap();
        assert_eq!(output.failed_generations, 1);
        assert_eq!(output.entries.len(), 1);
        assert_eq!(output.entries[0]["requirement"], "Requirement 1");
        assert!(output.entries[0].get("overall_rating").is_some());
    }

    #[tokio::test]
    async fn test_transient_error_stops_and_saves() {
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        let mut seq = Sequence::new();
        llm.expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(answer("Requirement 1")));
        llm.expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LlmError::RateLimit));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let run = DatasetRun::new(EvalType::Evaluations, &path);
        let summary = evaluate_dataset(&generator(llm), &requirements(3), &run).await.unwrap();
        assert_eq!(summary.generated, 1);
        assert!(summary.aborted.is_some());
        assert!(summary.resumable);

        let output = DatasetOutput::load(&path, EvalType::Evaluations).unwrap();
        assert_eq!(output.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_resumable() {
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        llm.expect_invoke().times(1).returning(|_| {
            Err(LlmError::Authentication {
                message: "bad key".to_string(),
            })
        });

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let run = DatasetRun::new(EvalType::Evaluations, &path);
        let summary = evaluate_dataset(&generator(llm), &requirements(2), &run).await.unwrap();
        assert_eq!(summary.generated, 0);
        assert!(summary.aborted.is_some());
        assert!(!summary.resumable);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_resumes_after_processed_inputs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let mut existing = DatasetOutput::new(EvalType::Evaluations, 5);
        existing.entries.push(answer("Requirement 1"));
        existing.failed_generations = 1;
        existing.save(&path).unwrap();

        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        llm.expect_invoke()
            .times(1)
            .returning(|_| Ok(answer("Requirement 3")));

        let run = DatasetRun::new(EvalType::Evaluations, &path).with_stop_idx(Some(3));
        let summary = evaluate_dataset(&generator(llm), &requirements(5), &run).await.unwrap();
        assert_eq!(summary.generated, 1);
        assert_eq!(summary.total_failed, 1);

        let output = DatasetOutput::load(&path, EvalType::Evaluations).unwrap();
        assert_eq!(output.processed(), 3);
        assert_eq!(output.entries[1]["requirement"], "Requirement 3");
    }

    #[tokio::test]
    async fn test_judgement_run_carries_overall_rating() {
        let mut judge_llm = MockLlmClient::new();
        judge_llm.expect_update_schema().returning(|_| ());
        judge_llm.expect_invoke().times(1).returning(|_| {
            let evaluation: Map<String, Value> = Metric::ALL
                .iter()
                .map(|m| (format!("Assessment_of_{}_Evaluation", m), json!({"rating": 4})))
                .collect();
            Ok(json!({
                "original_requirement": "Requirement 1",
                "evaluation": evaluation,
                "Assessment_of_proposed_requirement": {"rating": 4}
            }))
        });
        let store = Arc::new(InMemoryTemplateStore::builtin().unwrap());
        let judge = Evaluator::new(Arc::new(judge_llm), store.clone(), EvaluatorSettings::judge());
        let generator = ResponseGenerator::new(Evaluator::new(
            Arc::new(MockLlmClient::new()),
            store,
            EvaluatorSettings::default(),
        ))
        .with_judge(judge, None);

        let mut stored = answer("Requirement 1");
        stored["overall_rating"] = json!(0.7);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("judgements.json");
        let run = DatasetRun::new(EvalType::Judgements, &path);
        let summary = evaluate_dataset(&generator, &[stored], &run).await.unwrap();
        assert_eq!(summary.generated, 1);

        let output = DatasetOutput::load(&path, EvalType::Judgements).unwrap();
        assert_eq!(output.entries[0]["overall_requirement_rating"], 0.7);
        assert_eq!(output.entries[0]["overall_evaluation_rating"], 0.75);
    }

    #[test]
    fn test_reparse_ratings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let mut output = DatasetOutput::new(EvalType::Evaluations, 5);
        output.entries.push(answer("R"));
        output.entries.push(json!({"broken": true}));
        output.failed_generations = 4;
        output.save(&path).unwrap();

        assert_eq!(reparse_ratings(&path, EvalType::Evaluations).unwrap(), 1);
        let reparsed = DatasetOutput::load(&path, EvalType::Evaluations).unwrap();
        assert_eq!(reparsed.failed_generations, 4);
        assert!(reparsed.entries[0].get("overall_rating").is_some());
        assert_eq!(reparsed.entries[1], json!({"broken": true}));
    }
}
