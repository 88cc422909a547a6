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

//! Retrieval-augmented example selection

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::helpers::normalize_string;
use crate::metrics::Metric;
use crate::template::process_one_shot_section;

pub const DEFAULT_N_DOCUMENTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedDocument {
    pub text: String,
    /// Position of the source record in the retrieval dataset
    pub record_id: usize,
}

/// Ranked document lookup
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Llm4ReResult<Vec<RetrievedDocument>>;
}

/// A stored evaluation dataset used as example pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalDataset {
    pub rating_scale: u32,
    pub evaluations: Vec<Value>,
}

impl RetrievalDataset {
    pub fn load(path: impl AsRef<Path>) -> Llm4ReResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Evaluated requirement of record `id`
    pub fn requirement(&self, id: usize) -> Option<&str> {
        self.evaluations.get(id)?.get("requirement")?.as_str()
    }
}

fn tokens(text: &str) -> HashSet<String> {
    normalize_string(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Ranks dataset requirements by token overlap with the query
pub struct LexicalRetriever {
    documents: Vec<(RetrievedDocument, HashSet<String>)>,
    n_documents: usize,
}

impl LexicalRetriever {
    pub fn new(dataset: &RetrievalDataset, n_documents: usize) -> Self {
        let documents = dataset
            .evaluations
            .iter()
            .enumerate()
            .filter_map(|(id, _)| {
                let requirement = dataset.requirement(id)?;
                let document = RetrievedDocument {
                    text: json!({"req": requirement, "ID": id}).to_string(),
                    record_id: id,
                };
                Some((document, tokens(requirement)))
            })
            .collect();
        Self {
            documents,
            n_documents,
        }
    }

    fn score(query: &HashSet<String>, document: &HashSet<String>) -> f64 {
        let union = query.union(document).count();
        if union == 0 {
            return 0.0;
        }
        query.intersection(document).count() as f64 / union as f64
    }
}

#[async_trait]
impl Retriever for LexicalRetriever {
    async fn retrieve(&self, query: &str) -> Llm4ReResult<Vec<RetrievedDocument>> {
        let query_tokens = tokens(query);
        let mut ranked: Vec<(f64, &RetrievedDocument)> = self
            .documents
            .iter()
            .map(|(document, doc_tokens)| (Self::score(&query_tokens, doc_tokens), document))
            .collect();
        // stable sort keeps dataset order among equal scores
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(ranked
            .into_iter()
            .take(self.n_documents)
            .map(|(_, document)| document.clone())
            .collect())
    }
}

/// Retrieves stored evaluations for a query and renders them as examples
pub struct RetrievalContext {
    dataset: RetrievalDataset,
    retriever: Arc<dyn Retriever>,
    last: Mutex<Option<(String, Vec<RetrievedDocument>)>>,
}

impl RetrievalContext {
    pub fn new(dataset: RetrievalDataset, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            dataset,
            retriever,
            last: Mutex::new(None),
        }
    }

    /// Context over `dataset` backed by a [`LexicalRetriever`]
    pub fn lexical(dataset: RetrievalDataset, n_documents: usize) -> Self {
        let retriever = Arc::new(LexicalRetriever::new(&dataset, n_documents));
        Self::new(dataset, retriever)
    }

    pub fn dataset(&self) -> &RetrievalDataset {
        &self.dataset
    }

    /// Documents for `query`, reusing the previous result when the query repeats
    pub async fn retrieve(&self, query: &str) -> Llm4ReResult<Vec<RetrievedDocument>> {
        let mut last = self.last.lock().await;
        if let Some((cached_query, documents)) = last.as_ref() {
            if cached_query == query {
                debug!("Reusing retrieved documents for repeated query");
                return Ok(documents.clone());
            }
        }
        let documents = self.retriever.retrieve(query).await?;
        *last = Some((query.to_string(), documents.clone()));
        Ok(documents)
    }

    /// Stored evaluation behind `document`: the whole record for several
    /// metrics, the single metric's entry for one.
    pub fn extract_evaluation(&self, document: &RetrievedDocument, metrics: &[Metric]) -> Llm4ReResult<Value> {
        let record = self
            .dataset
            .evaluations
            .get(document.record_id)
            .ok_or_else(|| Llm4ReError::Retrieval {
                message: format!("no record with id {}", document.record_id),
            })?;
        let evaluation = record.get("evaluation").unwrap_or(record);
        match metrics {
            [metric] => evaluation
                .get(metric.name())
                .cloned()
                .ok_or_else(|| Llm4ReError::Retrieval {
                    message: format!("record {} has no {} evaluation", document.record_id, metric),
                }),
            _ => Ok(evaluation.clone()),
        }
    }

    /// Render `one_shot` over the evaluations retrieved for `query`
    pub async fn build_context(&self, query: &str, one_shot: &str, metrics: &[Metric]) -> Llm4ReResult<String> {
        let documents = self.retrieve(query).await?;
        let examples = documents
            .iter()
            .map(|document| self.extract_evaluation(document, metrics))
            .collect::<Llm4ReResult<Vec<_>>>()?;
        debug!(examples = examples.len(), "Built retrieval context");
        Ok(process_one_shot_section(
            one_shot,
            &examples,
            self.dataset.rating_scale,
            false,
        ))
    }
}
