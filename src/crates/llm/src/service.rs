//! The façade over every LLM call the pipeline makes.

use crate::error::{LlmError, Result};
use crate::few_shot;
use crate::model::{GenerateRequest, TextModel};
use graph::{load_master_graph, Fragment, Node, Relationship};
use ratelimit::{ApiRateLimiter, RateLimitError};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Fields that identify an item rather than describe it. They are stripped
/// before anything is shown to a model and re-imposed afterwards, so a
/// model can never rename or re-point an item.
const IDENTITY_KEYS: &[&str] = &["id", "name", "source", "target"];

/// Longest diff excerpt shown to the PR validator.
const MAX_DIFF_CHARS: usize = 15_000;

/// One task's model plus its private rate limiter.
pub struct ModelSlot {
    model: Arc<dyn TextModel>,
    limiter: ApiRateLimiter,
}

impl ModelSlot {
    pub fn new(model: Arc<dyn TextModel>, limiter: ApiRateLimiter) -> Self {
        Self { model, limiter }
    }

    /// Acquire the limiter; `Ok(false)` means the daily quota is spent.
    async fn admit(&self) -> bool {
        match self.limiter.acquire().await {
            Ok(()) => true,
            Err(RateLimitError::DailyQuotaExceeded { name, limit }) => {
                warn!(model = %name, limit, "daily quota exhausted, skipping call");
                false
            }
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let result = self.model.generate(request).await;
        self.limiter.record_result(result.is_ok()).await;
        result
    }
}

/// The five task slots the service runs on.
pub struct ServiceModels {
    pub parser: ModelSlot,
    pub merge_check: ModelSlot,
    pub merge_execute: ModelSlot,
    pub relation_audit: ModelSlot,
    pub validate_pr: ModelSlot,
}

/// Prompt templates, one file per task.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub parser_system: String,
    pub merge_check: String,
    pub merge_execute: String,
    pub relation_audit: String,
    pub validate_pr: String,
}

impl PromptSet {
    /// Load all templates from a directory; any missing file is a
    /// configuration error.
    pub fn load(dir: &Path) -> Result<Self> {
        let read = |file: &str| -> Result<String> {
            std::fs::read_to_string(dir.join(file))
                .map_err(|e| LlmError::ConfigError(format!("prompt '{file}' unreadable: {e}")))
        };
        Ok(Self {
            parser_system: read("parser_system.txt")?,
            merge_check: read("merge_check.txt")?,
            merge_execute: read("merge_execute.txt")?,
            relation_audit: read("relation_audit.txt")?,
            validate_pr: read("validate_pr.txt")?,
        })
    }
}

/// Outcome of a single-relation audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditVerdict {
    /// The model judged the relation wrong; delete it.
    Delete,
    /// The model judged the relation sound; refresh the false-relations
    /// cache entry.
    Keep,
    /// Transient failure; requeue for a later round.
    Unavailable,
    /// Daily budget gone; leave the relation untouched and do not cache.
    QuotaExhausted,
}

/// Unified service fronting all LLM interactions.
pub struct LlmService {
    models: ServiceModels,
    prompts: PromptSet,
    master_graph_path: PathBuf,
    few_shot_nodes: usize,
    few_shot_rels: usize,
}

impl LlmService {
    pub fn new(
        models: ServiceModels,
        prompts: PromptSet,
        master_graph_path: impl Into<PathBuf>,
        few_shot_nodes: usize,
        few_shot_rels: usize,
    ) -> Self {
        Self {
            models,
            prompts,
            master_graph_path: master_graph_path.into(),
            few_shot_nodes,
            few_shot_rels,
        }
    }

    /// Extract entities and relationships from wikitext. `None` on any
    /// failure; the caller skips the item and the run continues.
    pub async fn parse_wikitext(&self, wikitext: &str) -> Option<Fragment> {
        if !self.models.parser.admit().await {
            return None;
        }

        let mut prompt = String::new();
        let graph = load_master_graph(&self.master_graph_path);
        if let Some(examples) = few_shot::build_examples(
            &graph,
            self.few_shot_nodes,
            self.few_shot_rels,
            &mut rand::thread_rng(),
        ) {
            info!(
                nodes = self.few_shot_nodes,
                relationships = self.few_shot_rels,
                "injecting few-shot samples into parser prompt"
            );
            prompt.push_str(&examples);
        }
        prompt.push_str(
            "\nFollow your core instructions and extract entities and \
             relationships from the wikitext below.\n--- WIKITEXT START ---\n",
        );
        prompt.push_str(wikitext);
        prompt.push_str("\n--- WIKITEXT END ---");

        let request = GenerateRequest::new(prompt)
            .with_system(self.prompts.parser_system.clone())
            .expect_json();
        match self.models.parser.generate(request).await {
            Ok(text) => match serde_json::from_str::<Fragment>(strip_code_fences(&text)) {
                Ok(fragment) => Some(fragment),
                Err(e) => {
                    warn!(error = %e, "parser returned unparseable JSON");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "wikitext parse call failed");
                None
            }
        }
    }

    /// Ask whether `new` adds information worth merging into `existing`.
    /// Defaults to `true` on quota exhaustion or failure so data is never
    /// silently discarded.
    pub async fn should_merge(&self, existing: &Value, new: &Value) -> bool {
        if !self.models.merge_check.admit().await {
            return true;
        }
        let prompt = format!(
            "{}\n--- EXISTING OBJECT ---\n{}\n--- NEW OBJECT ---\n{}\n\
             --- Does the new object add meaningful information? (answer YES or NO) ---",
            self.prompts.merge_check,
            pretty_without_identity(existing),
            pretty_without_identity(new),
        );
        match self.models.merge_check.generate(GenerateRequest::new(prompt)).await {
            Ok(text) => text.trim().eq_ignore_ascii_case("yes"),
            Err(e) => {
                warn!(error = %e, "merge check failed, defaulting to merge");
                true
            }
        }
    }

    /// Merge `new` into `existing`, returning the combined item. Identity
    /// fields always come from `existing`; on any failure the existing item
    /// is returned unchanged.
    pub async fn merge_items(&self, existing: &Value, new: &Value, kind: &str) -> Value {
        if !self.models.merge_execute.admit().await {
            return existing.clone();
        }
        let prompt = format!(
            "--- EXISTING {kind} ---\n{}\n--- NEW {kind} ---\n{}\n--- MERGED JSON ---\n",
            pretty_without_identity(existing),
            pretty_without_identity(new),
        );
        let request = GenerateRequest::new(prompt)
            .with_system(self.prompts.merge_execute.clone())
            .expect_json();
        match self.models.merge_execute.generate(request).await {
            Ok(text) => match serde_json::from_str::<Value>(strip_code_fences(&text)) {
                Ok(Value::Object(mut merged)) => {
                    for key in IDENTITY_KEYS {
                        merged.remove(*key);
                    }
                    let mut result = existing.clone();
                    if let Some(obj) = result.as_object_mut() {
                        for (k, v) in merged {
                            obj.insert(k, v);
                        }
                    }
                    result
                }
                _ => {
                    warn!("merge call returned non-object JSON, keeping existing");
                    existing.clone()
                }
            },
            Err(e) => {
                warn!(error = %e, "merge call failed, keeping existing");
                existing.clone()
            }
        }
    }

    /// Judge one relationship. The relation is shown with its endpoints
    /// rewritten to `name (Type: X)` so the model sees entities, not IDs.
    pub async fn audit_relation(
        &self,
        relation: &Relationship,
        nodes: &HashMap<String, &Node>,
    ) -> AuditVerdict {
        if !self.models.relation_audit.admit().await {
            return AuditVerdict::QuotaExhausted;
        }

        let describe = |id: &str| -> String {
            match nodes.get(id) {
                Some(node) => format!("{} (Type: {})", node.primary_name(), node.node_type),
                None => id.to_string(),
            }
        };
        let mut shown = serde_json::to_value(relation).unwrap_or_default();
        if let Some(obj) = shown.as_object_mut() {
            obj.insert("source".into(), Value::String(describe(&relation.source)));
            obj.insert("target".into(), Value::String(describe(&relation.target)));
        }

        let prompt = format!(
            "{}\n{}",
            self.prompts.relation_audit,
            serde_json::to_string_pretty(&shown).unwrap_or_default()
        );
        match self
            .models
            .relation_audit
            .generate(GenerateRequest::new(prompt))
            .await
        {
            Ok(text) => {
                let decision = text.trim().to_uppercase();
                if decision.contains("FALSE") {
                    AuditVerdict::Keep
                } else if decision.contains("TRUE") {
                    AuditVerdict::Delete
                } else {
                    warn!(raw = %text, "audit response was not TRUE/FALSE");
                    AuditVerdict::Unavailable
                }
            }
            Err(e) => {
                warn!(error = %e, "relation audit call failed");
                AuditVerdict::Unavailable
            }
        }
    }

    /// Evaluate a PR diff. `Some(true)` means the change looks legitimate.
    pub async fn validate_pr_diff(&self, diff: &str, file_name: &str) -> Option<bool> {
        if !self.models.validate_pr.admit().await {
            return None;
        }
        let truncated: String = diff.chars().take(MAX_DIFF_CHARS).collect();
        let prompt = self
            .prompts
            .validate_pr
            .replace("{file_name}", file_name)
            .replace("{diff_content}", &truncated);
        match self
            .models
            .validate_pr
            .generate(GenerateRequest::new(prompt))
            .await
        {
            Ok(text) => match text.trim() {
                "True" => Some(true),
                "False" => Some(false),
                other => {
                    warn!(raw = %other, "PR validation response was not True/False");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "PR validation call failed");
                None
            }
        }
    }
}

/// Serialize an item for a prompt with identity fields removed.
fn pretty_without_identity(item: &Value) -> String {
    let mut copy = item.clone();
    if let Some(obj) = copy.as_object_mut() {
        for key in IDENTITY_KEYS {
            obj.remove(*key);
        }
    }
    serde_json::to_string_pretty(&copy).unwrap_or_default()
}

/// Models sometimes wrap JSON in markdown fences despite the MIME hint.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
