//! Pipeline configuration.
//!
//! Every tunable lives here with a serde default, so a bare checkout runs
//! without any file and a `guanxi.toml` at the project root overrides only
//! what it names.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub wiki: WikiSettings,
    pub freshness: FreshnessConfig,
    pub sampling: SamplingConfig,
    pub audit: AuditConfig,
    pub maintenance: MaintenanceConfig,
    pub llm: LlmSettings,
}

impl PipelineConfig {
    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let config = toml::from_str(&raw)
                    .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
                info!(path = %path.display(), "loaded configuration");
                Ok(config)
            }
            Err(_) => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Locations of every persisted artifact, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub list_file: PathBuf,
    pub processed_log: PathBuf,
    pub master_graph: PathBuf,
    pub cache_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            list_file: PathBuf::from("data/LIST.md"),
            processed_log: PathBuf::from("data/processed_files.log"),
            master_graph: PathBuf::from("docs/master_graph_qcode.json"),
            cache_dir: PathBuf::from(".cache"),
            prompts_dir: PathBuf::from("prompts"),
        }
    }
}

/// Wiki pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiSettings {
    /// Leaky-bucket rate for all wiki calls.
    pub requests_per_minute: u32,
    /// Concurrent in-flight request cap.
    pub max_inflight: usize,
}

impl Default for WikiSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 180,
            max_inflight: 32,
        }
    }
}

/// Re-extraction policy for watch-list entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// No re-extraction at all within this many days.
    pub prob_start_day: i64,
    /// Past this age, re-extraction is unconditional (if wiki changed).
    pub prob_end_day: i64,
    /// Probability at the start of the ramp.
    pub prob_start_value: f64,
    /// Probability at the end of the ramp.
    pub prob_end_value: f64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            prob_start_day: 7,
            prob_end_day: 30,
            prob_start_value: 1.0 / 12.0,
            prob_end_value: 0.9,
        }
    }
}

/// Weight curve for one weighted-sampling pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleWeights {
    pub min_weight: f64,
    pub max_weight: f64,
    pub exponent: f64,
}

impl Default for SampleWeights {
    fn default() -> Self {
        Self {
            min_weight: 1.0,
            max_weight: 4.0,
            exponent: 2.0,
        }
    }
}

/// Run-size bounds and the two sampling passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Universe size for the freshness pre-screen.
    pub max_items_to_check: usize,
    /// Items actually extracted per run.
    pub max_items_per_run: usize,
    /// First pass: narrow the universe.
    pub screen_weights: SampleWeights,
    /// Second pass: order the eligible subset.
    pub order_weights: SampleWeights,
    /// Concurrent freshness checks.
    pub screen_concurrency: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_items_to_check: 1000,
            max_items_per_run: 100,
            screen_weights: SampleWeights::default(),
            order_weights: SampleWeights {
                min_weight: 1.0,
                max_weight: 8.0,
                exponent: 3.0,
            },
            screen_concurrency: 32,
        }
    }
}

/// Single-relation LLM audit knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Relations sampled per run.
    pub sample_size: usize,
    /// Cache entries younger than this are skipped outright.
    pub skip_days: i64,
    /// Start of the probabilistic re-check zone.
    pub prob_start_days: i64,
    /// End of the zone; older entries are always candidates.
    pub prob_end_days: i64,
    pub prob_start_value: f64,
    pub prob_end_value: f64,
    /// Relations audited concurrently per batch.
    pub batch_size: usize,
    /// Retry rounds for transient failures.
    pub max_rounds: u32,
    /// Cooldown between rounds, seconds.
    pub cooldown_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sample_size: 400,
            skip_days: 30,
            prob_start_days: 30,
            prob_end_days: 90,
            prob_start_value: 0.1,
            prob_end_value: 0.9,
            batch_size: 30,
            max_rounds: 20,
            cooldown_secs: 30,
        }
    }
}

/// Deep-maintenance bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Q-code nodes refreshed per run.
    pub master_graph_update_limit: usize,
    /// Watch-list entries refreshed per run.
    pub list_update_limit: usize,
    /// Concurrent lookups in the refresh steps.
    pub max_workers: usize,
    /// Link-status cache entries older than this are dropped.
    pub link_cache_max_age_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            master_graph_update_limit: 300,
            list_update_limit: 300,
            max_workers: 32,
            link_cache_max_age_days: 30,
        }
    }
}

/// One model slot's budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBudget {
    pub model: String,
    pub rpm: usize,
    pub rpd: Option<u32>,
}

/// LLM models and budgets per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub parser: ModelBudget,
    pub merge_check: ModelBudget,
    pub merge_execute: ModelBudget,
    pub relation_audit: ModelBudget,
    pub validate_pr: ModelBudget,
    pub few_shot_nodes: usize,
    pub few_shot_rels: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            parser: ModelBudget {
                model: "gemini-2.5-pro".to_string(),
                rpm: 5,
                rpd: Some(113),
            },
            merge_check: ModelBudget {
                model: "gemma-3-27b-it".to_string(),
                rpm: 30,
                rpd: Some(16_200),
            },
            merge_execute: ModelBudget {
                model: "gemini-2.5-flash".to_string(),
                rpm: 10,
                rpd: Some(281),
            },
            relation_audit: ModelBudget {
                model: "gemini-2.5-flash-lite".to_string(),
                rpm: 15,
                rpd: Some(1_125),
            },
            validate_pr: ModelBudget {
                model: "gemini-2.5-flash".to_string(),
                rpm: 10,
                rpd: Some(281),
            },
            few_shot_nodes: 24,
            few_shot_rels: 12,
        }
    }
}
