// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the DICOM ingestion
//! pipeline (spec.md §6).
//!
//! [`IngestConfig`] is resolved in priority order: (1) `INGEST_CONFIG_JSON`
//! — the full config inline as JSON, (2) `INGEST_CONFIG_PATH` — a path to a
//! TOML file, (3) built-in defaults. Individual scalar environment
//! variables are then applied as overrides on top of whichever of the
//! three produced the base config, before validation runs.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file named by `INGEST_CONFIG_PATH` does not exist.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The TOML file could not be parsed.
    #[error("failed to parse config toml: {reason}")]
    TomlParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// The `INGEST_CONFIG_JSON` env var did not contain valid JSON for the
    /// config schema.
    #[error("failed to parse config json: {reason}")]
    JsonParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more hard errors).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve
/// attention (spec.md §6/§4.4 step 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No summarization model is configured; summarization will simply be
    /// unavailable for long SR/PDF text, per spec.md §4.4 step 3.
    SummarizationModelUnset,
    /// A retry timeout budget is unusually large.
    LargeRetryBudget {
        /// Which upstream this tuning applies to (`"embedding"` or
        /// `"summarization"`).
        upstream: String,
        /// Computed worst-case wall time in milliseconds.
        worst_case_ms: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::SummarizationModelUnset => {
                write!(f, "no summarization model configured; summarization is unavailable")
            }
            ConfigWarning::LargeRetryBudget {
                upstream,
                worst_case_ms,
            } => write!(
                f,
                "{upstream} retry budget has a large worst-case wall time ({worst_case_ms}ms)"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// GCP project/location identity (spec.md §6 `gcpConfig`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GcpConfig {
    /// Project id. Required — validated as a hard error if empty.
    #[serde(default)]
    pub project_id: String,
    /// GCP region/location for regional services (e.g. Vertex AI).
    #[serde(default)]
    pub location: String,
}

/// BigQuery dataset/table identity (spec.md §6 `bigQuery`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct BigQueryConfig {
    /// Dataset id. Required.
    #[serde(default)]
    pub dataset_id: String,
    /// Ingestion table id within the dataset. Required.
    #[serde(default)]
    pub instances_table_id: String,
}

/// Vector embedding model configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct VectorConfig {
    /// Multimodal embedding model id.
    #[serde(default)]
    pub model: String,
}

/// Summarization model configuration (spec.md §4.4 step 3).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SummarizeTextConfig {
    /// Summarization model id. `None` means summarization is disabled —
    /// extracted text longer than `max_length` is then left unembedded
    /// rather than failing the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Text length above which summarization is attempted, when a model is
    /// configured (spec.md §4.4 step 3 default: 1024).
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_max_length() -> usize {
    1024
}

impl Default for SummarizeTextConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_length: default_max_length(),
        }
    }
}

/// Embedding-input configuration: where uploaded artifacts land, and the
/// vector/summarization model selection (spec.md §6 `embedding.input`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EmbeddingInputConfig {
    /// GCS bucket path root for processed-data artifact uploads
    /// (`{study}/{series}/{instance}.jpg` lands under this root).
    #[serde(default)]
    pub gcs_bucket_path: String,
    /// Multimodal vector embedding model.
    #[serde(default)]
    pub vector: VectorConfig,
    /// Text summarization model, used when extracted text exceeds
    /// `max_length`.
    #[serde(default)]
    pub summarize_text: SummarizeTextConfig,
}

/// Retry tuning for a single upstream call (spec.md §6 "retry tuning").
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RetryTuning {
    /// Maximum number of retry attempts after the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay, in milliseconds, for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryTuning {
    /// Worst-case wall time across all attempts, ignoring jitter (used
    /// only to flag suspiciously large configured budgets).
    pub fn worst_case_wall_ms(&self) -> u64 {
        let mut total: u64 = 0;
        for k in 1..=self.max_retries {
            total = total.saturating_add(self.base_delay_ms.saturating_mul(1u64 << (k - 1).min(32)));
        }
        total
    }
}

/// Top-level runtime configuration for the DICOM ingestion pipeline
/// (spec.md §6).
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct IngestConfig {
    /// GCP project/location.
    #[serde(default)]
    pub gcp: GcpConfig,
    /// BigQuery dataset/table identity.
    #[serde(default)]
    pub big_query: BigQueryConfig,
    /// Embedding-input configuration.
    #[serde(default)]
    pub embedding: EmbeddingInputConfig,
    /// Retry tuning for the Embedding Client (spec.md §4.5).
    #[serde(default)]
    pub embedding_retry: RetryTuning,
    /// Retry tuning for the summarization call.
    #[serde(default)]
    pub summarize_retry: RetryTuning,
    /// Verbose logging flag (spec.md §6 "debug flag").
    #[serde(default)]
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Above this worst-case wall time, `validate_config` emits a
/// [`ConfigWarning::LargeRetryBudget`].
const LARGE_RETRY_BUDGET_MS: u64 = 5 * 60 * 1000;

/// Env var holding the full config inline as JSON (highest priority).
pub const ENV_CONFIG_JSON: &str = "INGEST_CONFIG_JSON";
/// Env var naming a TOML file to load (second priority).
pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Resolve an [`IngestConfig`] following spec.md §6's priority order:
/// `INGEST_CONFIG_JSON` env var, then `INGEST_CONFIG_PATH` env var (a TOML
/// file), then built-in defaults. Scalar env var overrides are applied on
/// top regardless of which source produced the base config.
pub fn load_config() -> Result<IngestConfig, ConfigError> {
    let mut config = if let Ok(json) = std::env::var(ENV_CONFIG_JSON) {
        parse_json(&json)?
    } else if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        load_toml_file(Path::new(&path))?
    } else {
        IngestConfig::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Loads a TOML file from disk.
pub fn load_toml_file(path: &Path) -> Result<IngestConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    parse_toml(&content)
}

/// Parses a TOML string into an [`IngestConfig`].
pub fn parse_toml(content: &str) -> Result<IngestConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
        reason: e.to_string(),
    })
}

/// Parses a JSON string into an [`IngestConfig`].
pub fn parse_json(content: &str) -> Result<IngestConfig, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::JsonParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Applies scalar environment variable overrides (spec.md §6), independent
/// of which source produced the base config.
///
/// Recognised variables:
/// - `INGEST_GCP_PROJECT_ID`
/// - `INGEST_DEBUG` (`"true"`/`"1"` enables)
/// - `INGEST_RETRY_MAX_RETRIES` / `INGEST_RETRY_BASE_DELAY_MS` (embedding)
/// - `INGEST_SUMMARIZE_MAX_RETRIES` / `INGEST_SUMMARIZE_BASE_DELAY_MS`
pub fn apply_env_overrides(config: &mut IngestConfig) {
    if let Ok(val) = std::env::var("INGEST_GCP_PROJECT_ID") {
        config.gcp.project_id = val;
    }
    if let Ok(val) = std::env::var("INGEST_DEBUG") {
        config.debug = matches!(val.as_str(), "1" | "true" | "TRUE" | "yes");
    }
    if let Ok(val) = std::env::var("INGEST_RETRY_MAX_RETRIES")
        && let Ok(n) = val.parse()
    {
        config.embedding_retry.max_retries = n;
    }
    if let Ok(val) = std::env::var("INGEST_RETRY_BASE_DELAY_MS")
        && let Ok(n) = val.parse()
    {
        config.embedding_retry.base_delay_ms = n;
    }
    if let Ok(val) = std::env::var("INGEST_SUMMARIZE_MAX_RETRIES")
        && let Ok(n) = val.parse()
    {
        config.summarize_retry.max_retries = n;
    }
    if let Ok(val) = std::env::var("INGEST_SUMMARIZE_BASE_DELAY_MS")
        && let Ok(n) = val.parse()
    {
        config.summarize_retry.base_delay_ms = n;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates a resolved configuration, returning advisory warnings.
///
/// Hard errors: missing `gcp.project_id`, `big_query.dataset_id`, or
/// `big_query.instances_table_id` (spec.md §6). Soft warnings: an unset
/// summarization model, or a retry budget whose worst-case wall time is
/// unusually large.
pub fn validate_config(config: &IngestConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.gcp.project_id.trim().is_empty() {
        errors.push("gcp.project_id must not be empty".into());
    }
    if config.big_query.dataset_id.trim().is_empty() {
        errors.push("bigQuery.datasetId must not be empty".into());
    }
    if config.big_query.instances_table_id.trim().is_empty() {
        errors.push("bigQuery.instancesTableId must not be empty".into());
    }

    if config.embedding.summarize_text.model.is_none() {
        warnings.push(ConfigWarning::SummarizationModelUnset);
    }

    for (upstream, tuning) in [
        ("embedding", &config.embedding_retry),
        ("summarization", &config.summarize_retry),
    ] {
        let worst_case = tuning.worst_case_wall_ms();
        if worst_case > LARGE_RETRY_BUDGET_MS {
            warnings.push(ConfigWarning::LargeRetryBudget {
                upstream: upstream.to_string(),
                worst_case_ms: worst_case,
            });
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in this process;
    // serialize the handful of tests that touch process env.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn valid_config() -> IngestConfig {
        IngestConfig {
            gcp: GcpConfig {
                project_id: "proj".into(),
                location: "us-central1".into(),
            },
            big_query: BigQueryConfig {
                dataset_id: "ds".into(),
                instances_table_id: "instances".into(),
            },
            embedding: EmbeddingInputConfig {
                gcs_bucket_path: "gs://bucket/processed".into(),
                vector: VectorConfig {
                    model: "multimodalembedding@001".into(),
                },
                summarize_text: SummarizeTextConfig {
                    model: Some("text-bison".into()),
                    max_length: 1024,
                },
            },
            embedding_retry: RetryTuning::default(),
            summarize_retry: RetryTuning::default(),
            debug: false,
        }
    }

    #[test]
    fn default_config_fails_hard_validation() {
        let cfg = IngestConfig::default();
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("project_id")));
                assert!(reasons.iter().any(|r| r.contains("datasetId")));
                assert!(reasons.iter().any(|r| r.contains("instancesTableId")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn valid_config_passes_with_no_summarization_warning() {
        let mut cfg = valid_config();
        cfg.embedding.summarize_text.model = None;
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.contains(&ConfigWarning::SummarizationModelUnset));
    }

    #[test]
    fn valid_config_with_summarization_model_has_no_summarization_warning() {
        let cfg = valid_config();
        let warnings = validate_config(&cfg).unwrap();
        assert!(!warnings.contains(&ConfigWarning::SummarizationModelUnset));
    }

    #[test]
    fn retry_tuning_defaults_match_spec() {
        let tuning = RetryTuning::default();
        assert_eq!(tuning.max_retries, 4);
        assert_eq!(tuning.base_delay_ms, 500);
    }

    #[test]
    fn large_retry_budget_produces_warning() {
        let mut cfg = valid_config();
        cfg.embedding_retry = RetryTuning {
            max_retries: 20,
            base_delay_ms: 60_000,
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::LargeRetryBudget { upstream, .. } if upstream == "embedding")));
    }

    #[test]
    fn parse_toml_round_trips_nested_structure() {
        let toml_str = r#"
            [gcp]
            project_id = "proj"
            location = "us-central1"

            [big_query]
            dataset_id = "ds"
            instances_table_id = "instances"

            [embedding]
            gcs_bucket_path = "gs://bucket/processed"

            [embedding.vector]
            model = "multimodalembedding@001"

            [embedding.summarize_text]
            model = "text-bison"
            max_length = 2048
        "#;
        let cfg = parse_toml(toml_str).unwrap();
        assert_eq!(cfg.gcp.project_id, "proj");
        assert_eq!(cfg.embedding.summarize_text.max_length, 2048);
        assert_eq!(
            cfg.embedding.summarize_text.model.as_deref(),
            Some("text-bison")
        );
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
    }

    #[test]
    fn parse_json_round_trips() {
        let json = serde_json::to_string(&valid_config()).unwrap();
        let cfg = parse_json(&json).unwrap();
        assert_eq!(cfg, valid_config());
    }

    #[test]
    fn parse_invalid_json_gives_parse_error() {
        let err = parse_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::JsonParseError { .. }));
    }

    #[test]
    fn load_toml_file_missing_gives_file_not_found() {
        let err = load_toml_file(Path::new("/nonexistent/ingest.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_toml_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[gcp]\nproject_id = \"p\"").unwrap();
        let cfg = load_toml_file(&path).unwrap();
        assert_eq!(cfg.gcp.project_id, "p");
    }

    #[test]
    fn env_override_sets_project_id_and_debug() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("INGEST_GCP_PROJECT_ID", "from-env");
        std::env::set_var("INGEST_DEBUG", "true");
        let mut cfg = IngestConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.gcp.project_id, "from-env");
        assert!(cfg.debug);
        std::env::remove_var("INGEST_GCP_PROJECT_ID");
        std::env::remove_var("INGEST_DEBUG");
    }

    #[test]
    fn env_override_sets_retry_tuning() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("INGEST_RETRY_MAX_RETRIES", "10");
        std::env::set_var("INGEST_RETRY_BASE_DELAY_MS", "250");
        let mut cfg = IngestConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.embedding_retry.max_retries, 10);
        assert_eq!(cfg.embedding_retry.base_delay_ms, 250);
        std::env::remove_var("INGEST_RETRY_MAX_RETRIES");
        std::env::remove_var("INGEST_RETRY_BASE_DELAY_MS");
    }

    #[test]
    fn load_config_prefers_json_over_path_env_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        let json = serde_json::to_string(&valid_config()).unwrap();
        std::env::set_var(ENV_CONFIG_JSON, &json);
        std::env::set_var(ENV_CONFIG_PATH, "/should/not/be/read.toml");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.gcp.project_id, "proj");
        std::env::remove_var(ENV_CONFIG_JSON);
        std::env::remove_var(ENV_CONFIG_PATH);
    }

    #[test]
    fn load_config_falls_back_to_defaults_with_no_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(ENV_CONFIG_JSON);
        std::env::remove_var(ENV_CONFIG_PATH);
        std::env::remove_var("INGEST_GCP_PROJECT_ID");
        let cfg = load_config().unwrap();
        assert_eq!(cfg, IngestConfig::default());
    }
}
