#![deny(unsafe_code)]
//! Daemon binary: resolves configuration, builds every client handle, and
//! serves the HTTP + WS control plane (spec.md §6, §9 "explicit dependency
//! injection at server construction").

use anyhow::{Context, Result};
use clap::Parser;
use ingest_config::{IngestConfig, RetryTuning};
use ingest_daemon::{build_app, AppState};
use ingest_dicom::{DicomProcessor, ProcessorOptions};
use ingest_embedding::{EmbeddingClient, VertexEmbeddingClient};
use ingest_objectstore::{GcsObjectStore, ObjectStoreClient};
use ingest_pipeline::Pipeline;
use ingest_protocol::CorrelationSecret;
use ingest_retry::RetryConfig;
use ingest_warehouse::{BigQueryWarehouse, TableRef, WarehouseClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ingest-daemon", version, about = "DICOM ingestion pipeline daemon")]
struct Args {
    /// Bind address for the HTTP + WS control plane.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Loopback base URL the WS multiplex layer proxies actions to. Only
    /// needs overriding when the daemon binds to a non-default port.
    #[arg(long)]
    loopback_base_url: Option<String>,

    /// Enable verbose logging (spec.md §6 "debug flag"), overriding the
    /// resolved config's `debug` field.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ingest_config::load_config().context("resolve configuration")?;
    if args.debug {
        config.debug = true;
    }

    ingest_telemetry::init_tracing(config.debug);

    let warnings = ingest_config::validate_config(&config).context("validate configuration")?;
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }

    let loopback_base_url = args
        .loopback_base_url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", local_port(&args.bind)));

    let object_store: Arc<dyn ObjectStoreClient> = Arc::new(
        GcsObjectStore::new()
            .await
            .map_err(|e| anyhow::anyhow!("object store client init failed: {e}"))?,
    );

    let ingestion_table = TableRef::new(
        config.gcp.project_id.clone(),
        config.big_query.dataset_id.clone(),
        config.big_query.instances_table_id.clone(),
    )
    .map_err(|e| anyhow::anyhow!("invalid ingestion table identifier: {e}"))?;
    let dlq_table = TableRef::new(
        config.gcp.project_id.clone(),
        config.big_query.dataset_id.clone(),
        format!("{}_dead_letter", config.big_query.instances_table_id),
    )
    .map_err(|e| anyhow::anyhow!("invalid dead-letter table identifier: {e}"))?;
    let warehouse: Arc<dyn WarehouseClient> = Arc::new(
        BigQueryWarehouse::new(config.gcp.project_id.clone(), ingestion_table, dlq_table)
            .await
            .context("warehouse client init")?,
    );

    let embedding_client = build_embedding_client(&config);
    let summarize_client = build_summarize_client(&config);
    let dicom_processor = Arc::new(DicomProcessor::new(
        ProcessorOptions::default(),
        summarize_client,
    ));

    let pipeline = Arc::new(Pipeline::new(
        object_store.clone(),
        warehouse.clone(),
        embedding_client,
        dicom_processor,
        config.embedding.clone(),
    ));

    let state = Arc::new(AppState {
        pipeline,
        warehouse,
        object_store,
        correlation_secret: CorrelationSecret::generate(),
        loopback_base_url,
        http_client: reqwest::Client::new(),
    });

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "ingest-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

/// `127.0.0.1` loopback target can't reuse a wildcard bind address's host;
/// extract just the port so the WS layer always proxies to localhost.
fn local_port(bind: &str) -> String {
    bind.rsplit(':').next().unwrap_or("8080").to_string()
}

fn to_retry_config(tuning: &RetryTuning) -> RetryConfig {
    RetryConfig {
        max_retries: tuning.max_retries,
        base_delay: Duration::from_millis(tuning.base_delay_ms),
        max_delay: Duration::from_secs(30),
        overall_timeout: Duration::from_secs(60),
        jitter_factor: 1.0,
    }
}

/// Builds a bearer-token closure that reads a freshly-minted access token
/// from the environment on every call. Token acquisition/refresh against
/// GCP's metadata server is an external collaborator concern (spec.md §1
/// excludes authentication from this system's scope) — an infra-level
/// sidecar is expected to keep this env var current.
fn env_bearer_token_provider(var: &'static str) -> impl Fn() -> String + Send + Sync + 'static {
    move || std::env::var(var).unwrap_or_default()
}

fn build_embedding_client(config: &IngestConfig) -> Option<Arc<dyn EmbeddingClient>> {
    if config.embedding.vector.model.trim().is_empty() {
        return None;
    }
    let endpoint = format!(
        "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:predict",
        location = config.gcp.location,
        project = config.gcp.project_id,
        model = config.embedding.vector.model,
    );
    Some(Arc::new(VertexEmbeddingClient::new(
        endpoint,
        env_bearer_token_provider("INGEST_EMBEDDING_BEARER_TOKEN"),
        to_retry_config(&config.embedding_retry),
    )))
}

fn build_summarize_client(config: &IngestConfig) -> Option<Arc<dyn ingest_dicom::summarize::SummarizeClient>> {
    let model = config.embedding.summarize_text.model.as_ref()?;
    let endpoint = format!(
        "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:predict",
        location = config.gcp.location,
        project = config.gcp.project_id,
    );
    Some(Arc::new(ingest_dicom::summarize::HttpSummarizeClient::new(
        endpoint,
        env_bearer_token_provider("INGEST_SUMMARIZE_BEARER_TOKEN"),
        to_retry_config(&config.summarize_retry),
    )))
}
