// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control plane for the DICOM ingestion pipeline: the Event
//! Dispatcher's push endpoint, the Admin Query Layer, DLQ remediation, and
//! the WS multiplex upgrade route (spec.md §4.1, §4.8, §4.9, §4.10, §6).
//!
//! [`AppState`] is assembled once at startup from the client handles built
//! in `main` and threaded through every handler via `axum::extract::State`
//! — no module-level singletons (spec.md §9).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod middleware;
pub mod validation;
pub mod ws;

use api::{
    split_bucket_and_name, split_member_fragment, CountResponse, DeleteInstancesRequest, DeleteStudyRequest,
    DeletedResponse, DlqCountResponse, DlqItemsResponse, DlqMessageIdsRequest, DlqRequeueFailureDto,
    DlqRequeueResponse, DlqSummaryResponse, InstanceGetResponse, InstancesSearchResponse, SearchCountRequest,
    SearchRequest, StudiesSearchResponse, StudyInstancesResponse,
};
use axum::body::Body;
use axum::extract::{Extension, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use ingest_core::IngestionRecord;
use ingest_error::{ErrorDto, IngestError};
use ingest_objectstore::{ObjectRef, ObjectStoreClient};
use ingest_pipeline::{envelope::PushEnvelope, DispatchResult, Pipeline};
use ingest_protocol::CorrelationSecret;
use ingest_warehouse::WarehouseClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;
use uuid::Uuid;

use crate::middleware::RequestId;

/// Every client handle and piece of process-wide state a route handler
/// might need. Built once in `main` and shared behind an `Arc` (spec.md
/// §5 "shared resources").
pub struct AppState {
    /// Orchestrates the ingestion path for `POST /push`.
    pub pipeline: Arc<Pipeline>,
    /// Backs the Admin Query Layer and DLQ remediation routes.
    pub warehouse: Arc<dyn WarehouseClient>,
    /// Backs raw/rendered artifact retrieval and DLQ existence checks.
    pub object_store: Arc<dyn ObjectStoreClient>,
    /// Signs/verifies the WS layer's loopback correlation headers.
    pub correlation_secret: CorrelationSecret,
    /// `http://127.0.0.1:{port}`, the address the WS layer proxies to.
    pub loopback_base_url: String,
    /// Reused across every loopback proxy call.
    pub http_client: reqwest::Client,
}

/// A `{code, messageId, reason}` error response (spec.md §7).
pub struct ApiError {
    status: StatusCode,
    body: ErrorDto,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorDto {
                code: "NOT_FOUND".to_string(),
                message_id: Uuid::new_v4().to_string(),
                reason: message.into(),
                remediation_url: None,
            },
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let message_id = Uuid::new_v4().to_string();
        let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            body: err.to_dto(message_id),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Builds the daemon's router: Event Dispatcher, Admin Query Layer, DLQ
/// remediation, and WS upgrade, wrapped in the ambient middleware stack.
pub fn build_app(state: Arc<AppState>) -> Router {
    let rate_limiter = middleware::RateLimiter::new(600, std::time::Duration::from_secs(60));

    Router::new()
        .route("/push", post(push_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/api/studies/search", post(studies_search))
        .route("/api/studies/search/counts", post(studies_search_counts))
        .route("/api/instances/search", post(instances_search))
        .route("/api/instances/search/counts", post(instances_search_counts))
        .route("/studies/{uid}/instances", get(study_instances))
        .route("/studies/{uid}/metadata", get(study_metadata))
        .route("/api/instances/{id}", get(instance_get))
        .route("/api/instances/{id}/content", get(instance_content))
        .route("/api/instances", delete(delete_instances))
        .route("/api/studies/delete", post(delete_study))
        .route("/studies/{study}/series/{series}/instances/{sop}", get(instance_raw))
        .route(
            "/studies/{study}/series/{series}/instances/{sop}/rendered",
            get(instance_rendered),
        )
        .route("/api/dlq/count", get(dlq_count))
        .route("/api/dlq/summary", get(dlq_summary))
        .route("/api/dlq/items", get(dlq_items))
        .route("/api/dlq/requeue", post(dlq_requeue))
        .route("/api/dlq", delete(dlq_delete))
        .layer(CorsLayer::permissive())
        .layer(from_fn(json_guard_middleware))
        .layer(rate_limiter.into_layer())
        .layer(from_fn(middleware::RequestLogger::layer))
        .layer(from_fn(middleware::request_id_middleware))
        .with_state(state)
}

/// Buffers the request body and rejects oversized/overly-nested JSON
/// before it reaches a handler's `Json` extractor — the same guard the WS
/// action payloads are held to (spec.md §5, §4.10).
async fn json_guard_middleware(req: Request<Body>, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, 2_000_000).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::from(IngestError::bad_schema("request body too large to read")).into_response(),
    };

    if !bytes.is_empty() {
        if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
            let errors = validation::validate_json_object(&value, validation::JsonGuardLimits::default());
            if !errors.is_empty() {
                return ApiError::from(IngestError::bad_schema(errors.join("; "))).into_response();
            }
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

// ---------------------------------------------------------------------------
// Event Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PushOutcomeDto {
    #[serde(rename = "recordId")]
    record_id: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct PushMemberFailureDto {
    #[serde(rename = "memberName")]
    member_name: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct PushResponse {
    outcomes: Vec<PushOutcomeDto>,
    #[serde(rename = "memberFailures")]
    member_failures: Vec<PushMemberFailureDto>,
}

impl From<DispatchResult> for PushResponse {
    fn from(result: DispatchResult) -> Self {
        Self {
            outcomes: result
                .outcomes
                .into_iter()
                .map(|o| PushOutcomeDto {
                    record_id: o.record_id,
                    path: o.path,
                })
                .collect(),
            member_failures: result
                .member_failures
                .into_iter()
                .map(|f| PushMemberFailureDto {
                    member_name: f.member_name,
                    reason: f.reason,
                })
                .collect(),
        }
    }
}

async fn push_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<Json<PushResponse>, ApiError> {
    let (result, perf) = state.pipeline.handle_push(&envelope, request_id.0.to_string()).await;
    if perf.had_hot_gap {
        warn!(request_id = %perf.request_id, total_ms = perf.total_ms, "push handling had a hot gap");
    }
    let dispatch = result?;
    Ok(Json(PushResponse::from(dispatch)))
}

// ---------------------------------------------------------------------------
// Admin Query Layer
// ---------------------------------------------------------------------------

async fn studies_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<StudiesSearchResponse>, ApiError> {
    let items = state.warehouse.search_studies(&req.key, &req.value, req.limit, req.offset).await?;
    Ok(Json(StudiesSearchResponse { items }))
}

async fn studies_search_counts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchCountRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let total = state.warehouse.search_studies_count(&req.key, &req.value).await?;
    Ok(Json(CountResponse { total }))
}

async fn instances_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<InstancesSearchResponse>, ApiError> {
    let items = state.warehouse.search_instances(&req.key, &req.value, req.limit, req.offset).await?;
    Ok(Json(InstancesSearchResponse { items }))
}

async fn instances_search_counts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchCountRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let total = state.warehouse.search_instances_count(&req.key, &req.value).await?;
    Ok(Json(CountResponse { total }))
}

async fn study_instances(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<StudyInstancesResponse>, ApiError> {
    let items = state.warehouse.study_instances(&uid).await?;
    Ok(Json(StudyInstancesResponse { items }))
}

async fn study_metadata(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<ingest_warehouse::normalize::StudyMetadataTree>, ApiError> {
    let tree = state.warehouse.study_metadata(&uid).await?;
    Ok(Json(tree))
}

async fn instance_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InstanceGetResponse>, ApiError> {
    let instance = state.warehouse.instance_get(&id).await?;
    Ok(Json(InstanceGetResponse { instance }))
}

/// Downloads the raw bytes a stored row was derived from, re-expanding the
/// parent archive when the row is an archive member (spec.md §3 invariant
/// d, §4.8 `instances.content`).
async fn fetch_raw_bytes(object_store: &dyn ObjectStoreClient, record: &IngestionRecord) -> Result<Vec<u8>, IngestError> {
    let (base, member_name) = split_member_fragment(&record.path);
    let (bucket, name) =
        split_bucket_and_name(base).ok_or_else(|| IngestError::internal(format!("malformed stored path: {base}")))?;
    let obj = ObjectRef::new(bucket, name);

    match member_name {
        Some(_) => {
            let downloaded = object_store.download(&obj).await?;
            let expansion = ingest_archive::expand_archive(&downloaded.bytes, base)?;
            expansion
                .members
                .into_iter()
                .find(|m| m.record_path == record.path)
                .map(|m| m.bytes)
                .ok_or_else(|| IngestError::invalid_input(format!("archive member no longer present: {}", record.path)))
        }
        None => Ok(object_store.download(&obj).await?.bytes),
    }
}

async fn instance_content(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let record = state
        .warehouse
        .instance_get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no instance with id {id}")))?;
    let bytes = fetch_raw_bytes(state.object_store.as_ref(), &record).await?;
    Ok(([(header::CONTENT_TYPE, "application/dicom")], bytes).into_response())
}

async fn delete_instances(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteInstancesRequest>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.warehouse.delete_instances(&req.ids).await?;
    Ok(Json(DeletedResponse::default()))
}

async fn delete_study(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteStudyRequest>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.warehouse.delete_study(&req.study_instance_uid).await?;
    Ok(Json(DeletedResponse::default()))
}

async fn instance_raw(
    State(state): State<Arc<AppState>>,
    Path((study, series, sop)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let record = state
        .warehouse
        .instance_by_uids(&study, &series, &sop)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no instance {study}/{series}/{sop}")))?;
    let bytes = fetch_raw_bytes(state.object_store.as_ref(), &record).await?;
    Ok(([(header::CONTENT_TYPE, "application/dicom")], bytes).into_response())
}

async fn instance_rendered(
    State(state): State<Arc<AppState>>,
    Path((study, series, sop)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let record = state
        .warehouse
        .instance_by_uids(&study, &series, &sop)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no instance {study}/{series}/{sop}")))?;
    let bytes = fetch_raw_bytes(state.object_store.as_ref(), &record).await?;

    let obj = ingest_dicom::metadata::parse_dicom(&bytes)?;
    let transfer_syntax_uid = obj.meta().transfer_syntax.trim_end_matches('\0').trim().to_string();
    let rendered = ingest_dicom::image::render_image(&obj, &transfer_syntax_uid)?
        .ok_or_else(|| ApiError::not_found(format!("no renderable image for {study}/{series}/{sop}")))?;
    Ok(([(header::CONTENT_TYPE, rendered.mime_type)], rendered.jpeg_bytes).into_response())
}

// ---------------------------------------------------------------------------
// DLQ remediation
// ---------------------------------------------------------------------------

fn default_dlq_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
struct DlqItemsQuery {
    #[serde(default = "default_dlq_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

async fn dlq_count(State(state): State<Arc<AppState>>) -> Result<Json<DlqCountResponse>, ApiError> {
    let total = state.warehouse.dlq_count().await?;
    Ok(Json(DlqCountResponse { total }))
}

async fn dlq_summary(State(state): State<Arc<AppState>>) -> Result<Json<DlqSummaryResponse>, ApiError> {
    let items = state.warehouse.dlq_summary().await?;
    Ok(Json(DlqSummaryResponse { items }))
}

async fn dlq_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DlqItemsQuery>,
) -> Result<Json<DlqItemsResponse>, ApiError> {
    let rows = state.warehouse.dlq_items(query.limit, query.offset).await?;
    Ok(Json(DlqItemsResponse {
        items: rows.into_iter().map(Into::into).collect(),
    }))
}

/// `ingest-warehouse` has no by-message-id point lookup for dead-letter
/// rows, so the caller's requested ids are matched against a full page
/// fetched from the warehouse before remediation runs (spec.md §4.9).
const DLQ_REQUEUE_FETCH_LIMIT: i64 = 10_000;

async fn dlq_requeue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DlqMessageIdsRequest>,
) -> Result<Json<DlqRequeueResponse>, ApiError> {
    let wanted: HashSet<&String> = req.message_ids.iter().collect();
    let all_rows = state.warehouse.dlq_items(DLQ_REQUEUE_FETCH_LIMIT, 0).await?;
    let rows: Vec<_> = all_rows.into_iter().filter(|r| wanted.contains(&r.message_id)).collect();

    let outcome = ingest_pipeline::remediation::requeue(state.object_store.as_ref(), state.warehouse.as_ref(), &rows).await?;

    let touched: HashSet<&String> = outcome.requeued.iter().collect();
    let deleted_message_count = rows
        .iter()
        .filter(|r| {
            ingest_warehouse::derive_target(r)
                .map(|t| touched.contains(&format!("{}/{}", t.bucket, t.name)))
                .unwrap_or(false)
        })
        .count();

    Ok(Json(DlqRequeueResponse {
        requeued_count: outcome.requeued.len(),
        deleted_message_count,
        failures: outcome
            .failures
            .into_iter()
            .map(|f| DlqRequeueFailureDto {
                target: f.target,
                reason: f.reason,
            })
            .collect(),
    }))
}

async fn dlq_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DlqMessageIdsRequest>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.warehouse.delete_dlq_rows(&req.message_ids).await?;
    Ok(Json(DeletedResponse::default()))
}
