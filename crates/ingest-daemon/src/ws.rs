// SPDX-License-Identifier: MIT OR Apache-2.0
//! WS multiplex layer (spec.md §4.10): one persistent binary channel per
//! connection, carrying typed actions that get proxied to the internal
//! HTTP surface over loopback.
//!
//! Each inbound binary frame decodes to `{action, payload}`; the action is
//! looked up in [`resolve_route`], signed with the correlation HMAC
//! (spec.md §3), and proxied via `state.http_client` to
//! `state.loopback_base_url`. The HTTP response is re-framed as the
//! outbound result, reusing the inbound frame's `messageId` throughout
//! (spec.md §4.10 "Result encoding"). `process.run` is the one action with
//! no HTTP route counterpart (§6 names no such route) — it runs directly
//! against the object store and warehouse client handles already on
//! [`AppState`] instead of looping back through HTTP (see DESIGN.md).

use crate::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use ingest_protocol::action::{decode_binary_result, encode_binary_result, ActionEnvelope, WsErrorPayload, WsResultPayload};
use ingest_protocol::{correlation, frame, Compression, Frame, FrameError, PayloadKind};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Upgrades `GET /ws` to the binary multiplex protocol.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "ws connection opened");

    loop {
        let message = match socket.recv().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                warn!(connection_id = %connection_id, error = %err, "ws transport error");
                break;
            }
            None => break,
        };

        match message {
            Message::Binary(bytes) => match handle_frame(&state, &connection_id, &bytes).await {
                FrameOutcome::Replies(frames) => {
                    for out in frames {
                        if socket.send(Message::Binary(out.into())).await.is_err() {
                            return;
                        }
                    }
                }
                FrameOutcome::CloseProtocolError(reason) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: 1003,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {
                // spec.md §4.10: "Inbound non-binary frames cause immediate
                // close with protocol code 1003."
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1003,
                        reason: "Binary frames required".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    info!(connection_id = %connection_id, "ws connection closed");
}

enum FrameOutcome {
    Replies(Vec<Vec<u8>>),
    CloseProtocolError(&'static str),
}

async fn handle_frame(state: &Arc<AppState>, connection_id: &str, bytes: &[u8]) -> FrameOutcome {
    let decoded = match frame::decode(bytes) {
        Ok(f) => f,
        Err(FrameError::UnsupportedVersion) => return FrameOutcome::CloseProtocolError("Unsupported WS protocol version"),
        Err(FrameError::TooSmall | FrameError::PayloadIncomplete | FrameError::Invalid) => {
            return FrameOutcome::CloseProtocolError("Invalid WS frame")
        }
    };

    let message_id_hex = hex::encode(decoded.message_id);
    let reply = dispatch_action(state, connection_id, &message_id_hex, &decoded).await;
    FrameOutcome::Replies(vec![reply])
}

/// Decompresses (if needed), parses the action envelope, routes it, and
/// builds the single outbound frame for this message.
async fn dispatch_action(state: &Arc<AppState>, connection_id: &str, message_id_hex: &str, decoded: &Frame) -> Vec<u8> {
    let raw_payload = match decoded.compression {
        Compression::None => decoded.payload.clone(),
        Compression::Gzip => match ingest_compress::decompress(&decoded.payload) {
            Ok(bytes) => bytes,
            Err(err) => return error_frame(decoded.message_id, "", &err.to_string(), "INVALID_INPUT"),
        },
    };

    let envelope: ActionEnvelope = match serde_json::from_slice(&raw_payload) {
        Ok(env) => env,
        Err(err) => return error_frame(decoded.message_id, "", &format!("malformed action envelope: {err}"), "BAD_SCHEMA"),
    };

    if envelope.action == "process.run" {
        return run_process_action(state, decoded.message_id, &envelope.payload).await;
    }

    let route = match resolve_route(&envelope.action, &envelope.payload) {
        Ok(route) => route,
        Err(reason) => return error_frame(decoded.message_id, &envelope.action, &reason, "BAD_SCHEMA"),
    };

    let signature = correlation::sign(&state.correlation_secret, connection_id, message_id_hex, &envelope.action);
    let url = format!("{}{}", state.loopback_base_url, route.path);
    let mut request = state
        .http_client
        .request(route.method, &url)
        .header("x-ws-connection-id", connection_id)
        .header("x-ws-message-id", message_id_hex)
        .header("x-ws-action", envelope.action.as_str())
        .header("x-ws-correlation-signature", signature);
    if let Some(query) = &route.query {
        request = request.query(query);
    }
    if let Some(body) = &route.body {
        request = request.json(body);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return error_frame(decoded.message_id, &envelope.action, &err.to_string(), "TRANSIENT"),
    };

    let status = response.status();
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return error_frame(decoded.message_id, &envelope.action, &err.to_string(), "TRANSIENT"),
    };

    if !status.is_success() {
        let (code, reason) = match serde_json::from_slice::<ingest_error::ErrorDto>(&bytes) {
            Ok(dto) => (dto.code, dto.reason),
            Err(_) => (status.as_str().to_string(), String::from_utf8_lossy(&bytes).into_owned()),
        };
        return error_frame(decoded.message_id, &envelope.action, &reason, &code);
    }

    if content_type.starts_with("application/json") {
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => return error_frame(decoded.message_id, &envelope.action, &err.to_string(), "INTERNAL"),
        };
        let total_studies = if envelope.action == "studies.search" {
            fetch_total_studies(state, connection_id, &envelope.payload).await
        } else {
            None
        };
        encode_json_result(decoded.message_id, &envelope.action, value, total_studies)
    } else {
        let meta = json!({"mimeType": content_type, "size": bytes.len()});
        let payload = encode_binary_result(&meta, &bytes);
        encode_result_frame(decoded.message_id, PayloadKind::Binary, &payload, &content_type)
    }
}

/// Applies the compression policy (spec.md §4.10) and frames the payload.
fn encode_result_frame(message_id: [u8; 16], kind: PayloadKind, payload: &[u8], content_type: &str) -> Vec<u8> {
    let (stored, compressed) = ingest_compress::compress_for_frame(payload, content_type);
    let compression = if compressed { Compression::Gzip } else { Compression::None };
    frame::encode(message_id, compression, kind, &stored)
}

/// Wraps a successful JSON result in the `{type:"result", action, data,
/// totalStudies?}` envelope (spec.md §8 scenario 5) before framing it.
fn encode_json_result(message_id: [u8; 16], action: &str, data: Value, total_studies: Option<i64>) -> Vec<u8> {
    let result = WsResultPayload::new(action.to_string(), data, total_studies);
    let payload = serde_json::to_vec(&result).expect("WsResultPayload always serializes");
    encode_result_frame(message_id, PayloadKind::Json, &payload, "application/json")
}

/// Looks up the unpaginated study count for a `studies.search` result by
/// issuing a second signed loopback call to the counts route — the main
/// response only carries the current page (spec.md §8 scenario 5).
async fn fetch_total_studies(state: &Arc<AppState>, connection_id: &str, payload: &Value) -> Option<i64> {
    const COUNTS_ACTION: &str = "studies.search.counts";
    let message_id_hex = hex::encode(Uuid::new_v4().as_bytes());
    let signature = correlation::sign(&state.correlation_secret, connection_id, &message_id_hex, COUNTS_ACTION);
    let url = format!("{}/api/studies/search/counts", state.loopback_base_url);

    let response = state
        .http_client
        .post(&url)
        .header("x-ws-connection-id", connection_id)
        .header("x-ws-message-id", &message_id_hex)
        .header("x-ws-action", COUNTS_ACTION)
        .header("x-ws-correlation-signature", signature)
        .json(payload)
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }
    let value: Value = response.json().await.ok()?;
    value.get("total").and_then(Value::as_i64)
}

fn error_frame(message_id: [u8; 16], action: &str, error: &str, code: &str) -> Vec<u8> {
    let payload = WsErrorPayload::new(action.to_string(), error.to_string(), code.to_string());
    let bytes = serde_json::to_vec(&payload).expect("WsErrorPayload always serializes");
    frame::encode(message_id, Compression::None, PayloadKind::Json, &bytes)
}

// ---------------------------------------------------------------------------
// Action routing
// ---------------------------------------------------------------------------

struct ResolvedRoute {
    method: reqwest::Method,
    path: String,
    query: Option<Vec<(String, String)>>,
    body: Option<Value>,
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("payload.{key} is required and must be a string"))
}

/// Maps a WS action name onto its internal HTTP route (spec.md §4.10
/// "Action routing"). Unknown actions fail with a `BadSchema`-flavored
/// error frame rather than panicking.
fn resolve_route(action: &str, payload: &Value) -> Result<ResolvedRoute, String> {
    use reqwest::Method;

    let route = match action {
        "studies.search" => ResolvedRoute {
            method: Method::POST,
            path: "/api/studies/search".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "studies.search.counts" => ResolvedRoute {
            method: Method::POST,
            path: "/api/studies/search/counts".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "instances.search" => ResolvedRoute {
            method: Method::POST,
            path: "/api/instances/search".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "instances.search.counts" => ResolvedRoute {
            method: Method::POST,
            path: "/api/instances/search/counts".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "studies.instances" => ResolvedRoute {
            method: Method::GET,
            path: format!("/studies/{}/instances", payload_str(payload, "uid")?),
            query: None,
            body: None,
        },
        "studies.metadata" => ResolvedRoute {
            method: Method::GET,
            path: format!("/studies/{}/metadata", payload_str(payload, "uid")?),
            query: None,
            body: None,
        },
        "instances.get" => ResolvedRoute {
            method: Method::GET,
            path: format!("/api/instances/{}", payload_str(payload, "id")?),
            query: None,
            body: None,
        },
        "instances.content" => ResolvedRoute {
            method: Method::GET,
            path: format!("/api/instances/{}/content", payload_str(payload, "id")?),
            query: None,
            body: None,
        },
        "instances.delete" => ResolvedRoute {
            method: Method::DELETE,
            path: "/api/instances".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "studies.delete" => ResolvedRoute {
            method: Method::POST,
            path: "/api/studies/delete".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "dlq.items" => {
            let limit = payload.get("limit").and_then(Value::as_i64).unwrap_or(50);
            let offset = payload.get("offset").and_then(Value::as_i64).unwrap_or(0);
            ResolvedRoute {
                method: Method::GET,
                path: "/api/dlq/items".to_string(),
                query: Some(vec![("limit".to_string(), limit.to_string()), ("offset".to_string(), offset.to_string())]),
                body: None,
            }
        }
        "dlq.summary" => ResolvedRoute {
            method: Method::GET,
            path: "/api/dlq/summary".to_string(),
            query: None,
            body: None,
        },
        "dlq.count" => ResolvedRoute {
            method: Method::GET,
            path: "/api/dlq/count".to_string(),
            query: None,
            body: None,
        },
        "dlq.requeue" => ResolvedRoute {
            method: Method::POST,
            path: "/api/dlq/requeue".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        "dlq.delete" => ResolvedRoute {
            method: Method::DELETE,
            path: "/api/dlq".to_string(),
            query: None,
            body: Some(payload.clone()),
        },
        other => return Err(format!("unrecognised action: {other}")),
    };
    Ok(route)
}

// ---------------------------------------------------------------------------
// process.run (spec.md §9 open question: WS-native, no HTTP counterpart)
// ---------------------------------------------------------------------------

/// Upload interval/timeout for the `process.run` poll loop. This is the
/// pragmatic compromise spec.md §9 flags, not an invariant: a future
/// rework may prefer a ticket/poll split instead of blocking the WS
/// message on ingestion latency.
const PROCESS_RUN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PROCESS_RUN_MAX_WALL_TIME: Duration = Duration::from_secs(30);

/// Uploads a user-supplied blob to the object store, then polls the
/// warehouse for the row it produces once the real ingestion pipeline
/// (external to this process in production) picks it up.
async fn run_process_action(state: &Arc<AppState>, message_id: [u8; 16], payload: &Value) -> Vec<u8> {
    let bucket = match payload_str(payload, "bucket") {
        Ok(b) => b,
        Err(reason) => return error_frame(message_id, "process.run", &reason, "BAD_SCHEMA"),
    };
    let name = match payload_str(payload, "name") {
        Ok(n) => n,
        Err(reason) => return error_frame(message_id, "process.run", &reason, "BAD_SCHEMA"),
    };
    let data_b64 = match payload_str(payload, "data") {
        Ok(d) => d,
        Err(reason) => return error_frame(message_id, "process.run", &reason, "BAD_SCHEMA"),
    };

    let bytes = {
        use base64::Engine;
        match base64::engine::general_purpose::STANDARD.decode(data_b64) {
            Ok(bytes) => bytes,
            Err(err) => return error_frame(message_id, "process.run", &format!("payload.data is not valid base64: {err}"), "BAD_SCHEMA"),
        }
    };

    let content_type = payload.get("contentType").and_then(Value::as_str).unwrap_or("application/dicom");
    let obj = ingest_objectstore::ObjectRef::new(bucket, name);
    if let Err(err) = state.object_store.upload(&obj, content_type, bytes).await {
        let ingest_err: ingest_error::IngestError = err.into();
        return error_frame(message_id, "process.run", &ingest_err.to_string(), ingest_err.kind().as_str());
    }

    let path = obj.canonical_uri();
    let deadline = tokio::time::Instant::now() + PROCESS_RUN_MAX_WALL_TIME;
    loop {
        match state.warehouse.search_instances(&path_search_key(), &path, 1, 0).await {
            Ok(items) if !items.is_empty() => {
                let data = json!({"status": "complete", "path": path, "record": items[0]});
                return encode_json_result(message_id, "process.run", data, None);
            }
            Ok(_) => {}
            Err(err) => return error_frame(message_id, "process.run", &err.to_string(), "TRANSIENT"),
        }

        if tokio::time::Instant::now() >= deadline {
            let data = json!({"status": "timeout", "path": path});
            return encode_json_result(message_id, "process.run", data, None);
        }
        tokio::time::sleep(PROCESS_RUN_POLL_INTERVAL).await;
    }
}

fn path_search_key() -> String {
    "path".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_route_maps_studies_search_to_post() {
        let route = resolve_route("studies.search", &json!({"key": "PatientID", "value": "P1"})).unwrap();
        assert_eq!(route.method, reqwest::Method::POST);
        assert_eq!(route.path, "/api/studies/search");
        assert!(route.body.is_some());
    }

    #[test]
    fn resolve_route_substitutes_path_params() {
        let route = resolve_route("studies.instances", &json!({"uid": "1.2.3"})).unwrap();
        assert_eq!(route.path, "/studies/1.2.3/instances");
    }

    #[test]
    fn resolve_route_rejects_unknown_action() {
        assert!(resolve_route("nope.nope", &json!({})).is_err());
    }

    #[test]
    fn resolve_route_rejects_missing_path_param() {
        assert!(resolve_route("instances.get", &json!({})).is_err());
    }

    #[test]
    fn dlq_items_defaults_limit_and_offset_in_query() {
        let route = resolve_route("dlq.items", &json!({})).unwrap();
        let query = route.query.unwrap();
        assert!(query.contains(&("limit".to_string(), "50".to_string())));
        assert!(query.contains(&("offset".to_string(), "0".to_string())));
    }

    #[test]
    fn error_frame_round_trips_through_frame_decode() {
        let encoded = error_frame([9u8; 16], "studies.search", "boom", "TRANSIENT");
        let decoded = frame::decode(&encoded).unwrap();
        assert_eq!(decoded.message_id, [9u8; 16]);
        let payload: Value = serde_json::from_slice(&decoded.payload).unwrap();
        assert_eq!(payload["type"], "error");
        assert_eq!(payload["code"], "TRANSIENT");
    }

    #[test]
    fn json_result_frame_nests_body_under_data_with_total_studies() {
        let encoded = encode_json_result([1u8; 16], "studies.search", json!({"items": []}), Some(7));
        let decoded = frame::decode(&encoded).unwrap();
        let payload: Value = serde_json::from_slice(&decoded.payload).unwrap();
        assert_eq!(payload["type"], "result");
        assert_eq!(payload["action"], "studies.search");
        assert_eq!(payload["data"]["items"], json!([]));
        assert_eq!(payload["totalStudies"], 7);
    }

    #[test]
    fn json_result_frame_omits_total_studies_for_other_actions() {
        let encoded = encode_json_result([2u8; 16], "instances.get", json!({"instance": null}), None);
        let decoded = frame::decode(&encoded).unwrap();
        let payload: Value = serde_json::from_slice(&decoded.payload).unwrap();
        assert_eq!(payload["type"], "result");
        assert!(!payload.as_object().unwrap().contains_key("totalStudies"));
    }
}
