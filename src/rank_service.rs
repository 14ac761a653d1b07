use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::kv_store::{KeyValueStore, StoreError};
use crate::rank_protocol::{
    parse_clear_password, parse_submit_request, AckResponse, RankMapResponse,
};
use crate::ranking_store::{apply_keep_max, load_local_map, save_local_map, RANK_RECORD_KEY};
use crate::types::RankMap;

/// Server half of the ranking contract. Writes are serialized so
/// keep-max updates never interleave.
pub struct RankService<S> {
    store: S,
    clear_secret: Option<String>,
    write_lock: Mutex<()>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearVerdict {
    Cleared,
    Unauthorized,
    NotConfigured,
}

impl<S: KeyValueStore> RankService<S> {
    pub fn new(store: S, clear_secret: Option<String>) -> Self {
        Self {
            store,
            clear_secret,
            write_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Result<RankMap, StoreError> {
        load_local_map(&self.store)
    }

    /// Returns whether the stored best changed.
    pub async fn submit(&self, name: &str, score: u64) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = load_local_map(&self.store)?;
        let updated = apply_keep_max(&mut map, name, score);
        if updated {
            save_local_map(&self.store, &map)?;
        }
        Ok(updated)
    }

    pub async fn clear(&self, password: &str) -> Result<ClearVerdict, StoreError> {
        let Some(secret) = self.clear_secret.as_deref() else {
            return Ok(ClearVerdict::NotConfigured);
        };
        if password != secret {
            return Ok(ClearVerdict::Unauthorized);
        }
        let _guard = self.write_lock.lock().await;
        self.store.delete(RANK_RECORD_KEY)?;
        Ok(ClearVerdict::Cleared)
    }
}

pub fn rank_router<S: KeyValueStore + 'static>(service: Arc<RankService<S>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rank", get(rank_handler::<S>))
        .route("/rank/submit", post(submit_handler::<S>))
        .route("/rank/clear", post(clear_handler::<S>))
        .with_state(service)
}

fn parse_body(body: &Bytes) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) | Err(_) => json!({}),
        Ok(value) => value,
    }
}

fn storage_unavailable(error: &StoreError) -> (StatusCode, Json<AckResponse>) {
    warn!(%error, "[rank] storage unavailable");
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(AckResponse::err(&error.to_string())),
    )
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn rank_handler<S: KeyValueStore>(
    State(service): State<Arc<RankService<S>>>,
) -> (StatusCode, Json<RankMapResponse>) {
    match service.snapshot() {
        Ok(map) => (
            StatusCode::OK,
            Json(RankMapResponse {
                ok: true,
                map: Some(map),
                error: None,
                generated_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            }),
        ),
        Err(error) => {
            warn!(%error, "[rank] storage unavailable");
            (
                StatusCode::NOT_IMPLEMENTED,
                Json(RankMapResponse {
                    ok: false,
                    map: None,
                    error: Some(error.to_string()),
                    generated_at: None,
                }),
            )
        }
    }
}

pub async fn submit_handler<S: KeyValueStore>(
    State(service): State<Arc<RankService<S>>>,
    body: Bytes,
) -> (StatusCode, Json<AckResponse>) {
    let Some(request) = parse_submit_request(&parse_body(&body)) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::err("missing name")),
        );
    };
    match service.submit(&request.name, request.score).await {
        Ok(updated) => {
            if updated {
                info!(name = %request.name, score = request.score, "[rank] best score updated");
            }
            (StatusCode::OK, Json(AckResponse::ok()))
        }
        Err(error) => storage_unavailable(&error),
    }
}

pub async fn clear_handler<S: KeyValueStore>(
    State(service): State<Arc<RankService<S>>>,
    body: Bytes,
) -> (StatusCode, Json<AckResponse>) {
    let password = parse_clear_password(&parse_body(&body));
    match service.clear(&password).await {
        Ok(ClearVerdict::Cleared) => {
            info!("[rank] ranking cleared");
            (StatusCode::OK, Json(AckResponse::ok()))
        }
        Ok(ClearVerdict::Unauthorized) => (
            StatusCode::UNAUTHORIZED,
            Json(AckResponse::err("unauthorized")),
        ),
        Ok(ClearVerdict::NotConfigured) => (
            StatusCode::NOT_IMPLEMENTED,
            Json(AckResponse::err("clear not configured")),
        ),
        Err(error) => storage_unavailable(&error),
    }
}
