use std::future::Future;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::rank_protocol::{parse_rank_map, AckResponse, ClearRequest, SubmitRequest};
use crate::types::RankMap;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote ranking is not configured")]
    NotConfigured,
    #[error("remote rejected the credential")]
    Unauthorized,
    #[error("remote rejected the request: {0}")]
    Rejected(String),
    #[error("remote transport failed: {0}")]
    Transport(String),
    #[error("remote response malformed: {0}")]
    Malformed(String),
}

/// Remote best-score store. Implementations apply keep-max themselves.
pub trait RemoteRanking: Send + Sync {
    fn fetch_map(&self) -> impl Future<Output = Result<RankMap, RemoteError>> + Send;
    fn submit(&self, name: &str, score: u64)
        -> impl Future<Output = Result<(), RemoteError>> + Send;
    fn clear(&self, secret: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Used when no remote endpoint is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRemote;

impl RemoteRanking for NoRemote {
    async fn fetch_map(&self) -> Result<RankMap, RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn submit(&self, _name: &str, _score: u64) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn clear(&self, _secret: &str) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}

/// Talks to the `/rank` endpoints served by `rank_service`.
#[derive(Clone, Debug)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport(error: reqwest::Error) -> RemoteError {
    RemoteError::Transport(error.to_string())
}

fn parse_ack(text: &str) -> Result<AckResponse, RemoteError> {
    serde_json::from_str(text).map_err(|error| RemoteError::Malformed(error.to_string()))
}

/// `GET /rank` body → map. `ok:false` counts as not configured.
pub fn decode_rank_body(text: &str) -> Result<RankMap, RemoteError> {
    let value: Value =
        serde_json::from_str(text).map_err(|error| RemoteError::Malformed(error.to_string()))?;
    if value.get("ok").and_then(Value::as_bool) != Some(true) {
        return Err(RemoteError::NotConfigured);
    }
    match value.get("map") {
        None | Some(Value::Null) => Ok(RankMap::new()),
        Some(map) => parse_rank_map(map)
            .ok_or_else(|| RemoteError::Malformed("map is not an object".to_string())),
    }
}

/// `POST /rank/clear` outcome by status. 401 is final; other failures allow fallback.
pub fn classify_clear(status: StatusCode, text: &str) -> Result<(), RemoteError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(RemoteError::Unauthorized);
    }
    if !status.is_success() {
        return Err(RemoteError::NotConfigured);
    }
    let ack = parse_ack(text)?;
    if ack.ok {
        Ok(())
    } else {
        Err(RemoteError::Rejected(
            ack.error.unwrap_or_else(|| "clear failed".to_string()),
        ))
    }
}

pub fn classify_submit(status: StatusCode, text: &str) -> Result<(), RemoteError> {
    if status == StatusCode::BAD_REQUEST {
        return Err(RemoteError::Rejected("missing name".to_string()));
    }
    if !status.is_success() {
        return Err(RemoteError::NotConfigured);
    }
    let ack = parse_ack(text)?;
    if ack.ok {
        Ok(())
    } else {
        Err(RemoteError::Rejected(
            ack.error.unwrap_or_else(|| "submit failed".to_string()),
        ))
    }
}

impl RemoteRanking for HttpRemote {
    async fn fetch_map(&self) -> Result<RankMap, RemoteError> {
        let response = self
            .client
            .get(self.url("/rank"))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(RemoteError::NotConfigured);
        }
        let text = response.text().await.map_err(transport)?;
        decode_rank_body(&text)
    }

    async fn submit(&self, name: &str, score: u64) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url("/rank/submit"))
            .json(&SubmitRequest {
                name: name.to_string(),
                score,
            })
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        classify_submit(status, &text)
    }

    async fn clear(&self, secret: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url("/rank/clear"))
            .json(&ClearRequest {
                password: secret.to_string(),
            })
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        classify_clear(status, &text)
    }
}
