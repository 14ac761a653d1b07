use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server_utils::ranking_key;
use crate::types::RankMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankMapResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<RankMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "generatedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn err(reason: &str) -> Self {
        Self {
            ok: false,
            error: Some(reason.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmitRequest {
    pub name: String,
    pub score: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClearRequest {
    pub password: String,
}

/// Reads a submit body leniently; `None` when the name is missing or blank.
pub fn parse_submit_request(body: &Value) -> Option<SubmitRequest> {
    let name = match body.get("name")? {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    let name = ranking_key(&name)?;
    Some(SubmitRequest {
        name,
        score: parse_score(body.get("score")),
    })
}

pub fn parse_clear_password(body: &Value) -> String {
    match body.get("password") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

/// Coerces a score: floats are floored, negatives and garbage become 0.
pub fn parse_score(value: Option<&Value>) -> u64 {
    let number = match value {
        Some(Value::Number(number)) => {
            if let Some(value) = number.as_u64() {
                return value;
            }
            number.as_f64()
        }
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(value) if value.is_finite() && value > 0.0 => value.floor() as u64,
        _ => 0,
    }
}

/// Parses a `{name: score}` object from an untrusted peer.
pub fn parse_rank_map(value: &Value) -> Option<RankMap> {
    let object = value.as_object()?;
    let mut map = RankMap::new();
    for (name, raw_score) in object {
        let Some(key) = ranking_key(name) else {
            continue;
        };
        let score = parse_score(Some(raw_score));
        let slot = map.entry(key).or_insert(score);
        *slot = (*slot).max(score);
    }
    Some(map)
}
