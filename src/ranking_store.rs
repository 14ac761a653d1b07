use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kv_store::{KeyValueStore, StoreError};
use crate::rank_protocol::parse_score;
use crate::rank_remote::{RemoteError, RemoteRanking};
use crate::server_utils::ranking_key;
use crate::types::{RankEntry, RankMap, RankSlot};

pub const RANK_RECORD_KEY: &str = "merge_drop_ranking_v1";
const RECORD_VERSION: u8 = 1;

#[derive(Clone, Debug, Serialize)]
struct RankRecord<'a> {
    version: u8,
    players: &'a RankMap,
}

#[derive(Clone, Debug, Deserialize)]
struct RankRecordRaw {
    version: u8,
    players: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ClearError {
    #[error("no admin secret given")]
    MissingSecret,
    #[error("not authorized")]
    Unauthorized,
    #[error("clear rejected: {0}")]
    Rejected(String),
    #[error("remote not configured and local admin secret does not match")]
    NotConfigured,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearOutcome {
    Remote,
    LocalFallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Ignored,
    Remote,
    Local { updated: bool },
    Dropped,
}

/// Reads the local record. Missing, unparsable or foreign-version records are empty.
pub fn load_local_map<S: KeyValueStore + ?Sized>(store: &S) -> Result<RankMap, StoreError> {
    let Some(text) = store.get(RANK_RECORD_KEY)? else {
        return Ok(RankMap::new());
    };
    let parsed = match serde_json::from_str::<RankRecordRaw>(&text) {
        Ok(value) if value.version == RECORD_VERSION => value,
        Ok(value) => {
            warn!(
                version = value.version,
                "[ranking-store] unsupported local record version"
            );
            return Ok(RankMap::new());
        }
        Err(error) => {
            warn!(%error, "[ranking-store] failed to parse local record");
            return Ok(RankMap::new());
        }
    };

    let mut sanitized = RankMap::new();
    for (name, raw_score) in parsed.players {
        let Some(key) = ranking_key(&name) else {
            continue;
        };
        let score = parse_score(Some(&raw_score));
        apply_keep_max(&mut sanitized, &key, score);
    }
    Ok(sanitized)
}

pub fn save_local_map<S: KeyValueStore + ?Sized>(
    store: &S,
    map: &RankMap,
) -> Result<(), StoreError> {
    let record = RankRecord {
        version: RECORD_VERSION,
        players: map,
    };
    let text = serde_json::to_string_pretty(&record)?;
    store.set(RANK_RECORD_KEY, &text)
}

/// Stores `score` only if it beats the current best. Returns whether it did.
pub fn apply_keep_max(map: &mut RankMap, name: &str, score: u64) -> bool {
    match map.get(name) {
        Some(previous) if *previous >= score => false,
        _ => {
            map.insert(name.to_string(), score);
            true
        }
    }
}

/// Highest `n` scores, padded with placeholder slots up to `n`.
pub fn top_slots(map: &RankMap, n: usize) -> Vec<RankSlot> {
    let mut entries: Vec<RankEntry> = map
        .iter()
        .map(|(name, score)| RankEntry {
            name: name.clone(),
            score: *score,
        })
        .collect();
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries.truncate(n);

    let mut slots: Vec<RankSlot> = entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| RankSlot {
            rank: idx + 1,
            entry: Some(entry),
        })
        .collect();
    while slots.len() < n {
        slots.push(RankSlot::placeholder(slots.len() + 1));
    }
    slots
}

/// Best-score table over a remote store with a local fallback.
pub struct RankingStore<R, S> {
    remote: R,
    local: S,
    local_clear_secret: String,
    local_lock: Mutex<()>,
}

impl<R: RemoteRanking, S: KeyValueStore> RankingStore<R, S> {
    pub fn new(remote: R, local: S, local_clear_secret: impl Into<String>) -> Self {
        Self {
            remote,
            local,
            local_clear_secret: local_clear_secret.into(),
            local_lock: Mutex::new(()),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn local(&self) -> &S {
        &self.local
    }

    pub async fn load_all(&self) -> RankMap {
        match self.remote.fetch_map().await {
            Ok(map) => return map,
            Err(error) => debug!(%error, "[ranking-store] remote load failed, using local"),
        }
        match load_local_map(&self.local) {
            Ok(map) => map,
            Err(error) => {
                warn!(%error, "[ranking-store] local load failed");
                RankMap::new()
            }
        }
    }

    pub async fn upsert_best(&self, name: &str, score: u64) -> UpsertOutcome {
        let Some(key) = ranking_key(name) else {
            return UpsertOutcome::Ignored;
        };
        match self.remote.submit(&key, score).await {
            Ok(()) => return UpsertOutcome::Remote,
            Err(error) => debug!(%error, "[ranking-store] remote submit failed, using local"),
        }

        let Ok(_guard) = self.local_lock.lock() else {
            warn!("[ranking-store] local lock poisoned");
            return UpsertOutcome::Dropped;
        };
        let result = load_local_map(&self.local).and_then(|mut map| {
            let updated = apply_keep_max(&mut map, &key, score);
            if updated {
                save_local_map(&self.local, &map)?;
            }
            Ok(updated)
        });
        match result {
            Ok(updated) => UpsertOutcome::Local { updated },
            Err(error) => {
                warn!(%error, "[ranking-store] local submit failed");
                UpsertOutcome::Dropped
            }
        }
    }

    pub async fn top_n(&self, n: usize) -> Vec<RankSlot> {
        let map = self.load_all().await;
        top_slots(&map, n)
    }

    /// Remote first. An explicit rejection is final; only an absent remote
    /// allows the local clear, and only with the local admin secret.
    pub async fn clear(&self, secret: &str) -> Result<ClearOutcome, ClearError> {
        if secret.trim().is_empty() {
            return Err(ClearError::MissingSecret);
        }
        match self.remote.clear(secret).await {
            Ok(()) => {
                info!("[ranking-store] remote ranking cleared");
                return Ok(ClearOutcome::Remote);
            }
            Err(RemoteError::Unauthorized) => return Err(ClearError::Unauthorized),
            Err(RemoteError::Rejected(reason)) => return Err(ClearError::Rejected(reason)),
            Err(error) => debug!(%error, "[ranking-store] remote clear unavailable"),
        }

        if secret != self.local_clear_secret {
            return Err(ClearError::NotConfigured);
        }
        let _guard = self.local_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.local.delete(RANK_RECORD_KEY)?;
        info!("[ranking-store] local ranking cleared");
        Ok(ClearOutcome::LocalFallback)
    }
}
