//! Indexer cursor: checkpoint position plus the per-chain run lock.
//!
//! A chain has at most one live lock. A lock is either absent, held and
//! unexpired, or expired and reclaimable by the next runner. The methods here
//! are the reference semantics; SQL backends express the same conditions in
//! their `WHERE` clauses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Longest error message kept in `last_error`.
pub const MAX_ERROR_LEN: usize = 500;

/// Outcome of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// State of the run lock at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held { token: String, expires_at: DateTime<Utc> },
    Expired { token: String },
}

/// One row per chain: checkpoint + lock + last-run bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerCursor {
    pub chain_id: u64,
    /// Last block whose logs were fully applied.
    pub last_processed_block: Option<u64>,
    pub lock_token: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl IndexerCursor {
    pub fn new(chain_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            chain_id,
            last_processed_block: None,
            lock_token: None,
            lock_expires_at: None,
            last_run_status: None,
            last_error: None,
            last_run_started_at: None,
            last_run_finished_at: None,
            updated_at: now,
        }
    }

    pub fn lock_state(&self, now: DateTime<Utc>) -> LockState {
        match (&self.lock_token, self.lock_expires_at) {
            (None, _) => LockState::Free,
            (Some(token), Some(expires_at)) if expires_at > now => LockState::Held {
                token: token.clone(),
                expires_at,
            },
            (Some(token), _) => LockState::Expired {
                token: token.clone(),
            },
        }
    }

    /// Take the lock if it is free or expired. Returns `false` on contention.
    pub fn try_lock(&mut self, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if matches!(self.lock_state(now), LockState::Held { .. }) {
            return false;
        }
        self.lock_token = Some(token.to_string());
        self.lock_expires_at = Some(expires_at);
        self.last_run_status = Some(RunStatus::Running);
        self.last_error = None;
        self.last_run_started_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Returns `true` if `token` holds an unexpired lock.
    pub fn is_held_by(&self, token: &str, now: DateTime<Utc>) -> bool {
        matches!(self.lock_state(now), LockState::Held { token: ref t, .. } if t == token)
    }

    /// Advance the checkpoint and extend the lock. Fails if `token` no longer
    /// holds a live lock.
    pub fn checkpoint(
        &mut self,
        token: &str,
        block: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        if !self.is_held_by(token, now) {
            return Err(IndexerError::LockLost {
                chain_id: self.chain_id,
                token: token.to_string(),
            });
        }
        self.last_processed_block = Some(block);
        self.lock_expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(())
    }

    /// Clear the lock if `token` still owns it and record the run outcome.
    /// Returns `false` when the lock had already changed hands.
    pub fn release(
        &mut self,
        token: &str,
        status: RunStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.lock_token.as_deref() != Some(token) {
            return false;
        }
        self.lock_token = None;
        self.lock_expires_at = None;
        self.last_run_status = Some(status);
        self.last_error = error.map(truncate_error);
        self.last_run_finished_at = Some(now);
        self.updated_at = now;
        true
    }
}

/// Cap an error message at [`MAX_ERROR_LEN`] characters.
pub fn truncate_error(msg: &str) -> String {
    match msg.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => msg[..idx].to_string(),
        None => msg.to_string(),
    }
}
