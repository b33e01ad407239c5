//! Points ledger used to record the outcome of finished games
//!
//! Storage of accounts is outside the server; games only need a way to add
//! points for a batch of usernames once a game is won.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Batch point increments, keyed by username
pub trait PointsLedger: Send + Sync {
    fn increment_points(&self, deltas: &HashMap<String, i64>) -> Result<(), LedgerError>;
}

/// Ledger kept in process memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    points: Mutex<HashMap<String, i64>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total for a player, zero if never awarded
    pub fn points(&self, username: &str) -> i64 {
        self.points
            .lock()
            .map(|points| points.get(username).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl PointsLedger for MemoryLedger {
    fn increment_points(&self, deltas: &HashMap<String, i64>) -> Result<(), LedgerError> {
        let mut points = self
            .points
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        for (username, delta) in deltas {
            *points.entry(username.clone()).or_insert(0) += delta;
        }
        Ok(())
    }
}
