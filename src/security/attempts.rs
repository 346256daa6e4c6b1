use chrono::Duration;
use log::debug;
use std::sync::Arc;

use crate::clock::Clock;
use crate::database::{AttemptRecord, AttemptStore, StoreError};

/// Failed-login counter with a rolling window.
///
/// The ledger only counts. Deciding what a high count means (offering a
/// TOTP fallback, demanding 2FA setup) is left to the caller.
#[derive(Clone)]
pub struct AttemptLedger {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl AttemptLedger {
    pub fn new(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self { store, clock, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one more failure for `identifier`.
    ///
    /// A record whose window has lapsed starts again from one. Returns the
    /// new count. Concurrent failures may undercount by one.
    pub fn record_failure(&self, identifier: &str) -> Result<u32, StoreError> {
        let key = normalize(identifier);
        let now = self.clock.now();

        let count = match self.store.get_attempt(&key)? {
            Some(existing) if now - existing.last_attempt <= self.window => existing.count.saturating_add(1),
            _ => 1,
        };

        self.store.put_attempt(&AttemptRecord {
            key,
            count,
            last_attempt: now,
        })?;

        debug!("Recorded failed attempt ({} in window)", count);
        Ok(count)
    }

    /// Failures inside the window; an expired record reads as zero
    pub fn count(&self, identifier: &str) -> Result<u32, StoreError> {
        let key = normalize(identifier);
        let now = self.clock.now();

        Ok(match self.store.get_attempt(&key)? {
            Some(record) if now - record.last_attempt <= self.window => record.count,
            _ => 0,
        })
    }

    pub fn clear(&self, identifier: &str) -> Result<(), StoreError> {
        self.store.delete_attempt(&normalize(identifier))
    }
}

/// Case- and whitespace-insensitive ledger key
pub fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}
