pub mod biometric;
pub mod identity;
pub mod two_factor;
pub mod utils;

use anyhow::{Context, Result};
use std::sync::Arc;

use facetrust::clock::{Clock, SystemClock};
use facetrust::config::Config;
use facetrust::database::{AuditEventType, AuditLog, IdentityRecord, IdentityStore, SqliteStore};
use facetrust::security::attempts::normalize;
use facetrust::EnrollmentOrchestrator;

/// Store and orchestrator opened from the configuration
pub struct Gate {
    pub store: Arc<SqliteStore>,
    pub orchestrator: EnrollmentOrchestrator,
    clock: Arc<dyn Clock>,
}

impl Gate {
    pub fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.database).context("Failed to open database")?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let orchestrator = EnrollmentOrchestrator::from_config(config, store.clone(), clock.clone())?;
        Ok(Self {
            store,
            orchestrator,
            clock,
        })
    }

    /// Look up an identity by email, failing when there is none
    pub fn identity_by_email(&self, email: &str) -> Result<IdentityRecord> {
        self.store
            .find_by_email(&normalize(email))?
            .with_context(|| format!("No identity registered with email {}", email))
    }

    pub fn audit(&self, event_type: AuditEventType, identity_id: &str, details: &str) {
        let entry = AuditLog::new(
            event_type,
            Some(identity_id.to_string()),
            Some(details.to_string()),
            self.clock.now(),
        );
        if let Err(e) = self.store.append_audit(&entry) {
            log::warn!("Failed to write audit entry: {}", e);
        }
    }
}
