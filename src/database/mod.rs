use anyhow::{Context, Result};
use log::{debug, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use crate::biometric::EnrolledDescriptor;
use crate::config::DatabaseConfig;

pub mod memory;
pub mod models;
mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use models::{AttemptRecord, AuditEventType, AuditLog, IdentityRecord, Role, TwoFactorBinding};
pub use sqlite::SqliteStore;

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable, locked past its timeout, or otherwise failing
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or foreign-key constraint rejected the write
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// A stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::Constraint(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Result of a guarded identity write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Written,
    /// The uniqueness re-check found a match; nothing was written
    Conflict,
}

/// Identity persistence.
///
/// `commit_identity` is the only write path for identity rows. It loads the
/// enabled descriptors, asks `conflicts` whether the record would break
/// uniqueness, and writes the record (and its two-factor binding, if any)
/// without letting another commit interleave between check and write.
pub trait IdentityStore: Send + Sync {
    fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError>;

    fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError>;

    fn find_by_national_id(&self, national_id: &str) -> Result<Option<IdentityRecord>, StoreError>;

    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    /// Descriptors of every active identity
    fn enrolled_descriptors(&self) -> Result<Vec<EnrolledDescriptor>, StoreError>;

    fn commit_identity(
        &self,
        record: &IdentityRecord,
        conflicts: &dyn Fn(&[EnrolledDescriptor]) -> bool,
    ) -> Result<CommitOutcome, StoreError>;

    /// Returns false when no such identity exists
    fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError>;

    /// Removes the identity and its two-factor binding; false when absent
    fn delete_identity(&self, id: &str) -> Result<bool, StoreError>;

    fn get_two_factor(&self, identity_id: &str) -> Result<Option<TwoFactorBinding>, StoreError>;

    fn put_two_factor(&self, binding: &TwoFactorBinding) -> Result<(), StoreError>;

    fn append_audit(&self, entry: &AuditLog) -> Result<(), StoreError>;

    /// Audit entries, oldest first, optionally for one identity
    fn audit_entries(&self, identity_id: Option<&str>) -> Result<Vec<AuditLog>, StoreError>;
}

/// Keyed failed-attempt records
pub trait AttemptStore: Send + Sync {
    fn get_attempt(&self, key: &str) -> Result<Option<AttemptRecord>, StoreError>;

    fn put_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError>;

    fn delete_attempt(&self, key: &str) -> Result<(), StoreError>;
}

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open (creating if needed) the database described by `config` and return a pool
pub fn initialize(config: &DatabaseConfig) -> Result<DbPool> {
    let db_path = Path::new(&config.path);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(busy_timeout)
        .build(manager)
        .context("Failed to create database connection pool")?;

    let mut conn = pool.get().context("Failed to get a database connection")?;
    debug!("Ensuring schema at {}", config.path);
    schema::create_schema(&mut conn).context("Failed to create database schema")?;

    info!("Database initialized at {}", config.path);
    Ok(pool)
}
