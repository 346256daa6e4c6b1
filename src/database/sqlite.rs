use chrono::{DateTime, Utc};
use log::{debug, warn};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::models::{AttemptRecord, AuditEventType, AuditLog, IdentityRecord, Role, TwoFactorBinding};
use super::{AttemptStore, CommitOutcome, DbPool, IdentityStore, StoreError};
use crate::biometric::{EnrolledDescriptor, FaceDescriptor};
use crate::config::DatabaseConfig;

const IDENTITY_COLUMNS: &str = "id, email, first_name, last_name, national_id, phone, address, \
     credential_hash, role, active, descriptor, face_capture, created_at, updated_at";

/// SQLite-backed store over an r2d2 pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open the database at `config.path`, creating the schema if needed
    pub fn open(config: &DatabaseConfig) -> anyhow::Result<Self> {
        Ok(Self::new(super::initialize(config)?))
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    fn with_two_factor(&self, conn: &Connection, record: Option<IdentityRecord>) -> Result<Option<IdentityRecord>, StoreError> {
        match record {
            Some(mut record) => {
                record.two_factor = load_two_factor(conn, &record.id)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn find_identity_by(&self, column: &str, value: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM identities WHERE {} = ?1", IDENTITY_COLUMNS, column);
        let record = conn.query_row(&sql, params![value], identity_from_row).optional()?;
        self.with_two_factor(&conn, record)
    }
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn identity_from_row(row: &Row) -> rusqlite::Result<IdentityRecord> {
    let role: String = row.get(8)?;
    let descriptor: Option<String> = row.get(10)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    let descriptor = match descriptor {
        Some(json) => Some(serde_json::from_str::<FaceDescriptor>(&json).map_err(|e| conversion_error(10, e))?),
        None => None,
    };

    Ok(IdentityRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        national_id: row.get(4)?,
        phone: row.get(5)?,
        address: row.get(6)?,
        credential_hash: row.get(7)?,
        role: Role::from_str(&role).map_err(|e| conversion_error(8, e))?,
        active: row.get(9)?,
        descriptor,
        face_capture: row.get(11)?,
        two_factor: None,
        created_at: parse_time(12, &created_at)?,
        updated_at: parse_time(13, &updated_at)?,
    })
}

fn load_two_factor(conn: &Connection, identity_id: &str) -> Result<Option<TwoFactorBinding>, StoreError> {
    let binding = conn
        .query_row(
            "SELECT identity_id, sealed_secret, enabled, enabled_at, updated_at
             FROM two_factor_auth WHERE identity_id = ?1",
            params![identity_id],
            |row| {
                let enabled_at: Option<String> = row.get(3)?;
                let updated_at: String = row.get(4)?;
                Ok(TwoFactorBinding {
                    identity_id: row.get(0)?,
                    sealed_secret: row.get(1)?,
                    enabled: row.get(2)?,
                    enabled_at: enabled_at.as_deref().map(|t| parse_time(3, t)).transpose()?,
                    updated_at: parse_time(4, &updated_at)?,
                })
            },
        )
        .optional()?;
    Ok(binding)
}

fn upsert_two_factor(conn: &Connection, binding: &TwoFactorBinding) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO two_factor_auth (identity_id, sealed_secret, enabled, enabled_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(identity_id) DO UPDATE SET
            sealed_secret = excluded.sealed_secret,
            enabled = excluded.enabled,
            enabled_at = excluded.enabled_at,
            updated_at = excluded.updated_at",
        params![
            binding.identity_id,
            binding.sealed_secret,
            binding.enabled,
            binding.enabled_at.map(|t| t.to_rfc3339()),
            binding.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Active descriptors; rows that fail to decode are skipped
fn load_descriptors(conn: &Connection) -> Result<Vec<EnrolledDescriptor>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, descriptor FROM identities WHERE active = 1 AND descriptor IS NOT NULL")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut enrolled = Vec::new();
    for row in rows {
        let (identity_id, json) = row?;
        match serde_json::from_str::<FaceDescriptor>(&json) {
            Ok(descriptor) => enrolled.push(EnrolledDescriptor { identity_id, descriptor }),
            Err(e) => warn!("Skipping undecodable stored descriptor: {}", e),
        }
    }
    Ok(enrolled)
}

impl IdentityStore for SqliteStore {
    fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.find_identity_by("id", id)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.find_identity_by("email", email)
    }

    fn find_by_national_id(&self, national_id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.find_identity_by("national_id", national_id)
    }

    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM identities ORDER BY created_at", IDENTITY_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], identity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if let Some(record) = self.with_two_factor(&conn, Some(record))? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn enrolled_descriptors(&self) -> Result<Vec<EnrolledDescriptor>, StoreError> {
        let conn = self.conn()?;
        load_descriptors(&conn)
    }

    fn commit_identity(
        &self,
        record: &IdentityRecord,
        conflicts: &dyn Fn(&[EnrolledDescriptor]) -> bool,
    ) -> Result<CommitOutcome, StoreError> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock before the re-scan
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let enrolled = load_descriptors(&tx)?;
        if conflicts(&enrolled) {
            debug!("Commit rejected by uniqueness re-check");
            return Ok(CommitOutcome::Conflict);
        }

        let descriptor = record
            .descriptor
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        tx.execute(
            "INSERT INTO identities (id, email, first_name, last_name, national_id, phone, address,
                credential_hash, role, active, descriptor, face_capture, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                national_id = excluded.national_id,
                phone = excluded.phone,
                address = excluded.address,
                credential_hash = excluded.credential_hash,
                role = excluded.role,
                active = excluded.active,
                descriptor = excluded.descriptor,
                face_capture = excluded.face_capture,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.email,
                record.first_name,
                record.last_name,
                record.national_id,
                record.phone,
                record.address,
                record.credential_hash,
                record.role.as_str(),
                record.active,
                descriptor,
                record.face_capture,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;

        if let Some(binding) = &record.two_factor {
            upsert_two_factor(&tx, binding)?;
        }

        tx.commit()?;
        Ok(CommitOutcome::Written)
    }

    fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE identities SET active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    fn delete_identity(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM two_factor_auth WHERE identity_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn get_two_factor(&self, identity_id: &str) -> Result<Option<TwoFactorBinding>, StoreError> {
        let conn = self.conn()?;
        load_two_factor(&conn, identity_id)
    }

    fn put_two_factor(&self, binding: &TwoFactorBinding) -> Result<(), StoreError> {
        let conn = self.conn()?;
        upsert_two_factor(&conn, binding)
    }

    fn append_audit(&self, entry: &AuditLog) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_logs (id, event_type, identity_id, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.event_type.as_str(),
                entry.identity_id,
                entry.details,
                entry.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn audit_entries(&self, identity_id: Option<&str>) -> Result<Vec<AuditLog>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, identity_id, details, timestamp FROM audit_logs
             WHERE ?1 IS NULL OR identity_id = ?1
             ORDER BY timestamp, rowid",
        )?;
        let entries = stmt
            .query_map(params![identity_id], |row| {
                let event_type: String = row.get(1)?;
                let timestamp: String = row.get(4)?;
                Ok(AuditLog {
                    id: row.get(0)?,
                    event_type: AuditEventType::from_str(&event_type).map_err(|e| conversion_error(1, e))?,
                    identity_id: row.get(2)?,
                    details: row.get(3)?,
                    timestamp: parse_time(4, &timestamp)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl AttemptStore for SqliteStore {
    fn get_attempt(&self, key: &str) -> Result<Option<AttemptRecord>, StoreError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT key, count, last_attempt FROM login_attempts WHERE key = ?1",
                params![key],
                |row| {
                    let last_attempt: String = row.get(2)?;
                    Ok(AttemptRecord {
                        key: row.get(0)?,
                        count: row.get(1)?,
                        last_attempt: parse_time(2, &last_attempt)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn put_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO login_attempts (key, count, last_attempt) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET count = excluded.count, last_attempt = excluded.last_attempt",
            params![record.key, record.count, record.last_attempt.to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete_attempt(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM login_attempts WHERE key = ?1", params![key])?;
        Ok(())
    }
}
