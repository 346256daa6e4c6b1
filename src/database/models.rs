use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::biometric::FaceDescriptor;

/// Identity role
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// TOTP secret attached to an identity. The secret is stored sealed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TwoFactorBinding {
    pub identity_id: String,
    pub sealed_secret: String,
    pub enabled: bool,
    pub enabled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// An enrolled principal
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IdentityRecord {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub credential_hash: String,
    pub role: Role,
    pub active: bool,
    pub descriptor: Option<FaceDescriptor>,
    #[serde(skip)]
    pub face_capture: Option<Vec<u8>>,
    pub two_factor: Option<TwoFactorBinding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(
        email: String,
        first_name: String,
        last_name: String,
        national_id: String,
        credential_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            first_name,
            last_name,
            national_id,
            phone: None,
            address: None,
            credential_hash,
            role: Role::User,
            active: true,
            descriptor: None,
            face_capture: None,
            two_factor: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn two_factor_enabled(&self) -> bool {
        self.two_factor.as_ref().map_or(false, |tf| tf.enabled)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Failed-login counter for one normalised identifier
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttemptRecord {
    pub key: String,
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Audit event type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    IdentityEnrolled,
    IdentityUpdated,
    IdentityDeactivated,
    IdentityDeleted,
    LoginSucceeded,
    LoginFailed,
    DuplicateRejected,
    ContinuityFailed,
    TotpEnabled,
    TotpDisabled,
}

impl AuditEventType {
    pub fn as_str(&self) -> &str {
        match self {
            AuditEventType::IdentityEnrolled => "identity_enrolled",
            AuditEventType::IdentityUpdated => "identity_updated",
            AuditEventType::IdentityDeactivated => "identity_deactivated",
            AuditEventType::IdentityDeleted => "identity_deleted",
            AuditEventType::LoginSucceeded => "login_succeeded",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::DuplicateRejected => "duplicate_rejected",
            AuditEventType::ContinuityFailed => "continuity_failed",
            AuditEventType::TotpEnabled => "totp_enabled",
            AuditEventType::TotpDisabled => "totp_disabled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "identity_enrolled" => Ok(AuditEventType::IdentityEnrolled),
            "identity_updated" => Ok(AuditEventType::IdentityUpdated),
            "identity_deactivated" => Ok(AuditEventType::IdentityDeactivated),
            "identity_deleted" => Ok(AuditEventType::IdentityDeleted),
            "login_succeeded" => Ok(AuditEventType::LoginSucceeded),
            "login_failed" => Ok(AuditEventType::LoginFailed),
            "duplicate_rejected" => Ok(AuditEventType::DuplicateRejected),
            "continuity_failed" => Ok(AuditEventType::ContinuityFailed),
            "totp_enabled" => Ok(AuditEventType::TotpEnabled),
            "totp_disabled" => Ok(AuditEventType::TotpDisabled),
            _ => Err(format!("Invalid audit event type: {}", s)),
        }
    }
}

/// Append-only audit entry
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditLog {
    pub id: String,
    pub event_type: AuditEventType,
    pub identity_id: Option<String>,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(
        event_type: AuditEventType,
        identity_id: Option<String>,
        details: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            identity_id,
            details,
            timestamp,
        }
    }
}
