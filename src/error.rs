use serde::{Deserialize, Serialize};

use crate::biometric::{DescriptorError, LivenessError};
use crate::database::StoreError;
use crate::security::totp::VaultError;

/// What the caller can do after hitting the failed-login threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwoFactorFallback {
    /// The identity has 2FA enabled; a TOTP code can complete the login
    Available,
    /// 2FA must be set up before the account can be used again
    SetupRequired,
}

/// Errors that cross the orchestrator boundary.
///
/// Every variant maps to one stable machine-readable code (`code()`) and one
/// user-facing message (`user_message()`). Neither ever names the identity a
/// face matched against.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Liveness was not established for this session")]
    NotLive,

    #[error("Face already enrolled under another identity")]
    DuplicateIdentity,

    #[error("Face does not match the enrolled identity ({remaining} attempts left)")]
    ContinuityMismatch { remaining: u32 },

    #[error("Face does not match at login ({remaining} attempts left)")]
    FaceMismatch { remaining: u32 },

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Too many failed attempts")]
    RateLimited { fallback: TwoFactorFallback },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Session aborted")]
    SessionAborted,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email or national id already registered")]
    AlreadyEnrolled,

    #[error("Unknown or inactive identity")]
    UnknownIdentity,

    #[error("Step not allowed in the current state: {0}")]
    InvalidStep(String),

    #[error("No two-factor secret is associated with this flow")]
    TwoFactorNotConfigured,
}

impl GateError {
    /// Stable code for transports and clients
    pub fn code(&self) -> &'static str {
        match self {
            GateError::MalformedInput(_) => "MALFORMED_INPUT",
            GateError::NotLive => "NOT_LIVE",
            GateError::DuplicateIdentity => "DUPLICATE_IDENTITY",
            GateError::ContinuityMismatch { .. } => "CONTINUITY_MISMATCH",
            GateError::FaceMismatch { .. } => "FACE_MISMATCH",
            GateError::InvalidCode => "INVALID_CODE",
            GateError::RateLimited { .. } => "RATE_LIMITED",
            GateError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            GateError::SessionAborted => "SESSION_ABORTED",
            GateError::InvalidCredentials => "INVALID_CREDENTIALS",
            GateError::AlreadyEnrolled => "ALREADY_ENROLLED",
            GateError::UnknownIdentity => "UNKNOWN_IDENTITY",
            GateError::InvalidStep(_) => "INVALID_STEP",
            GateError::TwoFactorNotConfigured => "TWO_FACTOR_NOT_CONFIGURED",
        }
    }

    /// Message safe to show an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            GateError::MalformedInput(_) => "Some of the submitted data is invalid. Please check it and try again.",
            GateError::NotLive => "We could not confirm a live face. Please restart the face scan.",
            GateError::DuplicateIdentity => "This face is already registered with another account.",
            GateError::ContinuityMismatch { .. } => "The face does not match the one on record. Please try again.",
            GateError::FaceMismatch { .. } => "We could not verify your face. Please try again.",
            GateError::InvalidCode => "The verification code is not valid.",
            GateError::RateLimited { fallback: TwoFactorFallback::Available } => {
                "Too many failed attempts. Use your authenticator app code to continue."
            }
            GateError::RateLimited { fallback: TwoFactorFallback::SetupRequired } => {
                "Too many failed attempts. Set up two-factor authentication before trying again."
            }
            GateError::StorageUnavailable(_) => "The service is temporarily unavailable. Please try again later.",
            GateError::SessionAborted => "This session has been closed. Please start over.",
            GateError::InvalidCredentials => "Invalid email or password.",
            GateError::AlreadyEnrolled => "An account with these details already exists.",
            GateError::UnknownIdentity => "The account could not be found.",
            GateError::InvalidStep(_) => "This action is not available right now.",
            GateError::TwoFactorNotConfigured => "Two-factor authentication has not been set up for this flow.",
        }
    }

    /// Whether the caller may retry within the same session
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            GateError::SessionAborted | GateError::StorageUnavailable(_) | GateError::UnknownIdentity
        )
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        GateError::StorageUnavailable(err.to_string())
    }
}

impl From<VaultError> for GateError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::MalformedCode => GateError::MalformedInput("verification code must be 6 digits".to_string()),
            VaultError::InvalidLabel(label) => GateError::MalformedInput(format!("invalid secret label: {}", label)),
            VaultError::NotConfigured => GateError::TwoFactorNotConfigured,
            VaultError::Store(e) => GateError::StorageUnavailable(e.to_string()),
            VaultError::Totp(msg) => GateError::MalformedInput(msg),
            VaultError::Sealing(msg) => GateError::StorageUnavailable(msg),
        }
    }
}

impl From<DescriptorError> for GateError {
    fn from(err: DescriptorError) -> Self {
        GateError::MalformedInput(err.to_string())
    }
}

impl From<LivenessError> for GateError {
    fn from(_: LivenessError) -> Self {
        GateError::NotLive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(GateError::NotLive, "NOT_LIVE", true)]
    #[test_case(GateError::DuplicateIdentity, "DUPLICATE_IDENTITY", true)]
    #[test_case(GateError::ContinuityMismatch { remaining: 2 }, "CONTINUITY_MISMATCH", true)]
    #[test_case(GateError::FaceMismatch { remaining: 1 }, "FACE_MISMATCH", true)]
    #[test_case(GateError::SessionAborted, "SESSION_ABORTED", false)]
    #[test_case(GateError::StorageUnavailable("timeout".into()), "STORAGE_UNAVAILABLE", false)]
    #[test_case(GateError::RateLimited { fallback: TwoFactorFallback::Available }, "RATE_LIMITED", true)]
    fn test_error_codes(err: GateError, code: &str, recoverable: bool) {
        assert_eq!(err.code(), code);
        assert_eq!(err.is_recoverable(), recoverable);
        assert!(!err.user_message().is_empty());
    }

    #[test]
    fn test_storage_message_hides_details() {
        let err = GateError::StorageUnavailable("database is locked at /var/lib/facetrust.db".into());
        assert!(!err.user_message().contains("/var/lib"));
    }
}
