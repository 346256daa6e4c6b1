//! FaceTrust gate: password, face, liveness and TOTP checks with biometric
//! uniqueness across enrolled identities.
//!
//! The entry point is [`EnrollmentOrchestrator`], which runs registration,
//! login and face-update flows over an [`database::IdentityStore`] and an
//! [`database::AttemptStore`].

pub mod biometric;
pub mod clock;
pub mod config;
pub mod database;
pub mod enrollment;
pub mod error;
pub mod security;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use enrollment::EnrollmentOrchestrator;
pub use error::{GateError, TwoFactorFallback};
