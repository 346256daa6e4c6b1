//! Multi-step flows that put the gate together: registration, login and
//! face update.
//!
//! Flow state lives in session values owned by the caller
//! ([`EnrollmentSession`], [`LoginSession`], [`UpdateSession`]). The
//! orchestrator holds only shared collaborators, so one instance can serve
//! any number of concurrent flows. Nothing a flow captures reaches storage
//! before its commit step.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;

use crate::biometric::{find_duplicate, EnrolledDescriptor, FaceDescriptor, LivenessGate, LivenessSession};
use crate::clock::Clock;
use crate::config::{BiometricConfig, Config};
use crate::database::{AttemptStore, AuditEventType, AuditLog, IdentityStore};
use crate::error::GateError;
use crate::security::encryption::derive_key_from_password;
use crate::security::{AttemptLedger, Argon2Hasher, CredentialHasher, SecretSealer, SecretVault};
use crate::user::{DefaultFormValidator, FormValidator};

mod login;
mod registration;
pub mod retry;
pub mod session;
mod update;

pub use retry::{Failed, Retry, RetryLimit};
pub use session::{
    AuthenticatedPrincipal, EnrollmentSession, EnrollmentStep, FlowSession, LivenessTicket, LoginSession, LoginStep,
    PendingEnrollment, PendingUpdate, StepPayload, StepReport, UpdateSession, UpdateStep,
};

// Salt for deriving a pepper when none is configured
const PEPPER_DERIVATION_SALT: &[u8] = b"facetrust-password-pepper";

/// Sequences credential checks, liveness, face uniqueness and TOTP into
/// registration, login and update flows.
pub struct EnrollmentOrchestrator {
    store: Arc<dyn IdentityStore>,
    ledger: AttemptLedger,
    vault: SecretVault,
    hasher: Arc<dyn CredentialHasher>,
    validator: Arc<dyn FormValidator>,
    liveness: LivenessGate,
    clock: Arc<dyn Clock>,
    policy: BiometricConfig,
    max_failed_attempts: u32,
}

impl EnrollmentOrchestrator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        attempts: Arc<dyn AttemptStore>,
        hasher: Arc<dyn CredentialHasher>,
        sealer: SecretSealer,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let ledger = AttemptLedger::new(attempts, clock.clone(), config.security.attempt_window());
        let vault = SecretVault::new(
            store.clone(),
            sealer,
            clock.clone(),
            config.security.totp_issuer.clone(),
            config.security.totp_skew_steps,
        );

        Self {
            store,
            ledger,
            vault,
            hasher,
            validator: Arc::new(DefaultFormValidator::default()),
            liveness: LivenessGate::new(config.liveness.clone()),
            clock,
            policy: config.biometric.clone(),
            max_failed_attempts: config.security.max_failed_attempts,
        }
    }

    /// Build every collaborator from `config` on top of one store
    pub fn from_config<S>(config: &Config, store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self>
    where
        S: IdentityStore + AttemptStore + 'static,
    {
        let security = &config.security;
        let hasher = match &security.password_pepper {
            Some(pepper) => Argon2Hasher::with_hex_pepper(security.password_memory_kib, pepper)
                .context("Invalid password pepper")?,
            None => {
                warn!("No password pepper configured; deriving one from the vault passphrase");
                let pepper = derive_key_from_password(
                    &security.vault_passphrase,
                    PEPPER_DERIVATION_SALT,
                    security.vault_kdf_iterations,
                );
                Argon2Hasher::new(security.password_memory_kib, pepper)
            }
        };
        let sealer = SecretSealer::from_passphrase(
            &security.vault_passphrase,
            security.vault_salt.as_bytes(),
            security.vault_kdf_iterations,
        );

        Ok(Self::new(store.clone(), store, Arc::new(hasher), sealer, clock, config))
    }

    /// Replace the default registration form policy
    pub fn with_validator(mut self, validator: Arc<dyn FormValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    pub fn liveness_gate(&self) -> &LivenessGate {
        &self.liveness
    }

    /// Open a liveness session for `flow`. Its verdict is the only one the
    /// flow will accept next.
    pub fn start_liveness<F: FlowSession>(&self, flow: &mut F) -> Result<LivenessSession, GateError> {
        if flow.is_aborted() {
            return Err(GateError::SessionAborted);
        }
        if !flow.accepts_liveness() {
            return Err(GateError::InvalidStep("liveness is not expected at this step".to_string()));
        }
        match flow.liveness_ticket().issue(&self.liveness) {
            Err(GateError::SessionAborted) => {
                warn!("Liveness attempts exhausted; aborting flow");
                flow.abort();
                Err(GateError::SessionAborted)
            }
            other => other,
        }
    }

    fn accept_liveness<F: FlowSession>(
        &self,
        flow: &mut F,
        verdict: &crate::biometric::LivenessVerdict,
    ) -> Result<(), GateError> {
        match flow.liveness_ticket().accept(verdict) {
            Err(GateError::SessionAborted) => {
                warn!("Liveness attempts exhausted; aborting flow");
                flow.abort();
                Err(GateError::SessionAborted)
            }
            other => other,
        }
    }

    fn parse_descriptor(values: &[f64]) -> Result<FaceDescriptor, GateError> {
        Ok(FaceDescriptor::from_f64(values)?)
    }

    /// Whether `candidate` matches any enrolled face other than `exclude_id`'s
    fn is_duplicate(&self, candidate: &FaceDescriptor, exclude_id: Option<&str>) -> Result<bool, GateError> {
        let enrolled = self.store.enrolled_descriptors()?;
        Ok(self.duplicate_in(candidate, &enrolled, exclude_id))
    }

    fn duplicate_in(&self, candidate: &FaceDescriptor, enrolled: &[EnrolledDescriptor], exclude_id: Option<&str>) -> bool {
        find_duplicate(candidate, enrolled, self.policy.duplicate_threshold, exclude_id).is_some()
    }

    fn matches_own_face(&self, stored: &FaceDescriptor, candidate: &FaceDescriptor) -> bool {
        stored.distance_to(candidate) < self.policy.continuity_threshold
    }

    /// Audit failures are logged, never surfaced
    fn audit(&self, event_type: AuditEventType, identity_id: Option<&str>, details: Option<String>) {
        let entry = AuditLog::new(event_type, identity_id.map(str::to_string), details, self.clock.now());
        if let Err(e) = self.store.append_audit(&entry) {
            warn!("Failed to write audit entry {}: {}", event_type.as_str(), e);
        } else {
            debug!("Audit: {}", event_type.as_str());
        }
    }
}

fn rejected(payload: &StepPayload, step: impl std::fmt::Debug) -> GateError {
    GateError::InvalidStep(format!("{} is not accepted at {:?}", payload.kind(), step))
}
