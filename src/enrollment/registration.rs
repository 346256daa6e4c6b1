use log::{debug, info, warn};

use super::session::{EnrollmentSession, EnrollmentStep, PendingEnrollment, StepPayload, StepReport, ValidatedRegistration};
use super::{rejected, EnrollmentOrchestrator};
use crate::database::{AuditEventType, CommitOutcome, IdentityRecord, StoreError};
use crate::error::GateError;
use crate::security::attempts::normalize;
use crate::user::RegistrationForm;

impl EnrollmentOrchestrator {
    pub fn begin_enrollment(&self) -> EnrollmentSession {
        let session = EnrollmentSession::new(self.policy.max_liveness_attempts);
        debug!("Enrollment {} started", session.id());
        session
    }

    /// Apply one registration step.
    ///
    /// Order: `Form` → liveness verdict → `Descriptor` → `RequestTwoFactor`,
    /// then [`commit_enrollment`](Self::commit_enrollment). A failed step
    /// leaves the session where it was so the caller can retry it.
    pub fn advance_enrollment(
        &self,
        session: &mut EnrollmentSession,
        payload: StepPayload,
    ) -> Result<StepReport<EnrollmentStep>, GateError> {
        if session.step == EnrollmentStep::Aborted {
            return Err(GateError::SessionAborted);
        }

        match (session.step, payload) {
            (EnrollmentStep::Started | EnrollmentStep::FormValidated, StepPayload::Form(form)) => {
                session.registration = Some(self.validate_registration(&form)?);
                session.step = EnrollmentStep::FormValidated;
                Ok(StepReport::to(session.step))
            }

            // A fresh proof after a rejected descriptor keeps the flow at LivenessPassed
            (EnrollmentStep::FormValidated | EnrollmentStep::LivenessPassed, StepPayload::Liveness(verdict)) => {
                self.accept_liveness(session, &verdict)?;
                session.step = EnrollmentStep::LivenessPassed;
                Ok(StepReport::to(session.step))
            }

            (EnrollmentStep::LivenessPassed, StepPayload::Descriptor { values, capture }) => {
                let descriptor = Self::parse_descriptor(&values)?;

                if self.is_duplicate(&descriptor, None)? {
                    warn!("Enrollment rejected: face already enrolled");
                    self.audit(AuditEventType::DuplicateRejected, None, Some("enrollment".to_string()));
                    return Err(GateError::DuplicateIdentity);
                }

                session.pending = Some(PendingEnrollment {
                    descriptor,
                    capture,
                    secret: None,
                });
                session.step = EnrollmentStep::DescriptorCaptured;
                Ok(StepReport::to(session.step))
            }

            (EnrollmentStep::DescriptorCaptured | EnrollmentStep::TwoFactorPending, StepPayload::RequestTwoFactor) => {
                let email = session
                    .registration
                    .as_ref()
                    .map(|r| r.form.email.clone())
                    .ok_or_else(|| GateError::InvalidStep("no validated form".to_string()))?;
                let pending = session
                    .pending
                    .as_mut()
                    .ok_or_else(|| GateError::InvalidStep("no captured descriptor".to_string()))?;

                let provisioning = self.vault.generate_secret(&email)?;
                pending.secret = Some(provisioning.secret.clone());
                session.step = EnrollmentStep::TwoFactorPending;

                Ok(StepReport {
                    next_step: session.step,
                    provisioning: Some(provisioning),
                })
            }

            (step, payload) => Err(rejected(&payload, step)),
        }
    }

    /// Verify `code` against the flow's ephemeral secret and create the identity.
    ///
    /// The record, its descriptor and its enabled 2FA binding are written in
    /// one commit, after a last uniqueness re-check under the store's write
    /// guard. Returns the new identity id.
    pub fn commit_enrollment(&self, session: &mut EnrollmentSession, code: &str) -> Result<String, GateError> {
        match session.step {
            EnrollmentStep::TwoFactorPending => {}
            EnrollmentStep::Aborted => return Err(GateError::SessionAborted),
            EnrollmentStep::DescriptorCaptured => return Err(GateError::TwoFactorNotConfigured),
            step => return Err(GateError::InvalidStep(format!("commit is not accepted at {:?}", step))),
        }

        let (registration, pending) = match (&session.registration, &session.pending) {
            (Some(registration), Some(pending)) => (registration, pending),
            _ => return Err(GateError::InvalidStep("enrollment state is incomplete".to_string())),
        };
        let secret = pending.secret.as_ref().ok_or(GateError::TwoFactorNotConfigured)?;

        if !self.vault.verify(secret, code)? {
            debug!("Enrollment {}: TOTP code rejected", session.id);
            return Err(GateError::InvalidCode);
        }

        let form = &registration.form;
        let mut record = IdentityRecord::new(
            form.email.clone(),
            form.first_name.clone(),
            form.last_name.clone(),
            form.national_id.clone(),
            registration.credential_hash.clone(),
            self.clock.now(),
        );
        record.phone = form.phone.clone();
        record.address = form.address.clone();
        record.descriptor = Some(pending.descriptor.clone());
        record.face_capture = pending.capture.clone();
        record.two_factor = Some(self.vault.bind(&record.id, secret)?);

        let candidate = pending.descriptor.clone();
        let outcome = self
            .store
            .commit_identity(&record, &|enrolled| self.duplicate_in(&candidate, enrolled, None));

        match outcome {
            Ok(CommitOutcome::Written) => {}
            Ok(CommitOutcome::Conflict) => {
                warn!("Enrollment rejected at commit: face enrolled concurrently");
                self.audit(AuditEventType::DuplicateRejected, None, Some("enrollment commit".to_string()));
                session.pending = None;
                session.step = EnrollmentStep::LivenessPassed;
                return Err(GateError::DuplicateIdentity);
            }
            Err(StoreError::Constraint(_)) => return Err(GateError::AlreadyEnrolled),
            Err(e) => return Err(e.into()),
        }

        info!("Identity {} enrolled", record.id);
        self.audit(AuditEventType::IdentityEnrolled, Some(&record.id), None);
        self.audit(AuditEventType::TotpEnabled, Some(&record.id), None);

        session.pending = None;
        session.registration = None;
        session.step = EnrollmentStep::Committed;
        session.identity_id = Some(record.id.clone());
        Ok(record.id)
    }

    fn validate_registration(&self, form: &RegistrationForm) -> Result<ValidatedRegistration, GateError> {
        let sanitized = self
            .validator
            .validate(form)
            .map_err(|e| GateError::MalformedInput(e.to_string()))?;

        let email = normalize(&sanitized.email);
        if self.store.find_by_email(&email)?.is_some()
            || self.store.find_by_national_id(&sanitized.national_id)?.is_some()
        {
            return Err(GateError::AlreadyEnrolled);
        }

        let credential_hash = self
            .hasher
            .hash(&form.password)
            .map_err(|e| GateError::StorageUnavailable(format!("credential hashing failed: {}", e)))?;

        Ok(ValidatedRegistration {
            form: crate::user::SanitizedForm { email, ..sanitized },
            credential_hash,
        })
    }
}
