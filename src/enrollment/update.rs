use log::{debug, info, warn};

use super::retry::Retry;
use super::session::{PendingUpdate, StepPayload, StepReport, UpdateSession, UpdateStep};
use super::{rejected, EnrollmentOrchestrator, FlowSession};
use crate::database::{AuditEventType, CommitOutcome, IdentityRecord};
use crate::error::GateError;
use crate::security::SecretSource;

impl EnrollmentOrchestrator {
    /// Start replacing the enrolled face of `identity_id`
    pub fn begin_update(&self, identity_id: &str) -> Result<UpdateSession, GateError> {
        let identity = self.active_identity(identity_id)?;
        if identity.descriptor.is_none() {
            return Err(GateError::InvalidStep("identity has no enrolled face to replace".to_string()));
        }

        let session = UpdateSession::new(
            identity.id,
            self.policy.max_liveness_attempts,
            self.policy.max_continuity_retries,
        );
        debug!("Update {} started", session.id());
        Ok(session)
    }

    /// Apply one update step: liveness verdict, then `Descriptor`, then
    /// `RequestTwoFactor` when the identity has no enabled secret yet.
    ///
    /// The new face must first match the stored one at the continuity
    /// threshold. Running out of continuity retries aborts the session.
    pub fn advance_update(
        &self,
        session: &mut UpdateSession,
        payload: StepPayload,
    ) -> Result<StepReport<UpdateStep>, GateError> {
        if session.step == UpdateStep::Aborted {
            return Err(GateError::SessionAborted);
        }

        match (session.step, payload) {
            (
                step @ (UpdateStep::Started | UpdateStep::LivenessPassed | UpdateStep::ContinuityVerified),
                StepPayload::Liveness(verdict),
            ) => {
                self.accept_liveness(session, &verdict)?;
                if step == UpdateStep::Started {
                    session.step = UpdateStep::LivenessPassed;
                }
                Ok(StepReport::to(session.step))
            }

            (UpdateStep::LivenessPassed | UpdateStep::ContinuityVerified, StepPayload::Descriptor { values, capture }) => {
                self.replace_face(session, &values, capture)
            }

            (UpdateStep::UniquenessVerified | UpdateStep::TwoFactorPending, StepPayload::RequestTwoFactor) => {
                let email = self.active_identity(&session.identity_id)?.email;
                let pending = session
                    .pending
                    .as_mut()
                    .ok_or_else(|| GateError::InvalidStep("no captured descriptor".to_string()))?;
                if matches!(pending.secret, Some(SecretSource::Persisted(_))) {
                    return Err(GateError::InvalidStep("two-factor is already enabled".to_string()));
                }

                let provisioning = self.vault.generate_secret(&email)?;
                pending.secret = Some(SecretSource::Ephemeral(provisioning.secret.clone()));
                session.step = UpdateStep::TwoFactorPending;
                Ok(StepReport {
                    next_step: session.step,
                    provisioning: Some(provisioning),
                })
            }

            (step, payload) => Err(rejected(&payload, step)),
        }
    }

    /// Verify `code` and write the new descriptor (and a newly enabled secret) in one commit
    pub fn commit_update(&self, session: &mut UpdateSession, code: &str) -> Result<(), GateError> {
        match session.step {
            UpdateStep::TwoFactorPending => {}
            UpdateStep::Aborted => return Err(GateError::SessionAborted),
            UpdateStep::UniquenessVerified => return Err(GateError::TwoFactorNotConfigured),
            step => return Err(GateError::InvalidStep(format!("commit is not accepted at {:?}", step))),
        }

        let pending = session
            .pending
            .as_ref()
            .ok_or_else(|| GateError::InvalidStep("no captured descriptor".to_string()))?;
        let source = pending.secret.as_ref().ok_or(GateError::TwoFactorNotConfigured)?;

        if !self.vault.verify_source(source, code)? {
            debug!("Update {}: TOTP code rejected", session.id);
            return Err(GateError::InvalidCode);
        }

        let mut record = self.active_identity(&session.identity_id)?;
        record.descriptor = Some(pending.descriptor.clone());
        record.face_capture = pending.capture.clone();
        record.updated_at = self.clock.now();
        record.two_factor = match source {
            SecretSource::Ephemeral(secret) => Some(self.vault.bind(&record.id, secret)?),
            SecretSource::Persisted(_) => None,
        };
        let newly_enabled = record.two_factor.is_some();

        let candidate = pending.descriptor.clone();
        let own_id = record.id.clone();
        let outcome = self
            .store
            .commit_identity(&record, &|enrolled| self.duplicate_in(&candidate, enrolled, Some(&own_id)))?;

        if outcome == CommitOutcome::Conflict {
            warn!("Face update rejected at commit: face enrolled concurrently");
            self.audit(AuditEventType::DuplicateRejected, None, Some("update commit".to_string()));
            session.pending = None;
            session.step = UpdateStep::ContinuityVerified;
            return Err(GateError::DuplicateIdentity);
        }

        info!("Identity {} replaced its enrolled face", record.id);
        self.audit(AuditEventType::IdentityUpdated, Some(&record.id), Some("descriptor".to_string()));
        if newly_enabled {
            self.audit(AuditEventType::TotpEnabled, Some(&record.id), None);
        }

        session.pending = None;
        session.step = UpdateStep::Applied;
        Ok(())
    }

    fn replace_face(
        &self,
        session: &mut UpdateSession,
        values: &[f64],
        capture: Option<Vec<u8>>,
    ) -> Result<StepReport<UpdateStep>, GateError> {
        let candidate = Self::parse_descriptor(values)?;
        let identity = self.active_identity(&session.identity_id)?;
        let stored = identity
            .descriptor
            .as_ref()
            .ok_or_else(|| GateError::InvalidStep("identity has no enrolled face to replace".to_string()))?;

        let continuity = session.continuity.attempt(|| {
            if self.matches_own_face(stored, &candidate) {
                Ok(())
            } else {
                Err(())
            }
        });

        if let Err(failed) = continuity {
            warn!("Face update continuity check failed");
            self.audit(AuditEventType::ContinuityFailed, Some(&identity.id), None);
            return match failed.retry {
                Retry::Remaining(remaining) => Err(GateError::ContinuityMismatch { remaining }),
                Retry::Exhausted => {
                    warn!("Continuity retries exhausted; aborting update");
                    session.abort();
                    Err(GateError::SessionAborted)
                }
            };
        }
        session.step = UpdateStep::ContinuityVerified;

        if self.is_duplicate(&candidate, Some(&identity.id))? {
            warn!("Face update rejected: face already enrolled");
            self.audit(AuditEventType::DuplicateRejected, None, Some("update".to_string()));
            return Err(GateError::DuplicateIdentity);
        }

        let secret = if self.vault.is_enabled(&identity.id)? {
            Some(SecretSource::Persisted(identity.id.clone()))
        } else {
            None
        };
        session.step = if secret.is_some() {
            UpdateStep::TwoFactorPending
        } else {
            UpdateStep::UniquenessVerified
        };
        session.pending = Some(PendingUpdate {
            descriptor: candidate,
            capture,
            secret,
        });

        Ok(StepReport::to(session.step))
    }

    fn active_identity(&self, identity_id: &str) -> Result<IdentityRecord, GateError> {
        self.store
            .get_identity(identity_id)?
            .filter(|identity| identity.active)
            .ok_or(GateError::UnknownIdentity)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{harness, live_verdict, values};
    use super::*;
    use crate::biometric::FaceDescriptor;
    use crate::clock::Clock;
    use crate::database::IdentityStore;

    fn enrolled(h: &super::super::testing::Harness, seed: f64) -> String {
        let mut record = IdentityRecord::new(
            format!("user{}@example.com", seed),
            "Ana".into(),
            "Diaz".into(),
            format!("{:010}", (seed * 1000.0) as u64),
            "hash".into(),
            h.clock.now(),
        );
        record.descriptor = Some(FaceDescriptor::from_f64(&values(seed)).unwrap());
        h.store.commit_identity(&record, &|_| false).unwrap();
        record.id
    }

    #[test]
    fn test_unknown_identity() {
        let h = harness();
        assert!(matches!(h.orchestrator.begin_update("missing"), Err(GateError::UnknownIdentity)));
    }

    #[test]
    fn test_uniqueness_excludes_own_identity() {
        let h = harness();
        let id = enrolled(&h, 0.0);
        let mut session = h.orchestrator.begin_update(&id).unwrap();
        let verdict = live_verdict(&h.orchestrator, &mut session);
        h.orchestrator
            .advance_update(&mut session, StepPayload::Liveness(verdict))
            .unwrap();

        // Same face as stored: passes continuity and must not collide with itself
        let report = h
            .orchestrator
            .advance_update(
                &mut session,
                StepPayload::Descriptor {
                    values: values(0.001),
                    capture: None,
                },
            )
            .unwrap();
        assert_eq!(report.next_step, UpdateStep::UniquenessVerified);

        let report = h
            .orchestrator
            .advance_update(&mut session, StepPayload::RequestTwoFactor)
            .unwrap();
        assert_eq!(report.next_step, UpdateStep::TwoFactorPending);
        assert!(report.provisioning.is_some());
    }

    #[test]
    fn test_update_colliding_with_other_identity() {
        let h = harness();
        let id = enrolled(&h, 0.0);
        enrolled(&h, 0.03);

        let mut session = h.orchestrator.begin_update(&id).unwrap();
        let verdict = live_verdict(&h.orchestrator, &mut session);
        h.orchestrator
            .advance_update(&mut session, StepPayload::Liveness(verdict))
            .unwrap();

        // 0.23 from the owner's face, 0.11 from the other identity's
        let err = h
            .orchestrator
            .advance_update(
                &mut session,
                StepPayload::Descriptor {
                    values: values(0.02),
                    capture: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, GateError::DuplicateIdentity));
        assert_eq!(err.user_message(), GateError::DuplicateIdentity.user_message());
        assert_eq!(session.step(), UpdateStep::ContinuityVerified);
    }

    #[test]
    fn test_continuity_exhaustion_aborts() {
        let h = harness();
        let id = enrolled(&h, 0.0);
        let before = h.store.get_identity(&id).unwrap().unwrap().descriptor;

        let mut session = h.orchestrator.begin_update(&id).unwrap();
        let verdict = live_verdict(&h.orchestrator, &mut session);
        h.orchestrator
            .advance_update(&mut session, StepPayload::Liveness(verdict))
            .unwrap();

        let stranger = || StepPayload::Descriptor {
            values: values(0.5),
            capture: None,
        };
        assert!(matches!(
            h.orchestrator.advance_update(&mut session, stranger()),
            Err(GateError::ContinuityMismatch { remaining: 2 })
        ));
        assert!(matches!(
            h.orchestrator.advance_update(&mut session, stranger()),
            Err(GateError::ContinuityMismatch { remaining: 1 })
        ));
        assert!(matches!(
            h.orchestrator.advance_update(&mut session, stranger()),
            Err(GateError::SessionAborted)
        ));
        assert_eq!(session.step(), UpdateStep::Aborted);
        assert!(session.pending().is_none());
        assert_eq!(h.store.get_identity(&id).unwrap().unwrap().descriptor, before);
    }

    #[test]
    fn test_update_commit_enables_two_factor() {
        let h = harness();
        let id = enrolled(&h, 0.0);
        let mut session = h.orchestrator.begin_update(&id).unwrap();
        let verdict = live_verdict(&h.orchestrator, &mut session);
        h.orchestrator
            .advance_update(&mut session, StepPayload::Liveness(verdict))
            .unwrap();
        h.orchestrator
            .advance_update(
                &mut session,
                StepPayload::Descriptor {
                    values: values(0.01),
                    capture: Some(vec![9]),
                },
            )
            .unwrap();

        assert!(matches!(
            h.orchestrator.commit_update(&mut session, "123456"),
            Err(GateError::TwoFactorNotConfigured)
        ));

        let report = h
            .orchestrator
            .advance_update(&mut session, StepPayload::RequestTwoFactor)
            .unwrap();
        let secret = report.provisioning.unwrap().secret;
        let code = h.orchestrator.vault().current_code(&secret).unwrap();
        h.orchestrator.commit_update(&mut session, &code).unwrap();

        assert_eq!(session.step(), UpdateStep::Applied);
        let stored = h.store.get_identity(&id).unwrap().unwrap();
        assert_eq!(stored.descriptor, Some(FaceDescriptor::from_f64(&values(0.01)).unwrap()));
        assert!(stored.two_factor_enabled());
        assert!(h.orchestrator.vault().is_enabled(&id).unwrap());
    }
}
