use log::{debug, info, warn};

use super::retry::Retry;
use super::session::{AuthenticatedPrincipal, LoginSession, LoginStep, StepPayload, StepReport};
use super::{rejected, EnrollmentOrchestrator, FlowSession};
use crate::database::{AuditEventType, IdentityRecord};
use crate::error::{GateError, TwoFactorFallback};
use crate::security::attempts::normalize;
use crate::security::SecretSource;

impl EnrollmentOrchestrator {
    pub fn begin_login(&self) -> LoginSession {
        let session = LoginSession::new(self.policy.max_liveness_attempts, self.policy.max_face_login_attempts);
        debug!("Login {} started", session.id());
        session
    }

    /// Apply one login step: `Credentials`, then for identities with an
    /// enrolled face a liveness verdict and a `Descriptor`.
    pub fn advance_login(
        &self,
        session: &mut LoginSession,
        payload: StepPayload,
    ) -> Result<StepReport<LoginStep>, GateError> {
        if session.step == LoginStep::Aborted {
            return Err(GateError::SessionAborted);
        }

        match (session.step, payload) {
            (LoginStep::Started, StepPayload::Credentials { email, password }) => {
                self.check_credentials(session, &email, &password)
            }

            (LoginStep::CredentialsVerified | LoginStep::LivenessPassed, StepPayload::Liveness(verdict)) => {
                self.accept_liveness(session, &verdict)?;
                session.step = LoginStep::LivenessPassed;
                Ok(StepReport::to(session.step))
            }

            (LoginStep::LivenessPassed, StepPayload::Descriptor { values, .. }) => self.check_face(session, &values),

            (step, payload) => Err(rejected(&payload, step)),
        }
    }

    /// Finish a login waiting on a TOTP code. Success clears the failed-attempt count.
    pub fn commit_login(&self, session: &mut LoginSession, code: &str) -> Result<AuthenticatedPrincipal, GateError> {
        match session.step {
            LoginStep::TwoFactorPending => {}
            LoginStep::Aborted => return Err(GateError::SessionAborted),
            step => return Err(GateError::InvalidStep(format!("commit is not accepted at {:?}", step))),
        }

        let identity = self.session_identity(session)?;
        let source = SecretSource::Persisted(identity.id.clone());

        if !self.vault.verify_source(&source, code)? {
            debug!("Login {}: TOTP code rejected", session.id);
            return Err(GateError::InvalidCode);
        }

        self.authenticate(session, &identity)
    }

    fn check_credentials(
        &self,
        session: &mut LoginSession,
        email: &str,
        password: &str,
    ) -> Result<StepReport<LoginStep>, GateError> {
        let email = normalize(email);
        if email.is_empty() || password.is_empty() {
            return Err(GateError::MalformedInput("email and password are required".to_string()));
        }

        let identity = self.store.find_by_email(&email)?.filter(|identity| identity.active);

        if self.ledger.count(&email)? >= self.max_failed_attempts {
            session.email = Some(email);
            return match identity {
                Some(identity) if self.vault.is_enabled(&identity.id)? => {
                    info!("Failed-attempt threshold reached; offering TOTP fallback");
                    session.identity_id = Some(identity.id);
                    session.step = LoginStep::TwoFactorPending;
                    Err(GateError::RateLimited {
                        fallback: TwoFactorFallback::Available,
                    })
                }
                _ => Err(GateError::RateLimited {
                    fallback: TwoFactorFallback::SetupRequired,
                }),
            };
        }

        let identity = match identity {
            Some(identity) if self.password_matches(password, &identity) => identity,
            other => {
                let count = self.ledger.record_failure(&email)?;
                debug!("Login rejected ({} failures in window)", count);
                self.audit(
                    AuditEventType::LoginFailed,
                    other.as_ref().map(|identity| identity.id.as_str()),
                    Some("credentials".to_string()),
                );
                return Err(GateError::InvalidCredentials);
            }
        };

        session.email = Some(email);
        session.identity_id = Some(identity.id.clone());
        session.step = LoginStep::CredentialsVerified;

        if identity.descriptor.is_none() {
            return self.after_second_factor_check(session, &identity);
        }
        Ok(StepReport::to(session.step))
    }

    fn check_face(&self, session: &mut LoginSession, values: &[f64]) -> Result<StepReport<LoginStep>, GateError> {
        let candidate = Self::parse_descriptor(values)?;
        let identity = self.session_identity(session)?;
        let stored = identity
            .descriptor
            .as_ref()
            .ok_or_else(|| GateError::InvalidStep("no enrolled face".to_string()))?;

        if self.matches_own_face(stored, &candidate) {
            return self.after_second_factor_check(session, &identity);
        }

        warn!("Face login mismatch");
        self.ledger.record_failure(&identity.email)?;
        self.audit(AuditEventType::LoginFailed, Some(&identity.id), Some("face".to_string()));

        match session.face_attempts.record_failure() {
            Retry::Remaining(remaining) => Err(GateError::FaceMismatch { remaining }),
            Retry::Exhausted if identity.two_factor_enabled() => {
                session.step = LoginStep::TwoFactorPending;
                Err(GateError::RateLimited {
                    fallback: TwoFactorFallback::Available,
                })
            }
            Retry::Exhausted => {
                session.abort();
                Err(GateError::SessionAborted)
            }
        }
    }

    /// Either finish now or ask for a TOTP code
    fn after_second_factor_check(
        &self,
        session: &mut LoginSession,
        identity: &IdentityRecord,
    ) -> Result<StepReport<LoginStep>, GateError> {
        if self.policy.require_totp_at_login && identity.two_factor_enabled() {
            session.step = LoginStep::TwoFactorPending;
            return Ok(StepReport::to(session.step));
        }
        self.authenticate(session, identity)?;
        Ok(StepReport::to(session.step))
    }

    fn authenticate(
        &self,
        session: &mut LoginSession,
        identity: &IdentityRecord,
    ) -> Result<AuthenticatedPrincipal, GateError> {
        self.ledger.clear(&identity.email)?;
        self.audit(AuditEventType::LoginSucceeded, Some(&identity.id), None);
        info!("Identity {} authenticated", identity.id);

        let principal = AuthenticatedPrincipal {
            identity_id: identity.id.clone(),
            email: identity.email.clone(),
            role: identity.role,
        };
        session.principal = Some(principal.clone());
        session.step = LoginStep::Authenticated;
        Ok(principal)
    }

    fn session_identity(&self, session: &LoginSession) -> Result<IdentityRecord, GateError> {
        let id = session
            .identity_id
            .as_deref()
            .ok_or_else(|| GateError::InvalidStep("no identity bound to this login".to_string()))?;
        self.store
            .get_identity(id)?
            .filter(|identity| identity.active)
            .ok_or(GateError::UnknownIdentity)
    }

    fn password_matches(&self, password: &str, identity: &IdentityRecord) -> bool {
        match self.hasher.verify(password, &identity.credential_hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Stored credential for identity {} is unusable: {}", identity.id, e);
                false
            }
        }
    }
}
