use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::retry::{Retry, RetryLimit};
use crate::biometric::{FaceDescriptor, LivenessGate, LivenessSession, LivenessVerdict};
use crate::database::Role;
use crate::error::GateError;
use crate::security::{Provisioning, SecretSource, TotpSecret};
use crate::user::{RegistrationForm, SanitizedForm};

/// Input for one orchestrator step. The variant is the step being attempted.
#[derive(Debug, Clone)]
pub enum StepPayload {
    Form(RegistrationForm),
    Credentials { email: String, password: String },
    Liveness(LivenessVerdict),
    Descriptor { values: Vec<f64>, capture: Option<Vec<u8>> },
    RequestTwoFactor,
}

impl StepPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            StepPayload::Form(_) => "form",
            StepPayload::Credentials { .. } => "credentials",
            StepPayload::Liveness(_) => "liveness",
            StepPayload::Descriptor { .. } => "descriptor",
            StepPayload::RequestTwoFactor => "request_two_factor",
        }
    }
}

/// Successful step result
#[derive(Debug, Clone)]
pub struct StepReport<S> {
    pub next_step: S,
    /// Set when the step issued a new TOTP secret
    pub provisioning: Option<Provisioning>,
}

impl<S> StepReport<S> {
    pub(crate) fn to(next_step: S) -> Self {
        Self {
            next_step,
            provisioning: None,
        }
    }
}

/// Who a completed login authenticated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedPrincipal {
    pub identity_id: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStep {
    Started,
    FormValidated,
    LivenessPassed,
    DescriptorCaptured,
    TwoFactorPending,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginStep {
    Started,
    CredentialsVerified,
    LivenessPassed,
    TwoFactorPending,
    Authenticated,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStep {
    Started,
    LivenessPassed,
    ContinuityVerified,
    UniquenessVerified,
    TwoFactorPending,
    Applied,
    Aborted,
}

/// Liveness proofs issued to and accepted from one flow.
///
/// A verdict is accepted only for the session id most recently issued, and
/// only once. Restarting capture before a verdict, or a verdict that is not
/// live, spends one attempt.
#[derive(Debug, Clone)]
pub struct LivenessTicket {
    issued: Option<Uuid>,
    passed: bool,
    attempts: RetryLimit,
}

impl LivenessTicket {
    pub(crate) fn new(max_attempts: u32) -> Self {
        Self {
            issued: None,
            passed: false,
            attempts: RetryLimit::new(max_attempts),
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub(crate) fn issue(&mut self, gate: &LivenessGate) -> Result<LivenessSession, GateError> {
        if self.issued.is_some() && self.attempts.record_failure() == Retry::Exhausted {
            return Err(GateError::SessionAborted);
        }
        let session = gate.start();
        self.issued = Some(session.id());
        self.passed = false;
        debug!("Issued liveness session {}", session.id());
        Ok(session)
    }

    pub(crate) fn accept(&mut self, verdict: &LivenessVerdict) -> Result<(), GateError> {
        if self.issued != Some(verdict.session_id) {
            debug!("Rejected verdict for unknown or spent liveness session {}", verdict.session_id);
            return Err(GateError::NotLive);
        }
        self.issued = None;

        if !verdict.is_live {
            return match self.attempts.record_failure() {
                Retry::Exhausted => Err(GateError::SessionAborted),
                Retry::Remaining(_) => Err(GateError::NotLive),
            };
        }

        info!("Liveness accepted (confidence {:.2})", verdict.confidence);
        self.passed = true;
        Ok(())
    }
}

/// Common surface of the three flows, used by `start_liveness`
pub trait FlowSession {
    fn liveness_ticket(&mut self) -> &mut LivenessTicket;

    /// Whether the current step expects a liveness proof next
    fn accepts_liveness(&self) -> bool;

    fn is_aborted(&self) -> bool;

    /// Drop every piece of transient state and refuse further steps
    fn abort(&mut self);
}

/// Validated registration data carried between steps
#[derive(Debug, Clone)]
pub(crate) struct ValidatedRegistration {
    pub form: SanitizedForm,
    pub credential_hash: String,
}

/// Everything captured for a registration that is not yet committed.
/// Never written to storage.
#[derive(Debug, Clone)]
pub struct PendingEnrollment {
    pub descriptor: FaceDescriptor,
    pub capture: Option<Vec<u8>>,
    pub secret: Option<TotpSecret>,
}

/// Registration flow state, owned by the caller
#[derive(Debug, Clone)]
pub struct EnrollmentSession {
    pub(crate) id: Uuid,
    pub(crate) step: EnrollmentStep,
    pub(crate) registration: Option<ValidatedRegistration>,
    pub(crate) liveness: LivenessTicket,
    pub(crate) pending: Option<PendingEnrollment>,
    pub(crate) identity_id: Option<String>,
}

impl EnrollmentSession {
    pub(crate) fn new(max_liveness_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            step: EnrollmentStep::Started,
            registration: None,
            liveness: LivenessTicket::new(max_liveness_attempts),
            pending: None,
            identity_id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> EnrollmentStep {
        self.step
    }

    pub fn pending(&self) -> Option<&PendingEnrollment> {
        self.pending.as_ref()
    }

    /// Id of the identity created by a successful commit
    pub fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }
}

impl FlowSession for EnrollmentSession {
    fn liveness_ticket(&mut self) -> &mut LivenessTicket {
        &mut self.liveness
    }

    fn accepts_liveness(&self) -> bool {
        matches!(self.step, EnrollmentStep::FormValidated | EnrollmentStep::LivenessPassed)
    }

    fn is_aborted(&self) -> bool {
        self.step == EnrollmentStep::Aborted
    }

    fn abort(&mut self) {
        self.step = EnrollmentStep::Aborted;
        self.registration = None;
        self.pending = None;
    }
}

/// Login flow state, owned by the caller
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub(crate) id: Uuid,
    pub(crate) step: LoginStep,
    pub(crate) email: Option<String>,
    pub(crate) identity_id: Option<String>,
    pub(crate) liveness: LivenessTicket,
    pub(crate) face_attempts: RetryLimit,
    pub(crate) principal: Option<AuthenticatedPrincipal>,
}

impl LoginSession {
    pub(crate) fn new(max_liveness_attempts: u32, max_face_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            step: LoginStep::Started,
            email: None,
            identity_id: None,
            liveness: LivenessTicket::new(max_liveness_attempts),
            face_attempts: RetryLimit::new(max_face_attempts),
            principal: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> LoginStep {
        self.step
    }

    /// Set once the flow reaches `Authenticated`
    pub fn principal(&self) -> Option<&AuthenticatedPrincipal> {
        self.principal.as_ref()
    }
}

impl FlowSession for LoginSession {
    fn liveness_ticket(&mut self) -> &mut LivenessTicket {
        &mut self.liveness
    }

    fn accepts_liveness(&self) -> bool {
        matches!(self.step, LoginStep::CredentialsVerified | LoginStep::LivenessPassed)
    }

    fn is_aborted(&self) -> bool {
        self.step == LoginStep::Aborted
    }

    fn abort(&mut self) {
        self.step = LoginStep::Aborted;
        self.principal = None;
    }
}

/// Replacement face data waiting for the 2FA step
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub descriptor: FaceDescriptor,
    pub capture: Option<Vec<u8>>,
    pub secret: Option<SecretSource>,
}

/// Face-update flow state, owned by the caller
#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub(crate) id: Uuid,
    pub(crate) identity_id: String,
    pub(crate) step: UpdateStep,
    pub(crate) liveness: LivenessTicket,
    pub(crate) continuity: RetryLimit,
    pub(crate) pending: Option<PendingUpdate>,
}

impl UpdateSession {
    pub(crate) fn new(identity_id: String, max_liveness_attempts: u32, max_continuity_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id,
            step: UpdateStep::Started,
            liveness: LivenessTicket::new(max_liveness_attempts),
            continuity: RetryLimit::new(max_continuity_retries),
            pending: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn step(&self) -> UpdateStep {
        self.step
    }

    pub fn pending(&self) -> Option<&PendingUpdate> {
        self.pending.as_ref()
    }
}

impl FlowSession for UpdateSession {
    fn liveness_ticket(&mut self) -> &mut LivenessTicket {
        &mut self.liveness
    }

    fn accepts_liveness(&self) -> bool {
        matches!(
            self.step,
            UpdateStep::Started | UpdateStep::LivenessPassed | UpdateStep::ContinuityVerified
        )
    }

    fn is_aborted(&self) -> bool {
        self.step == UpdateStep::Aborted
    }

    fn abort(&mut self) {
        self.step = UpdateStep::Aborted;
        self.pending = None;
    }
}
