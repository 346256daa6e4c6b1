#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use facetrust::biometric::liveness::fixtures;
use facetrust::biometric::{LivenessVerdict, RecordedCapture, DESCRIPTOR_LEN};
use facetrust::database::{AttemptStore, IdentityStore, MemoryStore};
use facetrust::enrollment::{EnrollmentSession, FlowSession, StepPayload};
use facetrust::security::TotpSecret;
use facetrust::user::RegistrationForm;
use facetrust::{Config, EnrollmentOrchestrator, ManualClock};

pub const START: i64 = 1_700_000_000;

/// Cheap hashing and key derivation so the suite stays fast
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.security.password_memory_kib = 1024;
    config.security.password_pepper = Some("2a".repeat(32));
    config.security.vault_kdf_iterations = 1000;
    config
}

pub struct Gate {
    pub orchestrator: EnrollmentOrchestrator,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn memory_gate() -> Gate {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_timestamp(START));
    let orchestrator = EnrollmentOrchestrator::from_config(&test_config(), store.clone(), clock.clone()).unwrap();
    Gate {
        orchestrator,
        store,
        clock,
    }
}

pub fn gate_over<S>(store: Arc<S>, clock: Arc<ManualClock>) -> EnrollmentOrchestrator
where
    S: IdentityStore + AttemptStore + 'static,
{
    EnrollmentOrchestrator::from_config(&test_config(), store, clock).unwrap()
}

pub fn form(email: &str, national_id: &str) -> RegistrationForm {
    RegistrationForm {
        first_name: "Ana".into(),
        last_name: "Diaz".into(),
        national_id: national_id.into(),
        email: email.into(),
        password: "Secure@Pass1".into(),
        phone: Some("+593 99 999 9999".into()),
        address: None,
    }
}

/// A descriptor whose every value is shifted by `seed`; two seeds `d` apart
/// are `d * sqrt(128)` apart.
pub fn face(seed: f64) -> Vec<f64> {
    (0..DESCRIPTOR_LEN).map(|i| (i as f64 * 0.37).sin() * 0.2 + seed).collect()
}

pub fn live_verdict<F: FlowSession>(orchestrator: &EnrollmentOrchestrator, flow: &mut F) -> LivenessVerdict {
    let session = orchestrator.start_liveness(flow).unwrap();
    let mut capture = RecordedCapture::new(vec![fixtures::centered_face(); 200]);
    session.run(&mut capture, &AtomicBool::new(false)).unwrap()
}

/// Walk a registration up to `TwoFactorPending` and return the issued secret
pub fn enroll_until_code(
    orchestrator: &EnrollmentOrchestrator,
    email: &str,
    national_id: &str,
    seed: f64,
) -> (EnrollmentSession, TotpSecret) {
    let mut session = orchestrator.begin_enrollment();
    orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form(email, national_id)))
        .unwrap();
    let verdict = live_verdict(orchestrator, &mut session);
    orchestrator
        .advance_enrollment(&mut session, StepPayload::Liveness(verdict))
        .unwrap();
    orchestrator
        .advance_enrollment(
            &mut session,
            StepPayload::Descriptor {
                values: face(seed),
                capture: Some(vec![0xFF, 0xD8]),
            },
        )
        .unwrap();
    let report = orchestrator
        .advance_enrollment(&mut session, StepPayload::RequestTwoFactor)
        .unwrap();
    let secret = report.provisioning.unwrap().secret;
    (session, secret)
}

/// Full registration; returns the new identity id and its TOTP secret
pub fn enroll(orchestrator: &EnrollmentOrchestrator, email: &str, national_id: &str, seed: f64) -> (String, TotpSecret) {
    let (mut session, secret) = enroll_until_code(orchestrator, email, national_id, seed);
    let code = orchestrator.vault().current_code(&secret).unwrap();
    let id = orchestrator.commit_enrollment(&mut session, &code).unwrap();
    (id, secret)
}
