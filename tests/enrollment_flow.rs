mod common;

use std::sync::atomic::AtomicBool;

use common::*;
use facetrust::biometric::liveness::fixtures;
use facetrust::biometric::RecordedCapture;
use facetrust::database::{AuditEventType, IdentityStore};
use facetrust::enrollment::{EnrollmentStep, FlowSession, StepPayload};
use facetrust::GateError;

#[test]
fn test_enrollment_creates_one_complete_record() {
    let gate = memory_gate();
    let (id, _) = enroll(&gate.orchestrator, "Ana@Example.com ", "1710034065", 0.0);

    let identities = gate.store.list_identities().unwrap();
    assert_eq!(identities.len(), 1);

    let record = &identities[0];
    assert_eq!(record.id, id);
    assert_eq!(record.email, "ana@example.com");
    assert!(record.active);
    assert!(record.descriptor.is_some());
    assert_eq!(record.face_capture, Some(vec![0xFF, 0xD8]));
    assert!(record.two_factor_enabled());
    assert!(!record.credential_hash.contains("Secure@Pass1"));
    assert!(gate.orchestrator.vault().is_enabled(&id).unwrap());

    let events: Vec<_> = gate
        .store
        .audit_entries(Some(&id))
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(events.contains(&AuditEventType::IdentityEnrolled));
}

#[test]
fn test_duplicate_face_is_rejected_without_writing() {
    let gate = memory_gate();
    enroll(&gate.orchestrator, "ana@example.com", "1710034065", 0.0);

    let mut session = gate.orchestrator.begin_enrollment();
    gate.orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form("bea@example.com", "0926687856")))
        .unwrap();
    let verdict = live_verdict(&gate.orchestrator, &mut session);
    gate.orchestrator
        .advance_enrollment(&mut session, StepPayload::Liveness(verdict))
        .unwrap();

    // Same person under different personal details
    let err = gate
        .orchestrator
        .advance_enrollment(
            &mut session,
            StepPayload::Descriptor {
                values: face(0.01),
                capture: None,
            },
        )
        .unwrap_err();

    assert!(matches!(err, GateError::DuplicateIdentity));
    assert_eq!(err.code(), "DUPLICATE_IDENTITY");
    assert!(!err.user_message().contains("ana@example.com"));
    assert_eq!(session.step(), EnrollmentStep::LivenessPassed);
    assert_eq!(gate.store.list_identities().unwrap().len(), 1);
}

#[test]
fn test_fresh_liveness_after_duplicate_lets_another_face_through() {
    let gate = memory_gate();
    enroll(&gate.orchestrator, "ana@example.com", "1710034065", 0.0);

    let mut session = gate.orchestrator.begin_enrollment();
    gate.orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form("bea@example.com", "0926687856")))
        .unwrap();
    let verdict = live_verdict(&gate.orchestrator, &mut session);
    gate.orchestrator
        .advance_enrollment(&mut session, StepPayload::Liveness(verdict))
        .unwrap();
    let err = gate
        .orchestrator
        .advance_enrollment(
            &mut session,
            StepPayload::Descriptor {
                values: face(0.01),
                capture: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GateError::DuplicateIdentity));

    // Recapture: a new proof is accepted and the flow stays put
    let verdict = live_verdict(&gate.orchestrator, &mut session);
    let report = gate
        .orchestrator
        .advance_enrollment(&mut session, StepPayload::Liveness(verdict))
        .unwrap();
    assert_eq!(report.next_step, EnrollmentStep::LivenessPassed);

    gate.orchestrator
        .advance_enrollment(
            &mut session,
            StepPayload::Descriptor {
                values: face(0.2),
                capture: None,
            },
        )
        .unwrap();
    let secret = gate
        .orchestrator
        .advance_enrollment(&mut session, StepPayload::RequestTwoFactor)
        .unwrap()
        .provisioning
        .unwrap()
        .secret;
    let code = gate.orchestrator.vault().current_code(&secret).unwrap();
    gate.orchestrator.commit_enrollment(&mut session, &code).unwrap();

    assert_eq!(gate.store.list_identities().unwrap().len(), 2);
}

#[test]
fn test_distinct_face_enrolls_alongside() {
    let gate = memory_gate();
    enroll(&gate.orchestrator, "ana@example.com", "1710034065", 0.0);
    enroll(&gate.orchestrator, "bea@example.com", "0926687856", 0.2);

    assert_eq!(gate.store.list_identities().unwrap().len(), 2);
}

#[test]
fn test_concurrent_enrollment_of_same_face_commits_once() {
    let gate = memory_gate();
    let (mut first, first_secret) = enroll_until_code(&gate.orchestrator, "ana@example.com", "1710034065", 0.0);
    let (mut second, second_secret) = enroll_until_code(&gate.orchestrator, "bea@example.com", "0926687856", 0.005);

    let code = gate.orchestrator.vault().current_code(&first_secret).unwrap();
    gate.orchestrator.commit_enrollment(&mut first, &code).unwrap();

    let code = gate.orchestrator.vault().current_code(&second_secret).unwrap();
    let err = gate.orchestrator.commit_enrollment(&mut second, &code).unwrap_err();

    assert!(matches!(err, GateError::DuplicateIdentity));
    assert_eq!(second.step(), EnrollmentStep::LivenessPassed);
    assert!(second.pending().is_none());
    assert_eq!(gate.store.list_identities().unwrap().len(), 1);
}

#[test]
fn test_email_already_registered() {
    let gate = memory_gate();
    enroll(&gate.orchestrator, "ana@example.com", "1710034065", 0.0);

    let mut session = gate.orchestrator.begin_enrollment();
    let err = gate
        .orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form("ANA@example.com", "0926687856")))
        .unwrap_err();
    assert!(matches!(err, GateError::AlreadyEnrolled));
}

#[test]
fn test_deactivated_face_can_enroll_again() {
    let gate = memory_gate();
    let (id, _) = enroll(&gate.orchestrator, "ana@example.com", "1710034065", 0.0);
    gate.store.set_active(&id, false).unwrap();

    enroll(&gate.orchestrator, "bea@example.com", "0926687856", 0.0);
    assert_eq!(gate.store.list_identities().unwrap().len(), 2);
}

#[test]
fn test_failed_liveness_exhausts_and_aborts() {
    let gate = memory_gate();
    let mut session = gate.orchestrator.begin_enrollment();
    gate.orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form("ana@example.com", "1710034065")))
        .unwrap();

    // A liveness session restarted before finishing spends one attempt
    for _ in 0..5 {
        gate.orchestrator.start_liveness(&mut session).unwrap();
    }
    assert!(matches!(
        gate.orchestrator.start_liveness(&mut session),
        Err(GateError::SessionAborted)
    ));
    assert!(session.is_aborted());
    assert!(matches!(
        gate.orchestrator
            .advance_enrollment(&mut session, StepPayload::RequestTwoFactor),
        Err(GateError::SessionAborted)
    ));
}

#[test]
fn test_stale_liveness_verdict_rejected() {
    let gate = memory_gate();
    let mut session = gate.orchestrator.begin_enrollment();
    gate.orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form("ana@example.com", "1710034065")))
        .unwrap();

    let stale = live_verdict(&gate.orchestrator, &mut session);
    let _fresh = live_verdict(&gate.orchestrator, &mut session);

    assert!(matches!(
        gate.orchestrator
            .advance_enrollment(&mut session, StepPayload::Liveness(stale)),
        Err(GateError::NotLive)
    ));
    assert_eq!(session.step(), EnrollmentStep::FormValidated);
}

#[test]
fn test_verdict_is_bound_to_the_issuing_flow() {
    let gate = memory_gate();
    let mut first = gate.orchestrator.begin_enrollment();
    let mut second = gate.orchestrator.begin_enrollment();
    gate.orchestrator
        .advance_enrollment(&mut first, StepPayload::Form(form("ana@example.com", "1710034065")))
        .unwrap();
    gate.orchestrator
        .advance_enrollment(&mut second, StepPayload::Form(form("bea@example.com", "0926687856")))
        .unwrap();

    let liveness = gate.orchestrator.start_liveness(&mut first).unwrap();
    let issued = liveness.id();
    let mut capture = RecordedCapture::new(vec![fixtures::centered_face(); 200]);
    let verdict = liveness.run(&mut capture, &AtomicBool::new(false)).unwrap();
    assert_eq!(verdict.session_id(), issued);
    assert!(verdict.is_live());
    assert!(verdict.frames_processed() > 0);
    assert!(verdict.confidence() > 0.9);

    assert!(matches!(
        gate.orchestrator
            .advance_enrollment(&mut second, StepPayload::Liveness(verdict.clone())),
        Err(GateError::NotLive)
    ));
    assert_eq!(second.step(), EnrollmentStep::FormValidated);

    let report = gate
        .orchestrator
        .advance_enrollment(&mut first, StepPayload::Liveness(verdict))
        .unwrap();
    assert_eq!(report.next_step, EnrollmentStep::LivenessPassed);
}
