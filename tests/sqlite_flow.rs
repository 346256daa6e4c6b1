mod common;

use std::sync::Arc;

use common::*;
use facetrust::config::DatabaseConfig;
use facetrust::database::{IdentityStore, SqliteStore};
use facetrust::enrollment::{LoginStep, StepPayload};
use facetrust::{GateError, ManualClock};

fn sqlite_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let config = DatabaseConfig {
        path: dir.path().join("facetrust.db").to_string_lossy().into_owned(),
        max_connections: 4,
        busy_timeout_ms: 2000,
    };
    Arc::new(SqliteStore::open(&config).unwrap())
}

#[test]
fn test_enroll_and_log_in_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir);
    let clock = Arc::new(ManualClock::at_timestamp(START));
    let orchestrator = gate_over(store.clone(), clock);

    let (id, secret) = enroll(&orchestrator, "ana@example.com", "1710034065", 0.0);

    // The secret is sealed at rest
    let binding = store.get_two_factor(&id).unwrap().unwrap();
    assert!(binding.enabled);
    assert_ne!(binding.sealed_secret, secret.as_base32());

    let mut session = orchestrator.begin_login();
    orchestrator
        .advance_login(
            &mut session,
            StepPayload::Credentials {
                email: "ana@example.com".into(),
                password: "Secure@Pass1".into(),
            },
        )
        .unwrap();
    let verdict = live_verdict(&orchestrator, &mut session);
    orchestrator
        .advance_login(&mut session, StepPayload::Liveness(verdict))
        .unwrap();
    let report = orchestrator
        .advance_login(
            &mut session,
            StepPayload::Descriptor {
                values: face(0.01),
                capture: None,
            },
        )
        .unwrap();
    assert_eq!(report.next_step, LoginStep::Authenticated);
}

#[test]
fn test_uniqueness_holds_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let orchestrator = gate_over(sqlite_store(&dir), Arc::new(ManualClock::at_timestamp(START)));
        enroll(&orchestrator, "ana@example.com", "1710034065", 0.0);
    }

    let store = sqlite_store(&dir);
    let orchestrator = gate_over(store.clone(), Arc::new(ManualClock::at_timestamp(START)));

    let mut session = orchestrator.begin_enrollment();
    orchestrator
        .advance_enrollment(&mut session, StepPayload::Form(form("bea@example.com", "0926687856")))
        .unwrap();
    let verdict = live_verdict(&orchestrator, &mut session);
    orchestrator
        .advance_enrollment(&mut session, StepPayload::Liveness(verdict))
        .unwrap();

    assert!(matches!(
        orchestrator.advance_enrollment(
            &mut session,
            StepPayload::Descriptor {
                values: face(0.0),
                capture: None,
            },
        ),
        Err(GateError::DuplicateIdentity)
    ));
    assert_eq!(store.list_identities().unwrap().len(), 1);
}

#[test]
fn test_concurrent_commits_of_one_face_write_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir);
    let orchestrator = Arc::new(gate_over(store.clone(), Arc::new(ManualClock::at_timestamp(START))));

    let prepared: Vec<_> = (0..4)
        .map(|i| {
            enroll_until_code(
                &orchestrator,
                &format!("user{}@example.com", i),
                &format!("{:010}", 1_000_000 + i),
                0.001 * i as f64,
            )
        })
        .collect();

    let handles: Vec<_> = prepared
        .into_iter()
        .map(|(mut session, secret)| {
            let orchestrator = orchestrator.clone();
            std::thread::spawn(move || {
                let code = orchestrator.vault().current_code(&secret).unwrap();
                orchestrator.commit_enrollment(&mut session, &code).is_ok()
            })
        })
        .collect();

    let written = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
    assert_eq!(written, 1);
    assert_eq!(store.list_identities().unwrap().len(), 1);
}
