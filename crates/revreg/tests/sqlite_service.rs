//! Service wired from configuration over a SQLite file, reopened between
//! steps the way separate CLI invocations would.

use revreg::{initialize_root, RootConfig, RootState, StoreBackend};
use revreg_core::{IssuerId, RegistrationState, RegistryId, RegistryState, SchemaId};
use revreg_engine::{EngineError, OutcomeKind};
use revreg_registrar::RegistrarMode;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn temp_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "revreg-{}-{}-{}",
        name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config(data_dir: &PathBuf, mode: RegistrarMode) -> RootConfig {
    let mut config = RootConfig {
        data_dir: data_dir.clone(),
        ..RootConfig::default()
    };
    config.store.backend = StoreBackend::Sqlite;
    config.registry.default_capacity = 4;
    config.issuance.retry_delay_ms = 0;
    config.registrar.mode = mode;
    config
}

fn open(data_dir: &PathBuf, mode: RegistrarMode) -> RootState {
    initialize_root(config(data_dir, mode)).unwrap()
}

fn attrs() -> BTreeMap<String, String> {
    BTreeMap::from([("degree".to_string(), "BSc".to_string())])
}

#[test]
fn test_issue_and_revoke_across_reopen() {
    let dir = temp_data_dir("reopen");

    let cred_def_id = {
        let state = open(&dir, RegistrarMode::Finish);
        let cd = state
            .service
            .cred_defs()
            .register_credential_definition(
                &IssuerId::new("did:sov:university"),
                &SchemaId::new("did:sov:university:2:degree:1.0"),
                &["degree"],
                "default",
                true,
            )
            .unwrap();
        assert_eq!(cd.state, RegistrationState::Finished);
        cd.id
    };
    assert!(config(&dir, RegistrarMode::Finish).database_path().exists());

    let issued = {
        let state = open(&dir, RegistrarMode::Finish);
        (0..5)
            .map(|_| {
                state
                    .service
                    .issuer()
                    .issue_credential(&cred_def_id, &attrs())
                    .unwrap()
            })
            .collect::<Vec<_>>()
    };
    let first = issued[0].registry_id.clone().unwrap();
    let indices: Vec<u32> = issued.iter().map(|c| c.index.unwrap()).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 1]);

    let state = open(&dir, RegistrarMode::Finish);
    let registries = state.service.registries();
    assert_eq!(registries.get_registry(&first).unwrap().state, RegistryState::Full);
    assert_eq!(
        registries
            .list_registries(Some(&cred_def_id), Some(RegistryState::Active))
            .unwrap()
            .len(),
        1
    );

    let outcome = state.service.revocation().revoke(&first, &[2, 4, 9]).unwrap();
    assert_eq!(outcome.kind(), OutcomeKind::PartiallySucceeded);
    assert_eq!(outcome.revoked.iter().copied().collect::<Vec<_>>(), vec![2, 4]);
    drop(state);

    let state = open(&dir, RegistrarMode::Finish);
    let list = state.service.revocation().status_list(&first).unwrap();
    assert!(list.is_revoked(2));
    assert!(list.is_revoked(4));
    assert!(!list.is_revoked(1));
    assert_eq!(
        state.service.registries().index_state(&first).unwrap().revoked.len(),
        2
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_wait_mode_registration_finished_later() {
    let dir = temp_data_dir("wait");

    let (job_id, final_id, cred_def_id) = {
        let finish = open(&dir, RegistrarMode::Finish);
        let cd = finish
            .service
            .cred_defs()
            .register_credential_definition(
                &IssuerId::new("did:sov:issuer"),
                &SchemaId::new("schema"),
                &["degree"],
                "default",
                true,
            )
            .unwrap();
        drop(finish);

        let waiting = open(&dir, RegistrarMode::Wait);
        let def = waiting
            .service
            .registries()
            .create_registry(&cd.issuer_id, &cd.id, 4, Default::default(), "later")
            .unwrap();
        assert_eq!(def.state, RegistryState::Init);
        let jobs = waiting.registrar.pending_jobs();
        assert_eq!(jobs.len(), 1);
        let (job_id, final_id) = jobs[0].clone();
        assert_eq!(def.id.as_str(), job_id);
        (job_id, final_id, cd.id)
    };

    let state = open(&dir, RegistrarMode::Finish);
    let err = state
        .service
        .issuer()
        .issue_credential(&cred_def_id, &attrs())
        .unwrap_err();
    assert!(matches!(err, EngineError::NoActiveRegistry(_)));

    let def = state
        .service
        .registries()
        .finish_registration(&job_id, &RegistryId::new(final_id.clone()))
        .unwrap();
    assert_eq!(def.id.as_str(), final_id);
    assert_eq!(def.state, RegistryState::Active);

    let credential = state
        .service
        .issuer()
        .issue_credential(&cred_def_id, &attrs())
        .unwrap();
    assert_eq!(credential.registry_id, Some(def.id));
    assert_eq!(credential.index, Some(1));

    let _ = std::fs::remove_dir_all(&dir);
}
