//! Credential checks: only confirmed accounts with the right password pass,
//! and every failure looks the same.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use identity_directory::{
    CredentialCheck, CredentialVerifier, DirectoryError, ProfileChanges, ProfileService,
    ProfileState, Role, ScatterMode,
    testutil::{FakeHasher, directory_over, memory_partitions, new_profile, service_over},
};
use identity_directory_storage::{MemoryBackend, testutil::FailingBackend};

async fn seeded(state: ProfileState) -> ProfileService<MemoryBackend> {
    let service = service_over(memory_partitions(3), ScatterMode::Sequential);
    let mut new = new_profile("alice");
    new.role = Role::Resident;
    service.create_profile(&new).await.unwrap();
    if state != ProfileState::New {
        let changes = ProfileChanges::builder().state(state).build();
        service.update_profile("alice", &changes).await.unwrap();
    }
    service
}

#[tokio::test]
async fn test_confirmed_account_with_right_password_is_valid() {
    let service = seeded(ProfileState::Confirmed).await;
    let hasher = FakeHasher::new();
    let check = CredentialVerifier::new(&service, &hasher)
        .check("alice@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(
        check,
        CredentialCheck::Valid { external_id: "alice".into(), role: Role::Resident }
    );
    assert!(check.is_valid());
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_look_identical() {
    let service = seeded(ProfileState::Confirmed).await;
    let hasher = FakeHasher::new();
    let verifier = CredentialVerifier::new(&service, &hasher);

    let unknown = verifier.check("nobody@example.com", "secret").await.unwrap();
    let wrong = verifier.check("alice@example.com", "not-the-password").await.unwrap();
    assert_eq!(unknown, CredentialCheck::Invalid);
    assert_eq!(unknown, wrong);
}

#[tokio::test]
async fn test_unconfirmed_accounts_are_invalid() {
    for state in [ProfileState::New, ProfileState::Blocked] {
        let service = seeded(state).await;
        let hasher = FakeHasher::new();
        let check = CredentialVerifier::new(&service, &hasher)
            .check("alice@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(check, CredentialCheck::Invalid, "{state}");
    }
}

#[tokio::test]
async fn test_deleted_account_is_invalid() {
    let service = seeded(ProfileState::Confirmed).await;
    service.delete_profile("alice").await.unwrap();
    let hasher = FakeHasher::new();
    let check = CredentialVerifier::new(&service, &hasher)
        .check("alice@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(check, CredentialCheck::Invalid);
}

#[tokio::test]
async fn test_storage_fault_is_an_error_not_invalid() {
    let backends: Vec<_> = memory_partitions(2).into_iter().map(FailingBackend::new).collect();
    let faulty = backends[0].clone();
    let test = directory_over(backends, ScatterMode::Sequential);

    faulty.fail_reads(true);
    let err = test.directory.check_credentials("alice@example.com", "secret").await.unwrap_err();
    assert!(matches!(err, DirectoryError::Storage { .. }), "{err:?}");
}
