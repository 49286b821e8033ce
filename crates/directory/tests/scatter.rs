//! Lookup by email across partitions, in both scatter modes, with injected
//! partition faults.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use identity_directory::{
    DirectoryError, ProfileService, ScatterMode, TokenPurpose,
    testutil::{memory_partitions, new_profile, service_over},
};
use identity_directory_storage::{
    MemoryBackend, StorageBackend, StorageError, testutil::FailingBackend,
};

const MODES: [ScatterMode; 2] = [ScatterMode::Sequential, ScatterMode::Concurrent];

/// Finds an external id the service routes to `partition`.
fn external_id_on<B>(service: &ProfileService<B>, partition: usize) -> String
where
    B: StorageBackend + 'static,
{
    (0..)
        .map(|i| format!("user-{i}"))
        .find(|candidate| service.partition_for(candidate) == partition)
        .expect("some id routes to every partition")
}

fn failing_partitions(count: usize) -> Vec<FailingBackend<MemoryBackend>> {
    memory_partitions(count).into_iter().map(FailingBackend::new).collect()
}

#[tokio::test]
async fn test_lookup_finds_profiles_in_every_partition() {
    for mode in MODES {
        let service = service_over(memory_partitions(4), mode);
        for partition in 0..4 {
            let external_id = external_id_on(&service, partition);
            service.create_profile(&new_profile(&external_id)).await.unwrap();

            let email = format!("{external_id}@example.com");
            let located = service.locate_by_email(&email).await.unwrap();
            assert_eq!(located.partition, partition, "{mode:?}");
            assert_eq!(located.profile.external_id, external_id);
            let profile = service.get_profile_by_email(&email).await.unwrap();
            assert_eq!(profile.id, located.profile.id);
        }
    }
}

#[tokio::test]
async fn test_lookup_of_unknown_email_is_not_found() {
    for mode in MODES {
        let service = service_over(memory_partitions(4), mode);
        service.create_profile(&new_profile("alice")).await.unwrap();
        let err = service.get_profile_by_email("nobody@example.com").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound { entity: "profile", .. }), "{mode:?}");
    }
}

#[tokio::test]
async fn test_lookup_skips_deleted_profiles() {
    for mode in MODES {
        let service = service_over(memory_partitions(3), mode);
        service.create_profile(&new_profile("alice")).await.unwrap();
        service.delete_profile("alice").await.unwrap();
        let err = service.get_profile_by_email("alice@example.com").await.unwrap_err();
        assert!(err.is_not_found(), "{mode:?}");
    }
}

#[tokio::test]
async fn test_fault_before_match_is_surfaced() {
    for mode in MODES {
        let backends = failing_partitions(4);
        let faulty = backends[0].clone();
        let service = service_over(backends, mode);
        let external_id = external_id_on(&service, 3);
        service.create_profile(&new_profile(&external_id)).await.unwrap();

        faulty.fail_reads(true);
        let err = service.get_profile_by_email(&format!("{external_id}@example.com")).await;
        match (mode, err) {
            (ScatterMode::Sequential, Err(DirectoryError::Storage { source, .. })) => {
                assert!(matches!(source, StorageError::Connection { .. }));
            },
            // Partition 3 may answer before partition 0 fails.
            (ScatterMode::Concurrent, Err(DirectoryError::Storage { .. }) | Ok(_)) => {},
            (mode, other) => panic!("{mode:?}: unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_fault_after_match_is_not_fatal_in_sequential_mode() {
    let backends = failing_partitions(4);
    let faulty = backends[3].clone();
    let service = service_over(backends, ScatterMode::Sequential);
    let external_id = external_id_on(&service, 0);
    service.create_profile(&new_profile(&external_id)).await.unwrap();

    faulty.fail_reads(true);
    let email = format!("{external_id}@example.com");
    let profile = service.get_profile_by_email(&email).await.unwrap();
    assert_eq!(profile.external_id, external_id);
    assert_eq!(faulty.injected_failures(), 0, "later partitions are never queried");
}

#[tokio::test]
async fn test_fault_without_match_is_surfaced_in_concurrent_mode() {
    let backends = failing_partitions(4);
    let faulty = backends[2].clone();
    let service = service_over(backends, ScatterMode::Concurrent);

    faulty.fail_reads(true);
    let err = service.get_profile_by_email("nobody@example.com").await.unwrap_err();
    assert!(
        matches!(err, DirectoryError::Storage { operation: "get_profile_by_email", .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_partition_timeout_surfaces_as_transient_storage_error() {
    let backends = failing_partitions(3);
    let faulty = backends[1].clone();
    let service = service_over(backends, ScatterMode::Sequential);

    faulty.inject_timeouts(true);
    faulty.fail_reads(true);
    let err = service.get_profile_by_email("nobody@example.com").await.unwrap_err();
    assert!(
        matches!(&err, DirectoryError::Storage { source: StorageError::Timeout, .. }),
        "{err:?}"
    );
    assert!(err.is_transient());
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_keyed_operations_only_touch_the_owning_partition() {
    let backends = failing_partitions(4);
    let handles: Vec<_> = backends.clone();
    let service = service_over(backends, ScatterMode::Sequential);
    let external_id = external_id_on(&service, 1);

    for (index, handle) in handles.iter().enumerate() {
        handle.fail_reads(index != 1);
        handle.fail_commits(index != 1);
    }
    service.create_profile(&new_profile(&external_id)).await.unwrap();
    service.get_profile(&external_id).await.unwrap();
    service.tokens().upsert(&external_id, TokenPurpose::Registration).await.unwrap();
    service.delete_profile(&external_id).await.unwrap();

    for handle in &handles {
        assert_eq!(handle.injected_failures(), 0);
    }
}

#[tokio::test]
async fn test_health_check_reports_first_unhealthy_partition() {
    let backends = failing_partitions(3);
    let faulty = backends[1].clone();
    let service = service_over(backends, ScatterMode::Sequential);
    service.health_check().await.unwrap();

    faulty.fail_reads(true);
    let err = service.health_check().await.unwrap_err();
    match err {
        DirectoryError::Storage { operation, key, .. } => {
            assert_eq!(operation, "health_check");
            assert_eq!(key, "partition 1");
        },
        other => panic!("expected Storage, got {other:?}"),
    }
}
