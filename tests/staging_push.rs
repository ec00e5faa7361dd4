//! Staging round-trip and operation-locking scenarios.

use std::collections::BTreeSet;
use std::sync::Arc;

use stagehand::test_support::ScriptedRemote;
use stagehand::{
    ConcurrentOperationError, HostCapabilities, InstallRequest, Instance, InstanceManager,
    KeyedLock, ManagerError, OperationArbiter, PromotionRequest,
};

fn manager(remote: &ScriptedRemote) -> InstanceManager<ScriptedRemote> {
    let mut capabilities = HostCapabilities::for_scope("acme");
    capabilities.supports_site_types = true;
    InstanceManager::new(Arc::new(remote.clone()), capabilities).expect("manager")
}

async fn installed_pair(
    remote: &ScriptedRemote,
    manager: &InstanceManager<ScriptedRemote>,
) -> (Instance, Instance) {
    let mut live = Instance::new("live", "live.example.org", "6.4");
    manager
        .install(&mut live, &InstallRequest::default())
        .await
        .expect("live install");
    remote.seed_entry(live.path.as_ref().expect("live path").as_str());

    let mut staging = Instance::new("stage", "stage.example.org", "6.4");
    let request = InstallRequest {
        credentials: stagehand::CredentialHints {
            name: Some(String::from("acme_stage")),
            user: Some(String::from("acme_stageuser")),
            password: None,
        },
    };
    manager
        .create_staging(&live, &mut staging, &request)
        .await
        .expect("staging install");
    remote.seed_entry(staging.path.as_ref().expect("staging path").as_str());
    (live, staging)
}

#[tokio::test]
async fn pushing_staging_back_needs_no_reprovisioning() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);
    let (live, staging) = installed_pair(&remote, &manager).await;

    let provisioning_before = remote.calls_matching("domain.create")
        + remote.calls_matching("database.create")
        + remote.calls_matching("instance.install");

    let report = manager
        .push(
            &staging,
            &live,
            &PromotionRequest {
                push_db: true,
                ..PromotionRequest::default()
            },
        )
        .await
        .expect("push");

    assert!(!report.has_failures());
    assert_eq!(remote.calls_matching("database.sync_full"), 1);

    // The push rides the installs already in place; no domain, database, or
    // finalise call happens again.
    let provisioning_after = remote.calls_matching("domain.create")
        + remote.calls_matching("database.create")
        + remote.calls_matching("instance.install");
    assert_eq!(provisioning_after, provisioning_before);
}

#[tokio::test]
async fn selective_push_touches_only_named_tables() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);
    let (live, staging) = installed_pair(&remote, &manager).await;

    let report = manager
        .push(
            &staging,
            &live,
            &PromotionRequest {
                structural_change_tables: BTreeSet::from([String::from("settings")]),
                data_change_tables: BTreeSet::from([
                    String::from("orders"),
                    String::from("customers"),
                ]),
                ..PromotionRequest::default()
            },
        )
        .await
        .expect("push");

    assert!(!report.has_failures());
    assert_eq!(remote.calls_matching("database.sync_full"), 0);
    assert_eq!(remote.calls_matching("database.sync_structure"), 1);
    assert_eq!(remote.calls_matching("database.sync_data"), 2);
    assert_eq!(remote.calls_matching("file.compress"), 1);
}

#[tokio::test]
async fn empty_push_is_rejected_without_remote_calls() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);
    let (live, staging) = installed_pair(&remote, &manager).await;
    let calls_before = remote.total_calls();

    let err = manager
        .push(&staging, &live, &PromotionRequest::default())
        .await
        .expect_err("expected no-op rejection");

    assert!(matches!(
        err,
        ManagerError::Promotion(stagehand::PromotionError::NoOp)
    ));
    assert_eq!(remote.total_calls(), calls_before);
}

#[tokio::test]
async fn busy_instance_rejects_a_second_operation() {
    let arbiter = KeyedLock::new();
    let _held = arbiter.try_acquire("inst-1").expect("first claim");

    let remote = ScriptedRemote::new();
    let manager = InstanceManager::with_arbiter(
        Arc::new(remote.clone()),
        HostCapabilities::for_scope("acme"),
        arbiter,
    )
    .expect("manager");

    let mut target = Instance::new("inst-1", "shop.example.org", "6.4");
    let err = manager
        .install(&mut target, &InstallRequest::default())
        .await
        .expect_err("expected lock rejection");

    assert!(matches!(
        err,
        ManagerError::Concurrent(ConcurrentOperationError { .. })
    ));
    // Rejection happens before any remote traffic.
    assert_eq!(remote.total_calls(), 0);
}

#[tokio::test]
async fn lock_release_allows_the_next_operation() {
    let arbiter = KeyedLock::new();
    let remote = ScriptedRemote::new();
    let manager = InstanceManager::with_arbiter(
        Arc::new(remote.clone()),
        HostCapabilities::for_scope("acme"),
        arbiter.clone(),
    )
    .expect("manager");

    {
        let _held = arbiter.try_acquire("inst-1").expect("first claim");
        let mut target = Instance::new("inst-1", "shop.example.org", "6.4");
        assert!(manager
            .install(&mut target, &InstallRequest::default())
            .await
            .is_err());
    }

    let mut target = Instance::new("inst-1", "shop.example.org", "6.4");
    manager
        .install(&mut target, &InstallRequest::default())
        .await
        .expect("install after release");
}
