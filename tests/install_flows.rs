//! End-to-end install scenarios against the scripted remote.

use std::sync::Arc;

use camino::Utf8PathBuf;
use stagehand::test_support::ScriptedRemote;
use stagehand::{
    HostCapabilities, InstallRequest, InstallStage, Instance, InstanceManager, SiteType,
    StageFailure, Template, TemplateDetails,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn manager(remote: &ScriptedRemote) -> InstanceManager<ScriptedRemote> {
    init_tracing();
    InstanceManager::new(Arc::new(remote.clone()), HostCapabilities::for_scope("acme"))
        .expect("manager")
}

fn manager_with_site_types(remote: &ScriptedRemote) -> InstanceManager<ScriptedRemote> {
    let mut capabilities = HostCapabilities::for_scope("acme");
    capabilities.supports_site_types = true;
    InstanceManager::new(Arc::new(remote.clone()), capabilities).expect("manager")
}

#[tokio::test]
async fn clean_install_provisions_everything_and_populates_the_record() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);
    let mut target = Instance::new("inst-1", "shop.example.org", "6.4");

    let result = manager
        .install(&mut target, &InstallRequest::default())
        .await
        .expect("install");

    // Generated credentials: all three populated, password 16 random bytes
    // hex-encoded.
    assert_eq!(result.database.name, "acme_app");
    assert_eq!(result.database.user, "acme_appuser");
    assert_eq!(result.database.password.len(), 32);
    assert!(result.database.password.chars().all(|c| c.is_ascii_hexdigit()));

    // Record populated atomically on success.
    assert_eq!(target.path.as_deref(), Some(result.path.as_path()));
    assert_eq!(target.remote_id.as_deref(), Some("remote-1"));
    assert_eq!(
        target.install_details.database.as_ref(),
        Some(&result.database)
    );

    // Clean installs fetch pristine files; nothing is cloned.
    assert_eq!(remote.calls_matching("instance.fetch_application"), 1);
    assert_eq!(remote.calls_matching("file.compress"), 0);
    assert_eq!(remote.calls_matching("domain.create"), 1);
    assert_eq!(remote.calls_matching("file.write"), 1);
}

#[tokio::test]
async fn failed_database_stage_leaves_the_record_untouched() {
    let remote = ScriptedRemote::new();
    remote.fail_next("database.create", "quota exceeded");
    let manager = manager(&remote);
    let mut target = Instance::new("inst-1", "shop.example.org", "6.4");

    let err = manager
        .install(&mut target, &InstallRequest::default())
        .await
        .expect_err("expected stage failure");

    let stagehand::ManagerError::Provisioning(provisioning) = err else {
        panic!("expected provisioning error, got {err}");
    };
    assert_eq!(provisioning.failed_stage, InstallStage::DatabaseReady);
    assert!(matches!(provisioning.source, StageFailure::Database(_)));

    // A failed install signals "not installed": no remote id, no
    // credentials, no path.
    assert!(target.remote_id.is_none());
    assert!(target.install_details.database.is_none());
    assert!(target.path.is_none());
    assert_eq!(remote.calls_matching("instance.install"), 0);
}

#[tokio::test]
async fn clone_captures_the_source_and_transfers_it() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);

    let mut source = Instance::new("src", "live.example.org", "6.4");
    manager
        .install(&mut source, &InstallRequest::default())
        .await
        .expect("source install");
    remote.seed_entry(source.path.as_ref().expect("source path").as_str());

    let mut target = Instance::new("dst", "copy.example.org", "6.4");
    let request = InstallRequest {
        credentials: stagehand::CredentialHints {
            name: Some(String::from("acme_copy")),
            user: Some(String::from("acme_copyuser")),
            password: None,
        },
    };
    manager
        .clone_from(&source, &mut target, &request)
        .await
        .expect("clone");

    // Source files and database were packaged and moved across.
    assert_eq!(remote.calls_matching("database.dump"), 1);
    assert_eq!(remote.calls_matching("file.compress"), 1);
    assert_eq!(remote.calls_matching("file.extract"), 1);

    // The clone got a fresh database, not the source's.
    assert_ne!(
        target.install_details.database.as_ref().expect("target db").password,
        source.install_details.database.as_ref().expect("source db").password,
    );

    // The finalise call points the remote at the staged copy, keyed by the
    // clone's document root rather than the source archive.
    let finalize = remote.last_finalize_request().expect("finalise recorded");
    assert_eq!(
        finalize.import_archive,
        Some(Utf8PathBuf::from("/tmp/.stagehand/app_copy.example.org.zip"))
    );
}

#[tokio::test]
async fn template_install_reuses_embedded_config_when_complete() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);
    let template = Template {
        id: String::from("tpl-1"),
        path: Utf8PathBuf::from("/srv/templates/storefront.zip"),
        details: TemplateDetails {
            domain_hint: Some(String::from("demo.example.org")),
            is_complete: true,
            version: String::from("6.4"),
            db_prefix: Some(String::from("sf_")),
        },
    };
    let mut target = Instance::new("inst-1", "new.example.org", "6.4");

    manager
        .install_from_template(&template, &mut target, &InstallRequest::default())
        .await
        .expect("template install");

    // Archive uploaded and unpacked; config writing skipped because the
    // template already ships one.
    assert_eq!(remote.calls_matching("file.upload"), 1);
    assert_eq!(remote.calls_matching("file.extract"), 1);
    assert_eq!(remote.calls_matching("file.write"), 0);
    assert_eq!(target.install_details.template_id.as_deref(), Some("tpl-1"));
    assert_eq!(target.install_details.db_prefix.as_deref(), Some("sf_"));
}

#[tokio::test]
async fn incomplete_template_still_gets_a_config() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);
    let template = Template {
        id: String::from("tpl-2"),
        path: Utf8PathBuf::from("/srv/templates/bare.zip"),
        details: TemplateDetails {
            domain_hint: None,
            is_complete: false,
            version: String::from("6.4"),
            db_prefix: None,
        },
    };
    let mut target = Instance::new("inst-1", "new.example.org", "6.4");

    manager
        .install_from_template(&template, &mut target, &InstallRequest::default())
        .await
        .expect("template install");

    assert_eq!(remote.calls_matching("file.write"), 1);
}

#[tokio::test]
async fn staging_tags_the_copy_and_records_its_own_remote_id() {
    let remote = ScriptedRemote::new();
    let manager = manager_with_site_types(&remote);

    let mut source = Instance::new("live", "live.example.org", "6.4");
    manager
        .install(&mut source, &InstallRequest::default())
        .await
        .expect("source install");
    remote.seed_entry(source.path.as_ref().expect("source path").as_str());

    let mut staging = Instance::new("stage", "stage.example.org", "6.4");
    manager
        .create_staging(&source, &mut staging, &InstallRequest::default())
        .await
        .expect("staging");

    assert_eq!(staging.site_type, Some(SiteType::Staging));
    assert_ne!(staging.remote_id, source.remote_id);
    assert!(staging.remote_id.is_some());
}

#[tokio::test]
async fn preparing_the_same_domain_twice_creates_it_once() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);

    let mut first = Instance::new("a", "same.example.org", "6.4");
    manager
        .install(&mut first, &InstallRequest::default())
        .await
        .expect("first install");

    let mut second = Instance::new("b", "same.example.org", "6.4");
    manager
        .install(&mut second, &InstallRequest::default())
        .await
        .expect("second install");

    assert_eq!(remote.calls_matching("domain.create"), 1);
    assert_eq!(first.path, second.path);
}

#[tokio::test]
async fn delete_is_a_single_remote_call_with_flags() {
    let remote = ScriptedRemote::new();
    let manager = manager(&remote);

    let mut instance = Instance::new("inst-1", "shop.example.org", "6.4");
    manager
        .install(&mut instance, &InstallRequest::default())
        .await
        .expect("install");

    manager
        .delete(
            &instance,
            stagehand::DeleteParams {
                remove_data: true,
                remove_database: true,
            },
        )
        .await
        .expect("delete");

    assert_eq!(remote.calls_matching("instance.delete"), 1);
}
