//! Bridging between the snapshot builder and the remote backup store.
//!
//! Remotes that can capture backups server-side get a thin pass-through;
//! remotes that cannot get the snapshot builder, whose archive is handed to
//! the backup store verbatim.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::capabilities::HostCapabilities;
use crate::model::{Backup, Instance};
use crate::remote::{BackupApi, BackupSpec, ByteStream, DatabaseApi, FileApi, RemoteError, with_deadline};
use crate::snapshot::{ArchiveError, SnapshotBuilder, SnapshotSource};

/// Errors raised by the backup bridge.
#[derive(Debug, Error)]
pub enum BackupBridgeError {
    /// Raised when building the local snapshot for a backup fails.
    #[error("backup snapshot failed: {0}")]
    Snapshot(#[from] ArchiveError),
    /// Raised when a remote backup primitive fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Raised when a backup is requested for an instance without an install.
    #[error("instance {id} is not installed")]
    NotInstalled {
        /// Identifier of the uninstalled instance.
        id: String,
    },
    /// Raised when a backup covers neither the database nor the directory.
    #[error("backup of instance {id} covers nothing")]
    EmptyCoverage {
        /// Identifier of the instance the empty request named.
        id: String,
    },
}

/// Adapts the snapshot builder and the remote backup primitives into the
/// list/create/restore/delete/download surface the owning system consumes.
#[derive(Clone, Debug)]
pub struct BackupBridge<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
    snapshots: SnapshotBuilder<R>,
}

impl<R: BackupApi + FileApi + DatabaseApi> BackupBridge<R> {
    /// Creates a bridge for the given remote and capability descriptor.
    #[must_use]
    pub fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            snapshots: SnapshotBuilder::new(Arc::clone(&remote), capabilities.clone()),
            remote,
            capabilities,
        }
    }

    /// Lists backups stored for the account.
    ///
    /// # Errors
    ///
    /// Returns [`BackupBridgeError::Remote`] when the listing fails.
    pub async fn list(&self) -> Result<Vec<Backup>, BackupBridgeError> {
        let backups = with_deadline(
            "backup.list",
            self.capabilities.remote_timeout,
            self.remote.list_backups(&self.capabilities.scope),
        )
        .await?;
        Ok(backups)
    }

    /// Creates a manual backup of `instance` covering the requested data.
    ///
    /// With server-side capture this is a single remote call; without it the
    /// snapshot builder produces the archive first and the remote merely
    /// stores it. A database-only request archives just the dump, so the
    /// stored artifact matches its coverage.
    ///
    /// # Errors
    ///
    /// Returns [`BackupBridgeError::EmptyCoverage`] when neither the database
    /// nor the directory was requested, [`BackupBridgeError::NotInstalled`]
    /// for an uninstalled instance, [`BackupBridgeError::Snapshot`] when
    /// local capture fails, or [`BackupBridgeError::Remote`] when the store
    /// rejects the backup.
    pub async fn create(
        &self,
        instance: &Instance,
        wants_database: bool,
        wants_directory: bool,
    ) -> Result<Backup, BackupBridgeError> {
        if !wants_database && !wants_directory {
            return Err(BackupBridgeError::EmptyCoverage {
                id: instance.id.clone(),
            });
        }

        let archive = if self.capabilities.supports_server_side_backups {
            None
        } else {
            let source = backup_source(instance, wants_database)?;
            let snapshot = if wants_directory {
                self.snapshots.capture(&source).await?
            } else {
                self.snapshots.capture_database(&source).await?
            };
            Some(snapshot.archive_path())
        };

        let spec = BackupSpec {
            database: wants_database,
            directory: wants_directory,
            archive,
        };
        let backup = with_deadline(
            "backup.create",
            self.capabilities.remote_timeout,
            self.remote.create_backup(&self.capabilities.scope, &spec),
        )
        .await?;
        info!(
            instance = %instance.id,
            backup_id = %backup.location.remote_backup_id,
            "backup created"
        );
        Ok(backup)
    }

    /// Deletes the backup identified by `remote_backup_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupBridgeError::Remote`] when the store reports a fault,
    /// including deletion of an unknown id.
    pub async fn delete(&self, remote_backup_id: &str) -> Result<(), BackupBridgeError> {
        with_deadline(
            "backup.delete",
            self.capabilities.remote_timeout,
            self.remote
                .delete_backup(&self.capabilities.scope, remote_backup_id),
        )
        .await?;
        Ok(())
    }

    /// Restores the backup identified by `remote_backup_id` in place.
    ///
    /// Restore is destructive and irreversible from here; a failure is final
    /// and never retried by this layer, since re-running a partially applied
    /// restore could compound the damage.
    ///
    /// # Errors
    ///
    /// Returns [`BackupBridgeError::Remote`] when the restore fails.
    pub async fn restore(&self, remote_backup_id: &str) -> Result<(), BackupBridgeError> {
        with_deadline(
            "backup.restore",
            self.capabilities.remote_timeout,
            self.remote
                .restore_backup(&self.capabilities.scope, remote_backup_id),
        )
        .await?;
        info!(backup_id = remote_backup_id, "backup restored");
        Ok(())
    }

    /// Opens a bounded-chunk download stream for the backup.
    ///
    /// # Errors
    ///
    /// Returns [`BackupBridgeError::Remote`] when the stream cannot be
    /// opened.
    pub async fn download(&self, remote_backup_id: &str) -> Result<ByteStream, BackupBridgeError> {
        let stream = with_deadline(
            "backup.download",
            self.capabilities.remote_timeout,
            self.remote
                .download_backup(&self.capabilities.scope, remote_backup_id),
        )
        .await?;
        Ok(stream)
    }
}

fn backup_source(
    instance: &Instance,
    wants_database: bool,
) -> Result<SnapshotSource, BackupBridgeError> {
    let path = instance
        .path
        .clone()
        .ok_or_else(|| BackupBridgeError::NotInstalled {
            id: instance.id.clone(),
        })?;
    Ok(SnapshotSource {
        id: instance.id.clone(),
        path,
        database: if wants_database {
            instance
                .install_details
                .database
                .as_ref()
                .map(|creds| creds.name.clone())
        } else {
            None
        },
        version: instance.version.clone(),
        db_prefix: instance.install_details.db_prefix.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatabaseCredentials, InstallDetails};
    use crate::test_support::ScriptedRemote;
    use camino::Utf8PathBuf;

    fn installed_instance() -> Instance {
        let mut instance = Instance::new("inst-1", "shop.example.org", "6.4");
        instance.remote_id = Some(String::from("r-1"));
        instance.path = Some(Utf8PathBuf::from("/home/acme/shop"));
        instance.install_details = InstallDetails {
            database: Some(DatabaseCredentials {
                host: String::from("localhost"),
                name: String::from("acme_app"),
                user: String::from("acme_appuser"),
                password: String::from("deadbeefdeadbeef"),
            }),
            ..InstallDetails::default()
        };
        instance
    }

    fn bridge(remote: ScriptedRemote, server_side: bool) -> BackupBridge<ScriptedRemote> {
        let mut capabilities = HostCapabilities::for_scope("acme");
        capabilities.supports_server_side_backups = server_side;
        BackupBridge::new(Arc::new(remote), capabilities)
    }

    #[tokio::test]
    async fn server_side_create_skips_the_snapshot_builder() {
        let remote = ScriptedRemote::new();
        let backup = bridge(remote.clone(), true)
            .create(&installed_instance(), true, true)
            .await
            .expect("create");

        assert!(backup.database);
        assert!(backup.directory);
        assert_eq!(remote.calls_matching("file.compress"), 0);
        assert_eq!(remote.calls_matching("backup.create"), 1);
    }

    #[tokio::test]
    async fn local_create_builds_the_archive_first() {
        let remote = ScriptedRemote::new();
        remote.seed_entry("/home/acme/shop");

        bridge(remote.clone(), false)
            .create(&installed_instance(), true, true)
            .await
            .expect("create");

        assert_eq!(remote.calls_matching("database.dump"), 1);
        assert_eq!(remote.calls_matching("file.compress"), 1);
        assert_eq!(remote.calls_matching("backup.create"), 1);
        let spec = remote.last_backup_spec().expect("spec recorded");
        assert_eq!(
            spec.archive,
            Some(Utf8PathBuf::from("/tmp/.stagehand/app_inst-1.zip"))
        );
    }

    #[tokio::test]
    async fn database_only_create_archives_just_the_dump() {
        let remote = ScriptedRemote::new();

        bridge(remote.clone(), false)
            .create(&installed_instance(), true, false)
            .await
            .expect("create");

        assert_eq!(remote.calls_matching("database.dump"), 1);
        assert_eq!(remote.calls_matching("file.compress"), 1);
        assert_eq!(remote.calls_matching("file.exists"), 0);
        let spec = remote.last_backup_spec().expect("spec recorded");
        assert!(spec.database);
        assert!(!spec.directory);
        assert_eq!(
            spec.archive,
            Some(Utf8PathBuf::from("/tmp/.stagehand/app_inst-1.zip"))
        );
    }

    #[tokio::test]
    async fn empty_coverage_is_rejected_without_remote_calls() {
        let remote = ScriptedRemote::new();

        let err = bridge(remote.clone(), false)
            .create(&installed_instance(), false, false)
            .await
            .expect_err("expected rejection");

        assert!(matches!(
            err,
            BackupBridgeError::EmptyCoverage { ref id } if id == "inst-1"
        ));
        assert_eq!(remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn delete_of_unknown_id_surfaces_the_remote_fault() {
        let remote = ScriptedRemote::new();
        remote.fail_next("backup.delete", "backup not found");

        let err = bridge(remote, true)
            .delete("missing-id")
            .await
            .expect_err("expected fault");

        assert!(matches!(
            err,
            BackupBridgeError::Remote(RemoteError::Fault { .. })
        ));
    }

    #[tokio::test]
    async fn restore_failure_is_not_retried() {
        let remote = ScriptedRemote::new();
        remote.fail_next("backup.restore", "restore interrupted");

        let err = bridge(remote.clone(), true)
            .restore("bk-1")
            .await
            .expect_err("expected fault");

        assert!(matches!(err, BackupBridgeError::Remote(_)));
        assert_eq!(remote.calls_matching("backup.restore"), 1);
    }
}
