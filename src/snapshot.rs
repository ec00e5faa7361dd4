//! Snapshot capture: packaging an instance's files and database into one
//! portable archive.
//!
//! The same artifact serves clone-source capture, staging-source capture,
//! and backup creation, so the format never varies per caller: the file tree
//! plus a `database.sql` dump, compressed into `{scratch}/app_{id}.zip`. The
//! dump is staged beside the tree only for the duration of the capture.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::capabilities::HostCapabilities;
use crate::model::Snapshot;
use crate::remote::{DatabaseApi, FileApi, RemoteError, with_deadline};

/// Name of the database dump placed inside the captured tree.
pub const DUMP_FILENAME: &str = "database.sql";

/// Errors raised while building a snapshot.
///
/// No partial snapshot is ever returned; a failure here leaves only scratch
/// files behind.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArchiveError {
    /// Raised when the source path does not exist or cannot be read.
    #[error("snapshot source {path} is unreadable")]
    SourceUnreadable {
        /// Path that was to be captured.
        path: Utf8PathBuf,
    },
    /// Raised when dumping the database fails.
    #[error("database export for {database} failed: {source}")]
    DatabaseExport {
        /// Database that was being dumped.
        database: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when compression fails.
    #[error("compression failed: {source}")]
    Compression {
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when a database-only capture is requested for a source without
    /// a database.
    #[error("source {id} has no database to capture")]
    MissingDatabase {
        /// Identifier of the database-less source.
        id: String,
    },
    /// Raised when a remote primitive fails outside the steps above.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// What to capture: a file tree and, when the source has one, a database.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotSource {
    /// Identifier used to name the archive.
    pub id: String,
    /// Root of the file tree to capture.
    pub path: Utf8PathBuf,
    /// Database to export alongside the files, when present.
    pub database: Option<String>,
    /// Application version recorded on the snapshot.
    pub version: String,
    /// Table prefix recorded on the snapshot.
    pub db_prefix: Option<String>,
}

/// Builds self-describing archives from instances or templates.
#[derive(Clone, Debug)]
pub struct SnapshotBuilder<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
}

impl<R: FileApi + DatabaseApi> SnapshotBuilder<R> {
    /// Creates a builder for the given remote and capability descriptor.
    #[must_use]
    pub const fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            remote,
            capabilities,
        }
    }

    /// Captures `source` into a single archive under the scratch directory.
    ///
    /// `is_complete` is set only when both the file tree and a database were
    /// captured; a source without a database yields a partial snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when the source is unreadable, the database
    /// export fails, or compression fails.
    pub async fn capture(&self, source: &SnapshotSource) -> Result<Snapshot, ArchiveError> {
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;

        let readable = with_deadline(
            "file.exists",
            timeout,
            self.remote.entry_exists(scope, &source.path),
        )
        .await?;
        if !readable {
            return Err(ArchiveError::SourceUnreadable {
                path: source.path.clone(),
            });
        }

        let dump_path = source.path.join(DUMP_FILENAME);
        let db_captured = if let Some(database) = &source.database {
            self.export_database(database, &dump_path).await?;
            true
        } else {
            false
        };

        let filename = format!("app_{}.zip", source.id);
        let archive = self.capabilities.scratch_dir.join(&filename);
        with_deadline(
            "file.compress",
            timeout,
            self.remote.compress_to_zip(scope, &source.path, &archive),
        )
        .await
        .map_err(|source| ArchiveError::Compression { source })?;

        // The dump only exists to ride inside the archive; leaving it in the
        // live tree would let a later files-only sync ship it onward.
        if db_captured {
            with_deadline(
                "file.remove",
                timeout,
                self.remote.remove(scope, &dump_path),
            )
            .await?;
        }

        info!(
            archive = %archive,
            complete = db_captured,
            "captured snapshot"
        );

        Ok(Snapshot {
            directory: self.capabilities.scratch_dir.clone(),
            filename,
            version: source.version.clone(),
            is_complete: db_captured,
            db_prefix: source.db_prefix.clone(),
        })
    }

    /// Captures only `source`'s database into an archive, leaving the file
    /// tree untouched.
    ///
    /// The dump is staged in the scratch directory and removed once
    /// compressed; the resulting snapshot is always partial.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::MissingDatabase`] when the source has no
    /// database, or the export and compression errors of [`Self::capture`].
    pub async fn capture_database(
        &self,
        source: &SnapshotSource,
    ) -> Result<Snapshot, ArchiveError> {
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;
        let database = source
            .database
            .as_deref()
            .ok_or_else(|| ArchiveError::MissingDatabase {
                id: source.id.clone(),
            })?;

        let dump_path = self
            .capabilities
            .scratch_dir
            .join(format!("app_{}.sql", source.id));
        self.export_database(database, &dump_path).await?;

        let filename = format!("app_{}.zip", source.id);
        let archive = self.capabilities.scratch_dir.join(&filename);
        with_deadline(
            "file.compress",
            timeout,
            self.remote.compress_to_zip(scope, &dump_path, &archive),
        )
        .await
        .map_err(|source| ArchiveError::Compression { source })?;
        with_deadline(
            "file.remove",
            timeout,
            self.remote.remove(scope, &dump_path),
        )
        .await?;

        info!(archive = %archive, "captured database snapshot");

        Ok(Snapshot {
            directory: self.capabilities.scratch_dir.clone(),
            filename,
            version: source.version.clone(),
            is_complete: false,
            db_prefix: source.db_prefix.clone(),
        })
    }

    async fn export_database(
        &self,
        database: &str,
        dump_path: &Utf8Path,
    ) -> Result<(), ArchiveError> {
        let scope = &self.capabilities.scope;
        with_deadline(
            "database.dump",
            self.capabilities.remote_timeout,
            self.remote.dump_database(scope, database, dump_path),
        )
        .await
        .map_err(|source| ArchiveError::DatabaseExport {
            database: database.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRemote;

    fn builder(remote: ScriptedRemote) -> SnapshotBuilder<ScriptedRemote> {
        SnapshotBuilder::new(Arc::new(remote), HostCapabilities::for_scope("acme"))
    }

    fn source(database: Option<&str>) -> SnapshotSource {
        SnapshotSource {
            id: String::from("inst-1"),
            path: Utf8PathBuf::from("/home/acme/site"),
            database: database.map(str::to_owned),
            version: String::from("6.4"),
            db_prefix: Some(String::from("wp_")),
        }
    }

    #[tokio::test]
    async fn capture_with_database_is_complete() {
        let remote = ScriptedRemote::new();
        remote.seed_entry("/home/acme/site");

        let snapshot = builder(remote.clone())
            .capture(&source(Some("acme_app")))
            .await
            .expect("capture");

        assert!(snapshot.is_complete);
        assert_eq!(snapshot.filename, "app_inst-1.zip");
        assert_eq!(snapshot.archive_path(), "/tmp/.stagehand/app_inst-1.zip");
        assert_eq!(remote.calls_matching("database.dump"), 1);
        assert_eq!(remote.calls_matching("file.compress"), 1);
    }

    #[tokio::test]
    async fn dump_is_removed_from_the_tree_after_compression() {
        let remote = ScriptedRemote::new();
        remote.seed_entry("/home/acme/site");

        builder(remote.clone())
            .capture(&source(Some("acme_app")))
            .await
            .expect("capture");

        assert_eq!(remote.calls_matching("file.remove"), 1);
        let compress = remote.call_index("file.compress").expect("compress ran");
        let remove = remote.call_index("file.remove").expect("remove ran");
        assert!(compress < remove);
    }

    #[tokio::test]
    async fn database_capture_stages_the_dump_in_scratch() {
        let remote = ScriptedRemote::new();

        let snapshot = builder(remote.clone())
            .capture_database(&source(Some("acme_app")))
            .await
            .expect("capture");

        assert!(!snapshot.is_complete);
        assert_eq!(snapshot.archive_path(), "/tmp/.stagehand/app_inst-1.zip");
        assert_eq!(remote.calls_matching("database.dump"), 1);
        assert_eq!(remote.calls_matching("file.compress"), 1);
        assert_eq!(remote.calls_matching("file.remove"), 1);
        assert_eq!(remote.calls_matching("file.exists"), 0);
    }

    #[tokio::test]
    async fn database_capture_requires_a_database() {
        let remote = ScriptedRemote::new();

        let err = builder(remote.clone())
            .capture_database(&source(None))
            .await
            .expect_err("expected missing database");

        assert_eq!(
            err,
            ArchiveError::MissingDatabase {
                id: String::from("inst-1"),
            }
        );
        assert_eq!(remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn capture_without_database_is_partial() {
        let remote = ScriptedRemote::new();
        remote.seed_entry("/home/acme/site");

        let snapshot = builder(remote.clone())
            .capture(&source(None))
            .await
            .expect("capture");

        assert!(!snapshot.is_complete);
        assert_eq!(remote.calls_matching("database.dump"), 0);
    }

    #[tokio::test]
    async fn unreadable_source_is_rejected_before_any_work() {
        let remote = ScriptedRemote::new();

        let err = builder(remote.clone())
            .capture(&source(Some("acme_app")))
            .await
            .expect_err("expected unreadable source");

        assert_eq!(
            err,
            ArchiveError::SourceUnreadable {
                path: Utf8PathBuf::from("/home/acme/site"),
            }
        );
        assert_eq!(remote.calls_matching("file.compress"), 0);
    }

    #[tokio::test]
    async fn compression_failure_is_surfaced() {
        let remote = ScriptedRemote::new();
        remote.seed_entry("/home/acme/site");
        remote.fail_next("file.compress", "disk full");

        let err = builder(remote)
            .capture(&source(None))
            .await
            .expect_err("expected compression failure");

        assert!(matches!(err, ArchiveError::Compression { .. }));
    }
}
