//! Remote hosting API abstraction.
//!
//! The hosting server is reachable only through these primitive families.
//! Each primitive is atomic on its own and non-transactional relative to
//! every other primitive; the orchestration layers above own all sequencing
//! and failure reconciliation.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

use crate::model::{Backup, DatabaseCredentials, SiteType};

/// Errors surfaced by remote primitives.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Opaque upstream failure; the remote's message is passed through.
    #[error("remote fault: {message}")]
    Fault {
        /// Message reported by the remote.
        message: String,
    },
    /// Raised when a primitive exceeds the configured deadline.
    #[error("remote call timed out: {action}")]
    Timeout {
        /// Primitive that was in flight.
        action: &'static str,
    },
}

impl RemoteError {
    /// Shorthand for a fault with the given message.
    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }
}

/// Awaits `future` under `deadline`, mapping expiry to
/// [`RemoteError::Timeout`] tagged with `action`.
///
/// Every suspension point that touches the remote goes through this wrapper;
/// a timed-out primitive is reported, never silently retried.
///
/// # Errors
///
/// Returns the future's own error, or [`RemoteError::Timeout`] on expiry.
pub async fn with_deadline<T>(
    action: &'static str,
    deadline: Duration,
    future: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_elapsed) => Err(RemoteError::Timeout { action }),
    }
}

/// Chunked byte stream used for backup downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

/// A hosting domain as reported by the remote.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DomainRecord {
    /// Fully qualified domain name.
    pub name: String,
    /// Directory the web server serves the domain from.
    pub document_root: Utf8PathBuf,
}

/// Domain primitives.
#[async_trait]
pub trait DomainApi: Send + Sync {
    /// Returns whether `domain` exists under `scope`.
    async fn domain_exists(&self, scope: &str, domain: &str) -> Result<bool, RemoteError>;

    /// Creates `domain` as an addon domain under `scope`.
    async fn create_addon_domain(&self, scope: &str, domain: &str) -> Result<(), RemoteError>;

    /// Resolves `domain`, returning `None` when the remote does not know it.
    async fn find_domain(
        &self,
        scope: &str,
        domain: &str,
    ) -> Result<Option<DomainRecord>, RemoteError>;

    /// Points `domain` at a new document root.
    async fn update_document_root(
        &self,
        scope: &str,
        domain: &str,
        document_root: &Utf8Path,
    ) -> Result<(), RemoteError>;
}

/// Database primitives, including the opaque sync/dump operations used by
/// snapshotting and promotion.
#[async_trait]
pub trait DatabaseApi: Send + Sync {
    /// Creates a database named `name` under `scope`.
    async fn create_database(&self, scope: &str, name: &str) -> Result<(), RemoteError>;

    /// Creates a database user.
    async fn create_database_user(
        &self,
        scope: &str,
        user: &str,
        password: &str,
    ) -> Result<(), RemoteError>;

    /// Grants `user` full privileges on `database`.
    async fn grant_privileges(
        &self,
        scope: &str,
        user: &str,
        database: &str,
    ) -> Result<(), RemoteError>;

    /// Returns whether `name` already exists under `scope`.
    async fn database_exists(&self, scope: &str, name: &str) -> Result<bool, RemoteError>;

    /// Exports `database` as a dump file at `dest`.
    async fn dump_database(
        &self,
        scope: &str,
        database: &str,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError>;

    /// Replaces `target` wholesale with the contents of `source`.
    async fn sync_full(&self, scope: &str, source: &str, target: &str) -> Result<(), RemoteError>;

    /// Recreates `target`'s views from `source`.
    async fn sync_views(&self, scope: &str, source: &str, target: &str) -> Result<(), RemoteError>;

    /// Applies `table`'s schema changes from `source` to `target`, without
    /// touching row data.
    async fn sync_table_structure(
        &self,
        scope: &str,
        source: &str,
        target: &str,
        table: &str,
    ) -> Result<(), RemoteError>;

    /// Replaces `table`'s row data in `target` from `source`, without schema
    /// changes.
    async fn sync_table_data(
        &self,
        scope: &str,
        source: &str,
        target: &str,
        table: &str,
    ) -> Result<(), RemoteError>;
}

/// File-tree primitives.
#[async_trait]
pub trait FileApi: Send + Sync {
    /// Uploads the entry at `source` to `dest`.
    async fn upload(&self, scope: &str, source: &Utf8Path, dest: &Utf8Path)
    -> Result<(), RemoteError>;

    /// Copies `source` to `dest` server-side.
    async fn copy(&self, scope: &str, source: &Utf8Path, dest: &Utf8Path)
    -> Result<(), RemoteError>;

    /// Moves `source` to `dest` server-side.
    async fn move_entry(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError>;

    /// Removes the entry at `path`.
    async fn remove(&self, scope: &str, path: &Utf8Path) -> Result<(), RemoteError>;

    /// Compresses the tree at `source` into a zip archive at `dest`.
    async fn compress_to_zip(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError>;

    /// Extracts the archive at `source` into `dest`, overwriting existing
    /// entries.
    async fn extract_zip(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError>;

    /// Opens a bounded-chunk download stream for the entry at `path`.
    async fn download(&self, scope: &str, path: &Utf8Path) -> Result<ByteStream, RemoteError>;

    /// Returns whether an entry exists at `path`.
    async fn entry_exists(&self, scope: &str, path: &Utf8Path) -> Result<bool, RemoteError>;

    /// Returns the size in bytes of the entry at `path`.
    async fn entry_size(&self, scope: &str, path: &Utf8Path) -> Result<u64, RemoteError>;

    /// Writes `contents` as `filename` inside `dir`.
    async fn write_file(
        &self,
        scope: &str,
        dir: &Utf8Path,
        filename: &str,
        contents: &str,
    ) -> Result<(), RemoteError>;
}

/// What a backup should cover, and optionally the pre-built archive to store
/// when the remote cannot capture server-side.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BackupSpec {
    /// Include database data.
    pub database: bool,
    /// Include file-system data.
    pub directory: bool,
    /// Archive already built by the caller, to be stored verbatim.
    pub archive: Option<Utf8PathBuf>,
}

/// Backup-store primitives.
#[async_trait]
pub trait BackupApi: Send + Sync {
    /// Lists backups stored for `scope`.
    async fn list_backups(&self, scope: &str) -> Result<Vec<Backup>, RemoteError>;

    /// Creates a backup per `spec` and returns the stored artifact.
    async fn create_backup(&self, scope: &str, spec: &BackupSpec) -> Result<Backup, RemoteError>;

    /// Deletes the backup identified by `remote_backup_id`.
    async fn delete_backup(&self, scope: &str, remote_backup_id: &str) -> Result<(), RemoteError>;

    /// Restores the backup identified by `remote_backup_id` in place.
    async fn restore_backup(&self, scope: &str, remote_backup_id: &str) -> Result<(), RemoteError>;

    /// Opens a bounded-chunk download stream for the backup.
    async fn download_backup(
        &self,
        scope: &str,
        remote_backup_id: &str,
    ) -> Result<ByteStream, RemoteError>;
}

/// Variant tag sent with the finalise call so the remote knows which install
/// flow produced the staged files.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallKind {
    /// Fresh install from fetched application files.
    Clean,
    /// Copy of an existing instance.
    Clone,
    /// Unpacked from a pre-built template archive.
    Template,
    /// Staging copy that will later be pushed back to its source.
    Staging,
}

/// Payload for the remote finalise call that turns staged files and a
/// provisioned database into a running instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FinalizeRequest {
    /// Install flow that staged the files.
    pub install_type: InstallKind,
    /// Primary hostname of the instance.
    pub domain: String,
    /// Document root the files were staged into.
    pub path: Utf8PathBuf,
    /// Credentials the application configuration should use.
    pub database: DatabaseCredentials,
    /// Application version being installed.
    pub version: String,
    /// Archive the remote should import a database dump from, when the flow
    /// staged one (clone, template, staging).
    pub import_archive: Option<Utf8PathBuf>,
}

/// Result of the remote finalise call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct FinalizeOutcome {
    /// Identifier the remote assigned to the new instance.
    pub remote_id: String,
}

/// Storage, bandwidth, and visitor counters for one instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceStats {
    /// Disk usage in bytes.
    pub storage_usage: u64,
    /// Disk ceiling in bytes, when the plan has one.
    pub storage_maximum: Option<u64>,
    /// Bandwidth used this period, in bytes.
    pub bandwidth_usage: u64,
    /// Unique visitors this month.
    pub unique_visitors: u64,
    /// Total visits this month.
    pub total_visitors: u64,
}

/// One webserver log file advertised by the remote.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogFile {
    /// Directory the file lives in, when disclosed.
    pub path: Option<Utf8PathBuf>,
    /// File name.
    pub file: String,
    /// Last-modified timestamp as reported by the remote.
    pub mtime: String,
}

/// Instance-level primitives.
#[async_trait]
pub trait InstanceApi: Send + Sync {
    /// Finalises an install from staged files and a provisioned database.
    async fn install_instance(
        &self,
        scope: &str,
        request: &FinalizeRequest,
    ) -> Result<FinalizeOutcome, RemoteError>;

    /// Updates the application in place.
    async fn update_instance(
        &self,
        scope: &str,
        remote_id: &str,
        create_backup: bool,
        version: &str,
    ) -> Result<(), RemoteError>;

    /// Deletes the instance, removing files and/or database per flags.
    async fn delete_instance(
        &self,
        scope: &str,
        remote_id: &str,
        remove_data: bool,
        remove_database: bool,
    ) -> Result<(), RemoteError>;

    /// Fetches pristine application files for `version` into `dest`.
    async fn fetch_application(
        &self,
        scope: &str,
        version: &str,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError>;

    /// Returns usage statistics for the instance.
    async fn get_stats(&self, scope: &str, remote_id: &str) -> Result<InstanceStats, RemoteError>;

    /// Returns bandwidth per day or month over a date range.
    async fn get_bandwidth(
        &self,
        scope: &str,
        remote_id: &str,
        start_date: &str,
        end_date: &str,
        group_by: &str,
    ) -> Result<BTreeMap<String, u64>, RemoteError>;

    /// Lists webserver log files for the instance.
    async fn list_log_files(
        &self,
        scope: &str,
        remote_id: &str,
    ) -> Result<Vec<LogFile>, RemoteError>;

    /// Returns the current site type, where supported.
    async fn get_site_type(&self, scope: &str, remote_id: &str)
    -> Result<SiteType, RemoteError>;

    /// Changes the site type, where supported.
    async fn change_site_type(
        &self,
        scope: &str,
        remote_id: &str,
        site_type: SiteType,
    ) -> Result<(), RemoteError>;
}

/// Umbrella trait implemented by complete remote hosts.
pub trait RemoteHost: DomainApi + DatabaseApi + FileApi + BackupApi + InstanceApi {}

impl<T: DomainApi + DatabaseApi + FileApi + BackupApi + InstanceApi> RemoteHost for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn with_deadline_passes_through_success() {
        let result =
            with_deadline("noop", Duration::from_secs(1), async { Ok::<_, RemoteError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn with_deadline_maps_expiry_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, RemoteError>(())
        };
        let result = with_deadline("domain.create", Duration::from_secs(1), slow).await;
        assert_eq!(
            result,
            Err(RemoteError::Timeout {
                action: "domain.create"
            })
        );
    }
}
