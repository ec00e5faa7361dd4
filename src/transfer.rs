//! Moving snapshots and raw file trees between instances.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::capabilities::HostCapabilities;
use crate::model::Snapshot;
use crate::remote::{ByteStream, FileApi, RemoteError, with_deadline};

/// Errors raised while moving data between locations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransferError {
    /// Raised when the upload leg fails; nothing was extracted.
    #[error("upload failed: {source}")]
    Upload {
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when extraction fails after a completed upload.
    #[error("extraction failed: {source}")]
    Extract {
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when a server-side copy fails.
    #[error("copy failed: {source}")]
    Copy {
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when a download stream cannot be opened.
    #[error("download failed: {source}")]
    Download {
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
}

/// Moves snapshots and raw paths to destination instances.
///
/// Transfers stream through the remote in bounded chunks; nothing is
/// buffered whole, since file trees routinely exceed available memory.
/// Extraction only starts once the upload primitive has acknowledged
/// completion.
#[derive(Clone, Debug)]
pub struct TransferMediator<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
}

impl<R: FileApi> TransferMediator<R> {
    /// Creates a mediator for the given remote and capability descriptor.
    #[must_use]
    pub const fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            remote,
            capabilities,
        }
    }

    /// Uploads `snapshot`'s archive to a destination-keyed staging path and
    /// extracts it in place over `dest`, overwriting existing entries.
    ///
    /// Staging under the destination's name keeps the copy distinct from the
    /// source archive, which may still be needed after extraction. Returns
    /// the staged path.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Upload`] or [`TransferError::Extract`]
    /// depending on which leg failed.
    pub async fn move_snapshot(
        &self,
        snapshot: &Snapshot,
        dest: &Utf8Path,
    ) -> Result<Utf8PathBuf, TransferError> {
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;
        let archive = snapshot.archive_path();
        let key = dest.file_name().unwrap_or("incoming");
        let staged = self.capabilities.scratch_dir.join(format!("app_{key}.zip"));

        with_deadline("file.upload", timeout, self.remote.upload(scope, &archive, &staged))
            .await
            .map_err(|source| TransferError::Upload { source })?;

        with_deadline(
            "file.extract",
            timeout,
            self.remote.extract_zip(scope, &staged, dest),
        )
        .await
        .map_err(|source| TransferError::Extract { source })?;

        info!(archive = %archive, dest = %dest, "snapshot transferred");
        Ok(staged)
    }

    /// Uploads the raw entry at `source` to `dest` without extraction.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Upload`] when the upload fails.
    pub async fn move_path(&self, source: &Utf8Path, dest: &Utf8Path) -> Result<(), TransferError> {
        let scope = &self.capabilities.scope;
        with_deadline(
            "file.upload",
            self.capabilities.remote_timeout,
            self.remote.upload(scope, source, dest),
        )
        .await
        .map_err(|source| TransferError::Upload { source })
    }

    /// Copies `source` to `dest` server-side, for moves within one host.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Copy`] when the copy fails.
    pub async fn copy_path(&self, source: &Utf8Path, dest: &Utf8Path) -> Result<(), TransferError> {
        let scope = &self.capabilities.scope;
        with_deadline(
            "file.copy",
            self.capabilities.remote_timeout,
            self.remote.copy(scope, source, dest),
        )
        .await
        .map_err(|source| TransferError::Copy { source })
    }

    /// Opens a download stream for `snapshot`'s archive, so the owning
    /// system can pull it off the host.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Download`] when the stream cannot be opened.
    pub async fn fetch_snapshot(&self, snapshot: &Snapshot) -> Result<ByteStream, TransferError> {
        let scope = &self.capabilities.scope;
        with_deadline(
            "file.download",
            self.capabilities.remote_timeout,
            self.remote.download(scope, &snapshot.archive_path()),
        )
        .await
        .map_err(|source| TransferError::Download { source })
    }
}
