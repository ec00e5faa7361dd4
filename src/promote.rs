//! Selective promotion of files and database changes between instances.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::capabilities::HostCapabilities;
use crate::model::Instance;
use crate::remote::{DatabaseApi, FileApi, RemoteError, with_deadline};
use crate::snapshot::SnapshotBuilder;
use crate::transfer::TransferMediator;

/// Transient description of one push operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PromotionRequest {
    /// Overwrite the target's files with the source's.
    pub overwrite_files: bool,
    /// Replace the target database wholesale.
    pub push_db: bool,
    /// Recreate the target's database views from the source.
    pub push_views: bool,
    /// Tables whose schema changes should be applied, without data.
    pub structural_change_tables: BTreeSet<String>,
    /// Tables whose row data should be replaced, without schema changes.
    pub data_change_tables: BTreeSet<String>,
    /// Stop at the first failed category instead of attempting the rest.
    pub fail_fast: bool,
}

impl PromotionRequest {
    /// Returns `true` when the request selects nothing to push.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.overwrite_files
            && !self.push_db
            && !self.push_views
            && self.structural_change_tables.is_empty()
            && self.data_change_tables.is_empty()
    }
}

/// Result of one push category.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CategoryOutcome {
    /// The category ran and succeeded.
    Applied,
    /// The category was not selected (or fail-fast stopped before it).
    Skipped,
    /// The category ran and failed.
    Failed {
        /// Failure description, passed through from the remote.
        message: String,
    },
}

impl CategoryOutcome {
    /// Returns `true` for [`CategoryOutcome::Failed`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Per-category outcomes of one push, in the fixed execution order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PromotionReport {
    /// File overwrite category.
    pub files: CategoryOutcome,
    /// Full database (and views) category.
    pub database: CategoryOutcome,
    /// Structural per-table sync category.
    pub structure: CategoryOutcome,
    /// Data per-table sync category.
    pub data: CategoryOutcome,
}

impl PromotionReport {
    fn skipped() -> Self {
        Self {
            files: CategoryOutcome::Skipped,
            database: CategoryOutcome::Skipped,
            structure: CategoryOutcome::Skipped,
            data: CategoryOutcome::Skipped,
        }
    }

    /// Returns `true` when any category failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.files.is_failure()
            || self.database.is_failure()
            || self.structure.is_failure()
            || self.data.is_failure()
    }
}

/// Errors raised by the promotion engine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PromotionError {
    /// Raised before any remote call when the request selects nothing.
    #[error("promotion request selects nothing to push")]
    NoOp,
    /// Raised when the source or target instance is not installed.
    #[error("instance {id} is not installed")]
    NotInstalled {
        /// Identifier of the uninstalled instance.
        id: String,
    },
    /// Raised when at least one category failed; the report shows exactly
    /// which, so the caller can re-issue a narrower push.
    #[error("promotion partially failed")]
    Partial {
        /// Per-category outcomes.
        report: PromotionReport,
    },
}

/// Pushes files and database changes from a source to a target instance.
///
/// The four categories run sequentially in a fixed order (files, then full
/// database, then structural table sync, then data table sync) because the
/// remote gives no independence guarantee between its file and database
/// primitives. A category failure is recorded and the rest still run,
/// unless the request asks for fail-fast.
#[derive(Clone, Debug)]
pub struct PromotionEngine<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
    snapshots: SnapshotBuilder<R>,
    transfers: TransferMediator<R>,
}

struct DatabasePair<'a> {
    source: &'a str,
    target: &'a str,
}

impl<R: FileApi + DatabaseApi> PromotionEngine<R> {
    /// Creates an engine wiring snapshot and transfer helpers to one remote.
    #[must_use]
    pub fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            snapshots: SnapshotBuilder::new(Arc::clone(&remote), capabilities.clone()),
            transfers: TransferMediator::new(Arc::clone(&remote), capabilities.clone()),
            remote,
            capabilities,
        }
    }

    /// Executes `request` from `source` to `target` and reports per-category
    /// outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`PromotionError::NoOp`] for an empty request before any
    /// remote call, [`PromotionError::NotInstalled`] when either instance
    /// lacks an install, and [`PromotionError::Partial`] when at least one
    /// selected category failed.
    pub async fn push(
        &self,
        source: &Instance,
        target: &Instance,
        request: &PromotionRequest,
    ) -> Result<PromotionReport, PromotionError> {
        if request.is_noop() {
            return Err(PromotionError::NoOp);
        }
        require_installed(source)?;
        require_installed(target)?;

        let mut report = PromotionReport::skipped();
        let mut abort = false;

        if request.overwrite_files {
            report.files = self.push_files(source, target).await;
            abort = request.fail_fast && report.files.is_failure();
        }

        if !abort && (request.push_db || request.push_views) {
            report.database = self.push_database(source, target, request).await;
            abort = request.fail_fast && report.database.is_failure();
        }

        if !abort && !request.structural_change_tables.is_empty() {
            report.structure = self
                .sync_tables(source, target, &request.structural_change_tables, Sync::Structure)
                .await;
            abort = request.fail_fast && report.structure.is_failure();
        }

        if !abort && !request.data_change_tables.is_empty() {
            report.data = self
                .sync_tables(source, target, &request.data_change_tables, Sync::Data)
                .await;
        }

        if report.has_failures() {
            warn!(source = %source.id, target = %target.id, "promotion partially failed");
            return Err(PromotionError::Partial { report });
        }
        info!(source = %source.id, target = %target.id, "promotion complete");
        Ok(report)
    }

    /// Files category: snapshot the source tree and extract it over the
    /// target's document root.
    async fn push_files(&self, source: &Instance, target: &Instance) -> CategoryOutcome {
        let (Some(source_path), Some(target_path)) = (&source.path, &target.path) else {
            return CategoryOutcome::Failed {
                message: String::from("instance path missing"),
            };
        };
        let snapshot_source = crate::snapshot::SnapshotSource {
            id: source.id.clone(),
            path: source_path.clone(),
            database: None,
            version: source.version.clone(),
            db_prefix: source.install_details.db_prefix.clone(),
        };
        let result = async {
            let snapshot = self.snapshots.capture(&snapshot_source).await?;
            self.transfers
                .move_snapshot(&snapshot, target_path)
                .await
                .map(|_| ())
                .map_err(|err| err.to_string().into())
        }
        .await;
        outcome_from(result)
    }

    /// Database category: full replacement when `push_db`, then views when
    /// `push_views`.
    async fn push_database(
        &self,
        source: &Instance,
        target: &Instance,
        request: &PromotionRequest,
    ) -> CategoryOutcome {
        let pair = match database_pair(source, target) {
            Ok(pair) => pair,
            Err(message) => return CategoryOutcome::Failed { message },
        };
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;

        let result: Result<(), RemoteError> = async {
            if request.push_db {
                with_deadline(
                    "database.sync_full",
                    timeout,
                    self.remote.sync_full(scope, pair.source, pair.target),
                )
                .await?;
            }
            if request.push_views {
                with_deadline(
                    "database.sync_views",
                    timeout,
                    self.remote.sync_views(scope, pair.source, pair.target),
                )
                .await?;
            }
            Ok(())
        }
        .await;
        outcome_from(result.map_err(|err| err.to_string().into()))
    }

    async fn sync_tables(
        &self,
        source: &Instance,
        target: &Instance,
        tables: &BTreeSet<String>,
        mode: Sync,
    ) -> CategoryOutcome {
        let pair = match database_pair(source, target) {
            Ok(pair) => pair,
            Err(message) => return CategoryOutcome::Failed { message },
        };
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;

        for table in tables {
            let result = match mode {
                Sync::Structure => {
                    with_deadline(
                        "database.sync_structure",
                        timeout,
                        self.remote
                            .sync_table_structure(scope, pair.source, pair.target, table),
                    )
                    .await
                }
                Sync::Data => {
                    with_deadline(
                        "database.sync_data",
                        timeout,
                        self.remote
                            .sync_table_data(scope, pair.source, pair.target, table),
                    )
                    .await
                }
            };
            if let Err(err) = result {
                return CategoryOutcome::Failed {
                    message: format!("table {table}: {err}"),
                };
            }
        }
        CategoryOutcome::Applied
    }
}

#[derive(Clone, Copy)]
enum Sync {
    Structure,
    Data,
}

struct FailureMessage(String);

impl From<String> for FailureMessage {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<crate::snapshot::ArchiveError> for FailureMessage {
    fn from(value: crate::snapshot::ArchiveError) -> Self {
        Self(value.to_string())
    }
}

fn outcome_from(result: Result<(), FailureMessage>) -> CategoryOutcome {
    match result {
        Ok(()) => CategoryOutcome::Applied,
        Err(FailureMessage(message)) => CategoryOutcome::Failed { message },
    }
}

fn require_installed(instance: &Instance) -> Result<(), PromotionError> {
    if instance.is_installed() {
        return Ok(());
    }
    Err(PromotionError::NotInstalled {
        id: instance.id.clone(),
    })
}

fn database_pair<'a>(
    source: &'a Instance,
    target: &'a Instance,
) -> Result<DatabasePair<'a>, String> {
    let Some(source_db) = source.install_details.database.as_ref() else {
        return Err(format!("source instance {} has no database", source.id));
    };
    let Some(target_db) = target.install_details.database.as_ref() else {
        return Err(format!("target instance {} has no database", target.id));
    };
    Ok(DatabasePair {
        source: &source_db.name,
        target: &target_db.name,
    })
}
