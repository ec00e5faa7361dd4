//! Install orchestration: the staged state machine behind every install
//! variant.
//!
//! All four variants (clean, clone, template, staging) run through one
//! machine so that shared stages such as domain preparation and the remote
//! finalise call exist exactly once. Only the files-placement stage differs
//! per variant.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::capabilities::HostCapabilities;
use crate::database::{CredentialHints, DatabaseError, DatabaseProvisioner};
use crate::domain::{DomainError, DomainPreparer};
use crate::model::{
    DatabaseCredentials, DeleteParams, Instance, SiteType, Template, UpdateParams,
};
use crate::remote::{
    FinalizeRequest, InstallKind, RemoteError, RemoteHost, with_deadline,
};
use crate::snapshot::{ArchiveError, SnapshotBuilder, SnapshotSource};
use crate::transfer::{TransferError, TransferMediator};

/// Configuration file written into the document root during a clean, clone,
/// or staging install.
pub const CONFIG_FILENAME: &str = "application.config";

/// Progress marker of an install run.
///
/// Transitions are strictly sequential; a failure freezes the machine at the
/// stage whose transition was in flight.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum InstallStage {
    /// Nothing has been attempted.
    NotStarted,
    /// The domain exists and its document root is known.
    DomainPrepared,
    /// Database, user, and grant are in place.
    DatabaseReady,
    /// Application files are staged in the document root.
    FilesPlaced,
    /// Application configuration referencing the database is written.
    ConfigWritten,
    /// The remote finalise call succeeded; terminal.
    Installed,
}

impl InstallStage {
    /// Stage name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::DomainPrepared => "domain prepared",
            Self::DatabaseReady => "database ready",
            Self::FilesPlaced => "files placed",
            Self::ConfigWritten => "config written",
            Self::Installed => "installed",
        }
    }
}

/// Which install variant to run, with its source where one is needed.
#[derive(Clone, Debug)]
pub enum InstallType<'a> {
    /// Fresh install: fetch pristine application files for the version.
    Clean,
    /// Copy files and data from an existing installed instance.
    Clone(&'a Instance),
    /// Unpack a pre-built template archive.
    Template(&'a Template),
    /// Like clone, but the new instance is tagged as staging so it can be
    /// pushed back to its source later.
    Staging(&'a Instance),
}

impl InstallType<'_> {
    /// Wire tag for the remote finalise call.
    #[must_use]
    pub const fn kind(&self) -> InstallKind {
        match self {
            Self::Clean => InstallKind::Clean,
            Self::Clone(_) => InstallKind::Clone,
            Self::Template(_) => InstallKind::Template,
            Self::Staging(_) => InstallKind::Staging,
        }
    }
}

/// One install request: the variant plus any caller-pinned credentials.
#[derive(Clone, Debug, Default)]
pub struct InstallRequest {
    /// Overrides for generated database credentials.
    pub credentials: CredentialHints,
}

/// What a successful install produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningResult {
    /// Document root the instance was installed into.
    pub path: Utf8PathBuf,
    /// Credentials the instance's configuration now references.
    pub database: DatabaseCredentials,
    /// Identifier the remote assigned.
    pub remote_id: String,
}

/// The failure behind a stalled stage transition.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StageFailure {
    /// Domain preparation failed.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Database provisioning failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// Snapshot capture failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// Moving files failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// A direct remote primitive failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The clone or staging source has never been installed.
    #[error("source instance {id} is not installed")]
    SourceNotInstalled {
        /// Identifier of the unusable source.
        id: String,
    },
    /// The template archive path has no file component.
    #[error("template archive path {path} is not a file path")]
    InvalidTemplate {
        /// Offending template path.
        path: Utf8PathBuf,
    },
}

/// Errors raised by install orchestration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("install of instance {instance} failed at stage '{}': {source}", failed_stage.as_str())]
pub struct ProvisioningError {
    /// Instance the run targeted.
    pub instance: String,
    /// Stage whose transition failed; earlier stages completed.
    pub failed_stage: InstallStage,
    /// Underlying failure.
    #[source]
    pub source: StageFailure,
}

/// Drives the install state machine for one instance per run.
#[derive(Clone, Debug)]
pub struct ProvisioningOrchestrator<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
    domains: DomainPreparer<R>,
    databases: DatabaseProvisioner<R>,
    snapshots: SnapshotBuilder<R>,
    transfers: TransferMediator<R>,
}

impl<R: RemoteHost> ProvisioningOrchestrator<R> {
    /// Creates an orchestrator wiring all components to one remote.
    #[must_use]
    pub fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            domains: DomainPreparer::new(Arc::clone(&remote), capabilities.clone()),
            databases: DatabaseProvisioner::new(Arc::clone(&remote), capabilities.clone()),
            snapshots: SnapshotBuilder::new(Arc::clone(&remote), capabilities.clone()),
            transfers: TransferMediator::new(Arc::clone(&remote), capabilities.clone()),
            remote,
            capabilities,
        }
    }

    /// Runs the install machine for `target`.
    ///
    /// On success the instance's `path`, `remote_id`, and database credential
    /// group are populated together; on failure nothing is populated and the
    /// error names the stage that stalled.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError`] carrying the failed stage and cause.
    pub async fn install(
        &self,
        target: &mut Instance,
        install_type: InstallType<'_>,
        request: &InstallRequest,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        let fail = |failed_stage: InstallStage| {
            let instance = target.id.clone();
            move |source: StageFailure| ProvisioningError {
                instance,
                failed_stage,
                source,
            }
        };

        let document_root = self
            .domains
            .prepare(&target.domain)
            .await
            .map_err(|err| fail(InstallStage::DomainPrepared)(err.into()))?;
        info!(instance = %target.id, stage = InstallStage::DomainPrepared.as_str(), root = %document_root, "stage complete");

        let database = self
            .databases
            .provision(&request.credentials)
            .await
            .map_err(|err| fail(InstallStage::DatabaseReady)(err.into()))?;
        info!(instance = %target.id, stage = InstallStage::DatabaseReady.as_str(), "stage complete");

        let import_archive = self
            .place_files(target, &install_type, &document_root)
            .await
            .map_err(fail(InstallStage::FilesPlaced))?;
        info!(instance = %target.id, stage = InstallStage::FilesPlaced.as_str(), "stage complete");

        let wrote_config = self
            .write_config(&install_type, &document_root, &database, target)
            .await
            .map_err(fail(InstallStage::ConfigWritten))?;
        if wrote_config {
            info!(instance = %target.id, stage = InstallStage::ConfigWritten.as_str(), "stage complete");
        }

        let finalize = FinalizeRequest {
            install_type: install_type.kind(),
            domain: target.domain.clone(),
            path: document_root.clone(),
            database: database.clone(),
            version: target.version.clone(),
            import_archive,
        };
        let outcome = with_deadline(
            "instance.install",
            self.capabilities.remote_timeout,
            self.remote.install_instance(&self.capabilities.scope, &finalize),
        )
        .await
        .map_err(|err| fail(InstallStage::Installed)(err.into()))?;
        info!(instance = %target.id, remote_id = %outcome.remote_id, stage = InstallStage::Installed.as_str(), "install finished");

        self.record_success(target, &install_type, &document_root, &database, &outcome.remote_id);

        Ok(ProvisioningResult {
            path: document_root,
            database,
            remote_id: outcome.remote_id,
        })
    }

    /// Stages application files in `document_root` per variant, returning
    /// the archive the remote should import a database dump from, when the
    /// variant staged one.
    async fn place_files(
        &self,
        target: &Instance,
        install_type: &InstallType<'_>,
        document_root: &Utf8Path,
    ) -> Result<Option<Utf8PathBuf>, StageFailure> {
        match install_type {
            InstallType::Clean => {
                with_deadline(
                    "instance.fetch_application",
                    self.capabilities.remote_timeout,
                    self.remote.fetch_application(
                        &self.capabilities.scope,
                        &target.version,
                        document_root,
                    ),
                )
                .await?;
                Ok(None)
            }
            InstallType::Clone(source) | InstallType::Staging(source) => {
                let snapshot_source = snapshot_source_for(source)?;
                let snapshot = self.snapshots.capture(&snapshot_source).await?;
                let staged = self.transfers.move_snapshot(&snapshot, document_root).await?;
                Ok(Some(staged))
            }
            InstallType::Template(template) => {
                let filename = template
                    .path
                    .file_name()
                    .ok_or_else(|| StageFailure::InvalidTemplate {
                        path: template.path.clone(),
                    })?;
                let staged = self.capabilities.scratch_dir.join(filename);
                self.transfers.move_path(&template.path, &staged).await?;
                with_deadline(
                    "file.extract",
                    self.capabilities.remote_timeout,
                    self.remote
                        .extract_zip(&self.capabilities.scope, &staged, document_root),
                )
                .await
                .map_err(|source| TransferError::Extract { source })?;
                Ok(Some(staged))
            }
        }
    }

    /// Writes the application configuration unless a complete template
    /// already carries one. Returns whether a config was written.
    async fn write_config(
        &self,
        install_type: &InstallType<'_>,
        document_root: &Utf8Path,
        database: &DatabaseCredentials,
        target: &Instance,
    ) -> Result<bool, StageFailure> {
        if let InstallType::Template(template) = install_type
            && template.details.is_complete
        {
            return Ok(false);
        }

        let db_prefix = match install_type {
            InstallType::Clone(source) | InstallType::Staging(source) => {
                source.install_details.db_prefix.clone()
            }
            InstallType::Template(template) => template.details.db_prefix.clone(),
            InstallType::Clean => target.install_details.db_prefix.clone(),
        };

        let contents = render_config(database, db_prefix.as_deref());
        with_deadline(
            "file.write",
            self.capabilities.remote_timeout,
            self.remote.write_file(
                &self.capabilities.scope,
                document_root,
                CONFIG_FILENAME,
                &contents,
            ),
        )
        .await?;
        Ok(true)
    }

    fn record_success(
        &self,
        target: &mut Instance,
        install_type: &InstallType<'_>,
        document_root: &Utf8Path,
        database: &DatabaseCredentials,
        remote_id: &str,
    ) {
        target.path = Some(document_root.to_owned());
        target.remote_id = Some(remote_id.to_owned());
        target.install_details.database = Some(database.clone());
        match install_type {
            InstallType::Clone(source) | InstallType::Staging(source) => {
                target.install_details.db_prefix = source.install_details.db_prefix.clone();
            }
            InstallType::Template(template) => {
                target.install_details.db_prefix = template.details.db_prefix.clone();
                target.install_details.template_id = Some(template.id.clone());
            }
            InstallType::Clean => {}
        }
        if matches!(install_type, InstallType::Staging(_)) && self.capabilities.supports_site_types
        {
            target.site_type = Some(SiteType::Staging);
        }
    }

    /// Updates the application in place via a single remote call.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError`] when the instance is not installed or
    /// the remote call fails.
    pub async fn update(
        &self,
        instance: &Instance,
        params: &UpdateParams,
    ) -> Result<(), ProvisioningError> {
        let remote_id = require_remote_id(instance)?;
        with_deadline(
            "instance.update",
            self.capabilities.remote_timeout,
            self.remote.update_instance(
                &self.capabilities.scope,
                remote_id,
                params.create_backup,
                &params.version,
            ),
        )
        .await
        .map_err(|err| ProvisioningError {
            instance: instance.id.clone(),
            failed_stage: InstallStage::Installed,
            source: err.into(),
        })
    }

    /// Deletes the instance remotely, removing files and/or database per
    /// `params`. The remote applies the deletion atomically, so this is a
    /// single call with no intermediate states.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError`] when the instance is not installed or
    /// the remote call fails.
    pub async fn delete(
        &self,
        instance: &Instance,
        params: DeleteParams,
    ) -> Result<(), ProvisioningError> {
        let remote_id = require_remote_id(instance)?;
        with_deadline(
            "instance.delete",
            self.capabilities.remote_timeout,
            self.remote.delete_instance(
                &self.capabilities.scope,
                remote_id,
                params.remove_data,
                params.remove_database,
            ),
        )
        .await
        .map_err(|err| ProvisioningError {
            instance: instance.id.clone(),
            failed_stage: InstallStage::Installed,
            source: err.into(),
        })
    }
}

fn require_remote_id(instance: &Instance) -> Result<&str, ProvisioningError> {
    instance
        .remote_id
        .as_deref()
        .ok_or_else(|| ProvisioningError {
            instance: instance.id.clone(),
            failed_stage: InstallStage::NotStarted,
            source: StageFailure::SourceNotInstalled {
                id: instance.id.clone(),
            },
        })
}

/// Builds the snapshot source for a clone or staging origin.
fn snapshot_source_for(source: &Instance) -> Result<SnapshotSource, StageFailure> {
    let path = source
        .path
        .clone()
        .ok_or_else(|| StageFailure::SourceNotInstalled {
            id: source.id.clone(),
        })?;
    Ok(SnapshotSource {
        id: source.id.clone(),
        path,
        database: source
            .install_details
            .database
            .as_ref()
            .map(|creds| creds.name.clone()),
        version: source.version.clone(),
        db_prefix: source.install_details.db_prefix.clone(),
    })
}

fn render_config(database: &DatabaseCredentials, db_prefix: Option<&str>) -> String {
    let mut contents = format!(
        "DB_HOST={}\nDB_NAME={}\nDB_USER={}\nDB_PASSWORD={}\n",
        database.host, database.name, database.user, database.password
    );
    if let Some(prefix) = db_prefix {
        contents.push_str(&format!("DB_PREFIX={prefix}\n"));
    }
    contents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_order_matches_the_machine() {
        assert!(InstallStage::NotStarted < InstallStage::DomainPrepared);
        assert!(InstallStage::DomainPrepared < InstallStage::DatabaseReady);
        assert!(InstallStage::DatabaseReady < InstallStage::FilesPlaced);
        assert!(InstallStage::FilesPlaced < InstallStage::ConfigWritten);
        assert!(InstallStage::ConfigWritten < InstallStage::Installed);
    }

    #[test]
    fn config_rendering_includes_prefix_only_when_present() {
        let database = DatabaseCredentials {
            host: String::from("localhost"),
            name: String::from("acme_app"),
            user: String::from("acme_appuser"),
            password: String::from("deadbeef"),
        };
        let plain = render_config(&database, None);
        assert!(plain.contains("DB_NAME=acme_app"));
        assert!(!plain.contains("DB_PREFIX"));

        let prefixed = render_config(&database, Some("wp_"));
        assert!(prefixed.ends_with("DB_PREFIX=wp_\n"));
    }
}
