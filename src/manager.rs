//! Facade exposed to the owning system.
//!
//! Every lifecycle-mutating entry point claims the per-instance lock before
//! touching the remote; read-only pass-throughs go straight through. The
//! manager owns no durable state; the caller's `Instance` records are the
//! source of truth and are only written after the remote has succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::backup::{BackupBridge, BackupBridgeError};
use crate::capabilities::{CapabilityError, HostCapabilities};
use crate::lock::{ConcurrentOperationError, KeyedLock, OperationArbiter};
use crate::model::{
    DeleteParams, Instance, SiteType, Snapshot, Template, UpdateParams,
};
use crate::promote::{PromotionEngine, PromotionError, PromotionReport, PromotionRequest};
use crate::provision::{
    InstallRequest, InstallType, ProvisioningError, ProvisioningOrchestrator, ProvisioningResult,
};
use crate::remote::{
    InstanceStats, LogFile, RemoteError, RemoteHost, with_deadline,
};
use crate::snapshot::{ArchiveError, SnapshotBuilder};

/// Errors raised at the manager boundary.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Raised when the capability descriptor fails validation.
    #[error(transparent)]
    Capabilities(#[from] CapabilityError),
    /// Raised when another operation holds the instance lock.
    #[error(transparent)]
    Concurrent(#[from] ConcurrentOperationError),
    /// Raised when an install run fails.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    /// Raised when a push fails or is empty.
    #[error(transparent)]
    Promotion(#[from] PromotionError),
    /// Raised when snapshot capture fails.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// Raised when a backup operation fails.
    #[error(transparent)]
    Backup(#[from] BackupBridgeError),
    /// Raised when a read pass-through fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Raised when site typing is used on a host that does not support it.
    #[error("remote host does not support site types")]
    SiteTypesUnsupported,
    /// Raised when an operation needs an installed instance.
    #[error("instance {id} is not installed")]
    NotInstalled {
        /// Identifier of the uninstalled instance.
        id: String,
    },
}

/// Entry point for all lifecycle operations on one hosting account.
#[derive(Clone, Debug)]
pub struct InstanceManager<R, A = KeyedLock> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
    arbiter: A,
    orchestrator: ProvisioningOrchestrator<R>,
    promotions: PromotionEngine<R>,
    snapshots: SnapshotBuilder<R>,
    backups: BackupBridge<R>,
}

impl<R: RemoteHost> InstanceManager<R, KeyedLock> {
    /// Creates a manager with the in-process lock arbiter.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Capabilities`] when the descriptor is invalid.
    pub fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Result<Self, ManagerError> {
        Self::with_arbiter(remote, capabilities, KeyedLock::new())
    }
}

impl<R: RemoteHost, A: OperationArbiter> InstanceManager<R, A> {
    /// Creates a manager using `arbiter` for per-instance mutual exclusion.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Capabilities`] when the descriptor is invalid.
    pub fn with_arbiter(
        remote: Arc<R>,
        capabilities: HostCapabilities,
        arbiter: A,
    ) -> Result<Self, ManagerError> {
        capabilities.validate()?;
        Ok(Self {
            orchestrator: ProvisioningOrchestrator::new(Arc::clone(&remote), capabilities.clone()),
            promotions: PromotionEngine::new(Arc::clone(&remote), capabilities.clone()),
            snapshots: SnapshotBuilder::new(Arc::clone(&remote), capabilities.clone()),
            backups: BackupBridge::new(Arc::clone(&remote), capabilities.clone()),
            remote,
            capabilities,
            arbiter,
        })
    }

    /// Installs a clean instance.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Concurrent`] when the instance is busy, or
    /// [`ManagerError::Provisioning`] when a stage fails.
    pub async fn install(
        &self,
        target: &mut Instance,
        request: &InstallRequest,
    ) -> Result<ProvisioningResult, ManagerError> {
        let _guard = self.arbiter.try_acquire(&target.id)?;
        let result = self
            .orchestrator
            .install(target, InstallType::Clean, request)
            .await?;
        Ok(result)
    }

    /// Installs `target` as a copy of `source`.
    ///
    /// # Errors
    ///
    /// As [`InstanceManager::install`]; both instances are locked for the
    /// duration.
    pub async fn clone_from(
        &self,
        source: &Instance,
        target: &mut Instance,
        request: &InstallRequest,
    ) -> Result<ProvisioningResult, ManagerError> {
        let _source_guard = self.arbiter.try_acquire(&source.id)?;
        let _target_guard = self.arbiter.try_acquire(&target.id)?;
        let result = self
            .orchestrator
            .install(target, InstallType::Clone(source), request)
            .await?;
        Ok(result)
    }

    /// Installs `target` from a pre-built template.
    ///
    /// # Errors
    ///
    /// As [`InstanceManager::install`].
    pub async fn install_from_template(
        &self,
        template: &Template,
        target: &mut Instance,
        request: &InstallRequest,
    ) -> Result<ProvisioningResult, ManagerError> {
        let _guard = self.arbiter.try_acquire(&target.id)?;
        let result = self
            .orchestrator
            .install(target, InstallType::Template(template), request)
            .await?;
        Ok(result)
    }

    /// Creates a staging copy of `source` at `target`.
    ///
    /// The staging instance records its own `remote_id`, so pushes back to
    /// the source later need no re-provisioning of either side.
    ///
    /// # Errors
    ///
    /// As [`InstanceManager::install`]; both instances are locked for the
    /// duration.
    pub async fn create_staging(
        &self,
        source: &Instance,
        target: &mut Instance,
        request: &InstallRequest,
    ) -> Result<ProvisioningResult, ManagerError> {
        let _source_guard = self.arbiter.try_acquire(&source.id)?;
        let _target_guard = self.arbiter.try_acquire(&target.id)?;
        let result = self
            .orchestrator
            .install(target, InstallType::Staging(source), request)
            .await?;
        Ok(result)
    }

    /// Pushes files and/or database changes from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Concurrent`] when either instance is busy, or
    /// [`ManagerError::Promotion`] for empty or partially failed pushes.
    pub async fn push(
        &self,
        source: &Instance,
        target: &Instance,
        request: &PromotionRequest,
    ) -> Result<PromotionReport, ManagerError> {
        let _source_guard = self.arbiter.try_acquire(&source.id)?;
        let _target_guard = self.arbiter.try_acquire(&target.id)?;
        let report = self.promotions.push(source, target, request).await?;
        Ok(report)
    }

    /// Captures a snapshot of `instance` without any further action.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotInstalled`] for an uninstalled instance or
    /// [`ManagerError::Archive`] when capture fails.
    pub async fn snapshot(&self, instance: &Instance) -> Result<Snapshot, ManagerError> {
        let path = instance.path.clone().ok_or_else(|| ManagerError::NotInstalled {
            id: instance.id.clone(),
        })?;
        let source = crate::snapshot::SnapshotSource {
            id: instance.id.clone(),
            path,
            database: instance
                .install_details
                .database
                .as_ref()
                .map(|creds| creds.name.clone()),
            version: instance.version.clone(),
            db_prefix: instance.install_details.db_prefix.clone(),
        };
        let snapshot = self.snapshots.capture(&source).await?;
        Ok(snapshot)
    }

    /// Updates the application in place.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Concurrent`] when the instance is busy, or
    /// [`ManagerError::Provisioning`] when the remote call fails.
    pub async fn update(
        &self,
        instance: &Instance,
        params: &UpdateParams,
    ) -> Result<(), ManagerError> {
        let _guard = self.arbiter.try_acquire(&instance.id)?;
        self.orchestrator.update(instance, params).await?;
        Ok(())
    }

    /// Deletes the instance remotely per `params`.
    ///
    /// # Errors
    ///
    /// As [`InstanceManager::update`].
    pub async fn delete(
        &self,
        instance: &Instance,
        params: DeleteParams,
    ) -> Result<(), ManagerError> {
        let _guard = self.arbiter.try_acquire(&instance.id)?;
        self.orchestrator.delete(instance, params).await?;
        info!(instance = %instance.id, "instance deleted");
        Ok(())
    }

    /// Returns the backup bridge for this account.
    #[must_use]
    pub const fn backups(&self) -> &BackupBridge<R> {
        &self.backups
    }

    /// Restores a backup onto `instance`. Mutating, so the lock applies;
    /// never retried after a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Concurrent`] when the instance is busy, or
    /// [`ManagerError::Backup`] when the restore fails.
    pub async fn restore_backup(
        &self,
        instance: &Instance,
        remote_backup_id: &str,
    ) -> Result<(), ManagerError> {
        let _guard = self.arbiter.try_acquire(&instance.id)?;
        self.backups.restore(remote_backup_id).await?;
        Ok(())
    }

    /// Usage statistics pass-through; no lock taken.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotInstalled`] or [`ManagerError::Remote`].
    pub async fn stats(&self, instance: &Instance) -> Result<InstanceStats, ManagerError> {
        let remote_id = self.require_remote_id(instance)?;
        let stats = with_deadline(
            "instance.stats",
            self.capabilities.remote_timeout,
            self.remote.get_stats(&self.capabilities.scope, remote_id),
        )
        .await?;
        Ok(stats)
    }

    /// Bandwidth pass-through over a date range; no lock taken.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotInstalled`] or [`ManagerError::Remote`].
    pub async fn bandwidth(
        &self,
        instance: &Instance,
        start_date: &str,
        end_date: &str,
        group_by: &str,
    ) -> Result<BTreeMap<String, u64>, ManagerError> {
        let remote_id = self.require_remote_id(instance)?;
        let usage = with_deadline(
            "instance.bandwidth",
            self.capabilities.remote_timeout,
            self.remote.get_bandwidth(
                &self.capabilities.scope,
                remote_id,
                start_date,
                end_date,
                group_by,
            ),
        )
        .await?;
        Ok(usage)
    }

    /// Webserver log listing pass-through; no lock taken.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotInstalled`] or [`ManagerError::Remote`].
    pub async fn log_files(&self, instance: &Instance) -> Result<Vec<LogFile>, ManagerError> {
        let remote_id = self.require_remote_id(instance)?;
        let files = with_deadline(
            "instance.logs",
            self.capabilities.remote_timeout,
            self.remote.list_log_files(&self.capabilities.scope, remote_id),
        )
        .await?;
        Ok(files)
    }

    /// Current site type; only meaningful on hosts that support typing.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SiteTypesUnsupported`] on hosts without
    /// typing, [`ManagerError::NotInstalled`], or [`ManagerError::Remote`].
    pub async fn site_type(&self, instance: &Instance) -> Result<SiteType, ManagerError> {
        self.require_site_types()?;
        let remote_id = self.require_remote_id(instance)?;
        let site_type = with_deadline(
            "instance.site_type",
            self.capabilities.remote_timeout,
            self.remote.get_site_type(&self.capabilities.scope, remote_id),
        )
        .await?;
        Ok(site_type)
    }

    /// Changes the site type on hosts that support typing.
    ///
    /// # Errors
    ///
    /// As [`InstanceManager::site_type`], plus [`ManagerError::Concurrent`]
    /// when the instance is busy.
    pub async fn change_site_type(
        &self,
        instance: &Instance,
        site_type: SiteType,
    ) -> Result<(), ManagerError> {
        self.require_site_types()?;
        let remote_id = self.require_remote_id(instance)?;
        let _guard = self.arbiter.try_acquire(&instance.id)?;
        with_deadline(
            "instance.change_site_type",
            self.capabilities.remote_timeout,
            self.remote
                .change_site_type(&self.capabilities.scope, remote_id, site_type),
        )
        .await?;
        Ok(())
    }

    fn require_site_types(&self) -> Result<(), ManagerError> {
        if self.capabilities.supports_site_types {
            return Ok(());
        }
        Err(ManagerError::SiteTypesUnsupported)
    }

    fn require_remote_id<'a>(&self, instance: &'a Instance) -> Result<&'a str, ManagerError> {
        instance
            .remote_id
            .as_deref()
            .ok_or_else(|| ManagerError::NotInstalled {
                id: instance.id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRemote;
    use camino::Utf8PathBuf;

    fn manager(remote: ScriptedRemote) -> InstanceManager<ScriptedRemote> {
        InstanceManager::new(Arc::new(remote), HostCapabilities::for_scope("acme"))
            .expect("manager")
    }

    #[tokio::test]
    async fn invalid_capabilities_are_rejected_at_construction() {
        let err = InstanceManager::new(
            Arc::new(ScriptedRemote::new()),
            HostCapabilities::for_scope("  "),
        )
        .expect_err("expected validation failure");
        assert!(matches!(err, ManagerError::Capabilities(_)));
    }

    #[tokio::test]
    async fn stats_require_an_installed_instance() {
        let manager = manager(ScriptedRemote::new());
        let err = manager
            .stats(&Instance::new("inst-1", "a.example.org", "6.4"))
            .await
            .expect_err("expected rejection");
        assert!(matches!(err, ManagerError::NotInstalled { .. }));
    }

    #[tokio::test]
    async fn site_type_reads_are_gated_on_the_capability() {
        let manager = manager(ScriptedRemote::new());
        let mut instance = Instance::new("inst-1", "a.example.org", "6.4");
        instance.remote_id = Some(String::from("r-1"));
        instance.path = Some(Utf8PathBuf::from("/home/acme/a"));

        let err = manager
            .site_type(&instance)
            .await
            .expect_err("expected capability rejection");
        assert!(matches!(err, ManagerError::SiteTypesUnsupported));
    }
}
