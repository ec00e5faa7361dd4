//! Lifecycle orchestration for remotely hosted web-application instances.
//!
//! The crate drives install (clean, clone, template, staging), promotion
//! between instances, snapshotting, and backup bridging against a remote
//! hosting server that only exposes narrow primitives: create a domain,
//! create a database, move files, store a backup. None of those primitives
//! compose transactionally, so the value of this crate is in the sequencing:
//! deciding what is idempotent, what is destructive, and which stage failed
//! when a run stops halfway.

pub mod backup;
pub mod capabilities;
pub mod credentials;
pub mod database;
pub mod domain;
pub mod lock;
pub mod manager;
pub mod model;
pub mod promote;
pub mod provision;
pub mod remote;
pub mod snapshot;
pub mod test_support;
pub mod transfer;

pub use backup::{BackupBridge, BackupBridgeError};
pub use capabilities::{CapabilityError, HostCapabilities, RetryPolicy};
pub use credentials::CredentialGenerator;
pub use database::{CredentialHints, DatabaseError, DatabaseProvisioner, ProvisionStep};
pub use domain::{DomainError, DomainPreparer};
pub use lock::{ConcurrentOperationError, KeyedLock, KeyedLockGuard, OperationArbiter};
pub use manager::{InstanceManager, ManagerError};
pub use model::{
    Backup, BackupKind, BackupLocation, BackupMode, DatabaseCredentials, DeleteParams, Instance,
    InstallDetails, SiteType, Snapshot, Template, TemplateDetails, UpdateParams,
};
pub use promote::{
    CategoryOutcome, PromotionEngine, PromotionError, PromotionReport, PromotionRequest,
};
pub use provision::{
    InstallRequest, InstallStage, InstallType, ProvisioningError, ProvisioningOrchestrator,
    ProvisioningResult, StageFailure,
};
pub use remote::http::HttpRemoteHost;
pub use remote::{RemoteError, RemoteHost};
pub use snapshot::{ArchiveError, SnapshotBuilder, SnapshotSource};
pub use transfer::{TransferError, TransferMediator};
