//! Value types shared across the lifecycle components.
//!
//! The owning system keeps the durable records; these types are the slice of
//! those records the orchestration core reads and writes during one call.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deployment environment of an instance, where the remote supports typing.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    /// Scratch environment, safe to discard.
    Development,
    /// Pre-production clone used to verify changes before promotion.
    Staging,
    /// Live environment.
    Production,
}

impl SiteType {
    /// Remote wire representation of the site type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

/// Connection details produced by database provisioning.
///
/// The four fields travel as one unit: an instance either has a full set of
/// credentials or none, never a partial set.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DatabaseCredentials {
    /// Host the application connects to, usually `localhost`.
    pub host: String,
    /// Database name.
    pub name: String,
    /// Database user granted full privileges on the database.
    pub user: String,
    /// Generated or caller-supplied password.
    pub password: String,
}

/// Provisioning metadata recorded on an instance after a successful install.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstallDetails {
    /// Database credentials, set atomically as a group once provisioning
    /// succeeds.
    pub database: Option<DatabaseCredentials>,
    /// Table prefix used by the application schema.
    pub db_prefix: Option<String>,
    /// Template the instance was installed from, if any.
    pub template_id: Option<String>,
    /// Free-form provisioning keys the remote reported back.
    pub extra: BTreeMap<String, String>,
}

/// A managed application deployment.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// Stable identifier assigned by the owning system.
    pub id: String,
    /// Remote filesystem root; populated once install succeeds.
    pub path: Option<Utf8PathBuf>,
    /// Primary hostname.
    pub domain: String,
    /// Application version string.
    pub version: String,
    /// Environment type, meaningful only when the remote supports typing.
    pub site_type: Option<SiteType>,
    /// Provisioning metadata.
    pub install_details: InstallDetails,
    /// Identifier assigned by the remote API; `None` until installed.
    pub remote_id: Option<String>,
}

impl Instance {
    /// Creates an uninstalled instance record for `id` and `domain`.
    #[must_use]
    pub fn new(id: impl Into<String>, domain: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: None,
            domain: domain.into(),
            version: version.into(),
            site_type: None,
            install_details: InstallDetails::default(),
            remote_id: None,
        }
    }

    /// Creates an uninstalled instance record with a generated identifier,
    /// for callers that track no identifiers of their own.
    #[must_use]
    pub fn with_generated_id(domain: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), domain, version)
    }

    /// Returns `true` once remote provisioning has completed.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Metadata describing a pre-built install template.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TemplateDetails {
    /// Domain the template was originally built for, if recorded.
    pub domain_hint: Option<String>,
    /// Whether the archive carries both files and database, including the
    /// application configuration.
    pub is_complete: bool,
    /// Application version packaged in the template.
    pub version: String,
    /// Table prefix used by the packaged database dump.
    pub db_prefix: Option<String>,
}

/// An immutable, pre-built install source.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Template {
    /// Identifier assigned by the owning system.
    pub id: String,
    /// Location of the template archive on the remote.
    pub path: Utf8PathBuf,
    /// Descriptive metadata.
    pub details: TemplateDetails,
}

/// A portable archive combining an instance's files and database export.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Directory holding the archive.
    pub directory: Utf8PathBuf,
    /// Archive file name within [`Snapshot::directory`].
    pub filename: String,
    /// Application version of the captured instance.
    pub version: String,
    /// `true` when both the file tree and the database were captured.
    pub is_complete: bool,
    /// Table prefix of the captured database, when one was captured.
    pub db_prefix: Option<String>,
}

impl Snapshot {
    /// Full path of the archive file.
    #[must_use]
    pub fn archive_path(&self) -> Utf8PathBuf {
        self.directory.join(&self.filename)
    }
}

/// How a backup artifact came to exist.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Requested explicitly by an operator.
    Manual,
    /// Produced by a schedule on the remote.
    Automatic,
}

/// Coverage of a backup artifact.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    /// Files and database both captured.
    Full,
    /// Only a subset was captured.
    Partial,
}

/// Remote storage coordinates of a backup.
///
/// `remote_backup_id` is the only key used for delete, restore, and
/// download; the other fields are descriptive.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BackupLocation {
    /// Identifier the remote backup store assigned.
    pub remote_backup_id: String,
    /// Stored file name.
    pub filename: String,
    /// Size in bytes.
    pub filesize: u64,
}

/// A named, timestamped backup artifact in remote storage.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Backup {
    /// Manual or automatic origin.
    #[serde(rename = "type")]
    pub kind: BackupKind,
    /// Whether file-system data is included.
    pub directory: bool,
    /// Whether database data is included.
    pub database: bool,
    /// Full or partial coverage.
    pub mode: BackupMode,
    /// Whether a local copy exists alongside the remote one.
    pub has_local_storage: bool,
    /// Remote storage coordinates.
    #[serde(rename = "location_details")]
    pub location: BackupLocation,
    /// Creation time reported by the remote.
    pub created_at: DateTime<Utc>,
}

/// Parameters for an in-place application update.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UpdateParams {
    /// Whether to create a backup before updating.
    pub create_backup: bool,
    /// Target application version.
    pub version: String,
}

/// Flags controlling what an instance deletion removes on the remote.
///
/// Deletion is a single remote call; the remote applies it atomically, so no
/// staging of intermediate states is needed on this side.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DeleteParams {
    /// Remove the file tree.
    pub remove_data: bool,
    /// Drop the database and its user.
    pub remove_database: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_type_round_trips_through_wire_form() {
        for (site_type, wire) in [
            (SiteType::Development, "\"development\""),
            (SiteType::Staging, "\"staging\""),
            (SiteType::Production, "\"production\""),
        ] {
            let encoded = serde_json::to_string(&site_type).expect("serialize");
            assert_eq!(encoded, wire);
            let decoded: SiteType = serde_json::from_str(&encoded).expect("deserialize");
            assert_eq!(decoded, site_type);
        }
    }

    #[test]
    fn new_instance_is_not_installed() {
        let instance = Instance::new("inst-1", "example.org", "6.4");
        assert!(!instance.is_installed());
        assert!(instance.install_details.database.is_none());
        assert!(instance.path.is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Instance::with_generated_id("example.org", "6.4");
        let b = Instance::with_generated_id("example.org", "6.4");
        assert_ne!(a.id, b.id);
        assert!(!a.id.is_empty());
    }

    #[test]
    fn snapshot_archive_path_joins_directory_and_filename() {
        let snapshot = Snapshot {
            directory: Utf8PathBuf::from("/tmp/.stagehand"),
            filename: String::from("app_inst-1.zip"),
            version: String::from("6.4"),
            is_complete: true,
            db_prefix: None,
        };
        assert_eq!(snapshot.archive_path(), "/tmp/.stagehand/app_inst-1.zip");
    }
}
