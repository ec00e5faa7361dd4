//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedRemote`] is a deterministic in-memory stand-in for the hosting
//! server: domains, files, databases, and backups live in shared state, each
//! primitive records an action label, and failures can be queued per action
//! to script specific fault sequences.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use futures::stream;

use crate::model::{Backup, BackupKind, BackupLocation, BackupMode, SiteType};
use crate::remote::{
    BackupApi, BackupSpec, ByteStream, DatabaseApi, DomainApi, DomainRecord, FileApi,
    FinalizeOutcome, FinalizeRequest, InstanceApi, InstanceStats, LogFile, RemoteError,
};

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<String>,
    failures: BTreeMap<String, VecDeque<String>>,
    domains: BTreeMap<String, Utf8PathBuf>,
    hide_created_domains: bool,
    entries: HashSet<Utf8PathBuf>,
    databases: HashSet<String>,
    backups: Vec<Backup>,
    backup_specs: Vec<BackupSpec>,
    finalize_requests: Vec<FinalizeRequest>,
    site_types: BTreeMap<String, SiteType>,
    next_remote_id: u32,
    next_backup_id: u32,
}

/// Scripted remote host used to drive deterministic lifecycle outcomes
/// without a server.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRemote {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedRemote {
    /// Creates an empty remote: no domains, files, databases, or backups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Seeds a resolvable domain with the given document root.
    pub fn seed_domain(&self, domain: &str, document_root: &str) {
        self.lock()
            .domains
            .insert(domain.to_owned(), Utf8PathBuf::from(document_root));
    }

    /// Makes created domains stay unresolvable, simulating a remote
    /// consistency fault.
    pub fn hide_created_domains(&self) {
        self.lock().hide_created_domains = true;
    }

    /// Seeds an existing file-system entry.
    pub fn seed_entry(&self, path: &str) {
        self.lock().entries.insert(Utf8PathBuf::from(path));
    }

    /// Seeds a stored backup.
    pub fn seed_backup(&self, backup: Backup) {
        self.lock().backups.push(backup);
    }

    /// Queues a failure for the next call of `action`.
    pub fn fail_next(&self, action: &str, message: &str) {
        self.lock()
            .failures
            .entry(action.to_owned())
            .or_default()
            .push_back(message.to_owned());
    }

    /// Number of recorded calls whose action equals `action`.
    #[must_use]
    pub fn calls_matching(&self, action: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == action)
            .count()
    }

    /// Index of the first recorded call of `action`, in call order.
    #[must_use]
    pub fn call_index(&self, action: &str) -> Option<usize> {
        self.lock()
            .calls
            .iter()
            .position(|call| call.as_str() == action)
    }

    /// Total number of primitive calls recorded.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// The most recent backup spec passed to `backup.create`.
    #[must_use]
    pub fn last_backup_spec(&self) -> Option<BackupSpec> {
        self.lock().backup_specs.last().cloned()
    }

    /// The most recent finalise request passed to `instance.install`.
    #[must_use]
    pub fn last_finalize_request(&self) -> Option<FinalizeRequest> {
        self.lock().finalize_requests.last().cloned()
    }

    /// Records `action` and consumes a queued failure for it, if any.
    fn call(&self, action: &str) -> Result<MutexGuard<'_, Inner>, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(action.to_owned());
        if let Some(message) = inner
            .failures
            .get_mut(action)
            .and_then(VecDeque::pop_front)
        {
            return Err(RemoteError::fault(message));
        }
        Ok(inner)
    }
}

#[async_trait]
impl DomainApi for ScriptedRemote {
    async fn domain_exists(&self, _scope: &str, domain: &str) -> Result<bool, RemoteError> {
        let inner = self.call("domain.exists")?;
        Ok(inner.domains.contains_key(domain))
    }

    async fn create_addon_domain(&self, scope: &str, domain: &str) -> Result<(), RemoteError> {
        let mut inner = self.call("domain.create")?;
        if !inner.hide_created_domains {
            let root = Utf8PathBuf::from(format!("/home/{scope}/{domain}"));
            inner.domains.insert(domain.to_owned(), root);
        }
        Ok(())
    }

    async fn find_domain(
        &self,
        _scope: &str,
        domain: &str,
    ) -> Result<Option<DomainRecord>, RemoteError> {
        let inner = self.call("domain.find")?;
        Ok(inner.domains.get(domain).map(|root| DomainRecord {
            name: domain.to_owned(),
            document_root: root.clone(),
        }))
    }

    async fn update_document_root(
        &self,
        _scope: &str,
        domain: &str,
        document_root: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("domain.update_root")?;
        inner
            .domains
            .insert(domain.to_owned(), document_root.to_owned());
        Ok(())
    }
}

#[async_trait]
impl DatabaseApi for ScriptedRemote {
    async fn create_database(&self, _scope: &str, name: &str) -> Result<(), RemoteError> {
        let mut inner = self.call("database.create")?;
        inner.databases.insert(name.to_owned());
        Ok(())
    }

    async fn create_database_user(
        &self,
        _scope: &str,
        _user: &str,
        _password: &str,
    ) -> Result<(), RemoteError> {
        self.call("database.create_user")?;
        Ok(())
    }

    async fn grant_privileges(
        &self,
        _scope: &str,
        _user: &str,
        _database: &str,
    ) -> Result<(), RemoteError> {
        self.call("database.grant")?;
        Ok(())
    }

    async fn database_exists(&self, _scope: &str, name: &str) -> Result<bool, RemoteError> {
        let inner = self.call("database.exists")?;
        Ok(inner.databases.contains(name))
    }

    async fn dump_database(
        &self,
        _scope: &str,
        _database: &str,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("database.dump")?;
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn sync_full(&self, _scope: &str, _source: &str, _target: &str) -> Result<(), RemoteError> {
        self.call("database.sync_full")?;
        Ok(())
    }

    async fn sync_views(
        &self,
        _scope: &str,
        _source: &str,
        _target: &str,
    ) -> Result<(), RemoteError> {
        self.call("database.sync_views")?;
        Ok(())
    }

    async fn sync_table_structure(
        &self,
        _scope: &str,
        _source: &str,
        _target: &str,
        _table: &str,
    ) -> Result<(), RemoteError> {
        self.call("database.sync_structure")?;
        Ok(())
    }

    async fn sync_table_data(
        &self,
        _scope: &str,
        _source: &str,
        _target: &str,
        _table: &str,
    ) -> Result<(), RemoteError> {
        self.call("database.sync_data")?;
        Ok(())
    }
}

#[async_trait]
impl FileApi for ScriptedRemote {
    async fn upload(
        &self,
        _scope: &str,
        _source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("file.upload")?;
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn copy(
        &self,
        _scope: &str,
        _source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("file.copy")?;
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn move_entry(
        &self,
        _scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("file.move")?;
        inner.entries.remove(source);
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn remove(&self, _scope: &str, path: &Utf8Path) -> Result<(), RemoteError> {
        let mut inner = self.call("file.remove")?;
        inner.entries.remove(path);
        Ok(())
    }

    async fn compress_to_zip(
        &self,
        _scope: &str,
        _source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("file.compress")?;
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn extract_zip(
        &self,
        _scope: &str,
        _source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("file.extract")?;
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn download(&self, _scope: &str, path: &Utf8Path) -> Result<ByteStream, RemoteError> {
        let inner = self.call("file.download")?;
        if !inner.entries.contains(path) {
            return Err(RemoteError::fault(format!("no such entry: {path}")));
        }
        Ok(Box::pin(stream::iter(vec![Ok(Bytes::from_static(
            b"scripted file payload",
        ))])))
    }

    async fn entry_exists(&self, _scope: &str, path: &Utf8Path) -> Result<bool, RemoteError> {
        let inner = self.call("file.exists")?;
        Ok(inner.entries.contains(path))
    }

    async fn entry_size(&self, _scope: &str, path: &Utf8Path) -> Result<u64, RemoteError> {
        let inner = self.call("file.size")?;
        if inner.entries.contains(path) {
            return Ok(1024);
        }
        Err(RemoteError::fault(format!("no such entry: {path}")))
    }

    async fn write_file(
        &self,
        _scope: &str,
        dir: &Utf8Path,
        filename: &str,
        _contents: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("file.write")?;
        inner.entries.insert(dir.join(filename));
        Ok(())
    }
}

#[async_trait]
impl BackupApi for ScriptedRemote {
    async fn list_backups(&self, _scope: &str) -> Result<Vec<Backup>, RemoteError> {
        let inner = self.call("backup.list")?;
        Ok(inner.backups.clone())
    }

    async fn create_backup(&self, _scope: &str, spec: &BackupSpec) -> Result<Backup, RemoteError> {
        let mut inner = self.call("backup.create")?;
        inner.backup_specs.push(spec.clone());
        inner.next_backup_id += 1;
        let backup = Backup {
            kind: BackupKind::Manual,
            directory: spec.directory,
            database: spec.database,
            mode: if spec.directory && spec.database {
                BackupMode::Full
            } else {
                BackupMode::Partial
            },
            has_local_storage: false,
            location: BackupLocation {
                remote_backup_id: format!("bk-{}", inner.next_backup_id),
                filename: spec
                    .archive
                    .as_ref()
                    .and_then(|path| path.file_name())
                    .unwrap_or("backup.zip")
                    .to_owned(),
                filesize: 1024,
            },
            created_at: Utc::now(),
        };
        inner.backups.push(backup.clone());
        Ok(backup)
    }

    async fn delete_backup(&self, _scope: &str, remote_backup_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.call("backup.delete")?;
        let before = inner.backups.len();
        inner
            .backups
            .retain(|backup| backup.location.remote_backup_id != remote_backup_id);
        if inner.backups.len() == before {
            return Err(RemoteError::fault(format!(
                "backup {remote_backup_id} not found"
            )));
        }
        Ok(())
    }

    async fn restore_backup(&self, _scope: &str, remote_backup_id: &str) -> Result<(), RemoteError> {
        let inner = self.call("backup.restore")?;
        if inner
            .backups
            .iter()
            .any(|backup| backup.location.remote_backup_id == remote_backup_id)
        {
            return Ok(());
        }
        Err(RemoteError::fault(format!(
            "backup {remote_backup_id} not found"
        )))
    }

    async fn download_backup(
        &self,
        _scope: &str,
        remote_backup_id: &str,
    ) -> Result<ByteStream, RemoteError> {
        let inner = self.call("backup.download")?;
        if !inner
            .backups
            .iter()
            .any(|backup| backup.location.remote_backup_id == remote_backup_id)
        {
            return Err(RemoteError::fault(format!(
                "backup {remote_backup_id} not found"
            )));
        }
        let chunks = vec![
            Ok(Bytes::from_static(b"PK\x03\x04")),
            Ok(Bytes::from_static(b"scripted backup payload")),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[async_trait]
impl InstanceApi for ScriptedRemote {
    async fn install_instance(
        &self,
        _scope: &str,
        request: &FinalizeRequest,
    ) -> Result<FinalizeOutcome, RemoteError> {
        let mut inner = self.call("instance.install")?;
        inner.finalize_requests.push(request.clone());
        inner.next_remote_id += 1;
        Ok(FinalizeOutcome {
            remote_id: format!("remote-{}", inner.next_remote_id),
        })
    }

    async fn update_instance(
        &self,
        _scope: &str,
        _remote_id: &str,
        _create_backup: bool,
        _version: &str,
    ) -> Result<(), RemoteError> {
        self.call("instance.update")?;
        Ok(())
    }

    async fn delete_instance(
        &self,
        _scope: &str,
        _remote_id: &str,
        _remove_data: bool,
        _remove_database: bool,
    ) -> Result<(), RemoteError> {
        self.call("instance.delete")?;
        Ok(())
    }

    async fn fetch_application(
        &self,
        _scope: &str,
        _version: &str,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("instance.fetch_application")?;
        inner.entries.insert(dest.to_owned());
        Ok(())
    }

    async fn get_stats(&self, _scope: &str, _remote_id: &str) -> Result<InstanceStats, RemoteError> {
        self.call("instance.stats")?;
        Ok(InstanceStats {
            storage_usage: 42 * 1024 * 1024,
            storage_maximum: None,
            bandwidth_usage: 7 * 1024 * 1024,
            unique_visitors: 120,
            total_visitors: 340,
        })
    }

    async fn get_bandwidth(
        &self,
        _scope: &str,
        _remote_id: &str,
        start_date: &str,
        _end_date: &str,
        _group_by: &str,
    ) -> Result<BTreeMap<String, u64>, RemoteError> {
        self.call("instance.bandwidth")?;
        Ok(BTreeMap::from([(start_date.to_owned(), 1024_u64)]))
    }

    async fn list_log_files(
        &self,
        _scope: &str,
        _remote_id: &str,
    ) -> Result<Vec<LogFile>, RemoteError> {
        self.call("instance.logs")?;
        Ok(vec![LogFile {
            path: Some(Utf8PathBuf::from("/var/log/webserver")),
            file: String::from("access.log"),
            mtime: String::from("2024-05-01 10:00:00"),
        }])
    }

    async fn get_site_type(
        &self,
        _scope: &str,
        remote_id: &str,
    ) -> Result<SiteType, RemoteError> {
        let inner = self.call("instance.site_type")?;
        Ok(inner
            .site_types
            .get(remote_id)
            .copied()
            .unwrap_or(SiteType::Production))
    }

    async fn change_site_type(
        &self,
        _scope: &str,
        remote_id: &str,
        site_type: SiteType,
    ) -> Result<(), RemoteError> {
        let mut inner = self.call("instance.change_site_type")?;
        inner.site_types.insert(remote_id.to_owned(), site_type);
        Ok(())
    }
}
