//! HTTP implementation of the remote hosting API.
//!
//! Speaks the hosting server's JSON control API. Every primitive maps to a
//! single request under `/accounts/{scope}/…`; the server applies each one
//! atomically and returns either a JSON payload or an error body, which is
//! passed through verbatim as [`RemoteError::Fault`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8Path;
use futures::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::{Backup, SiteType};
use crate::remote::{
    BackupApi, BackupSpec, ByteStream, DatabaseApi, DomainApi, DomainRecord, FileApi,
    FinalizeOutcome, FinalizeRequest, InstanceApi, InstanceStats, LogFile, RemoteError,
};

const AUTH_HEADER: &str = "X-Auth-Token";

/// Remote host backed by the hosting server's HTTP control API.
#[derive(Clone, Debug)]
pub struct HttpRemoteHost {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct DomainPayload<'a> {
    domain: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct PathPair<'a> {
    source: &'a str,
    dest: &'a str,
}

#[derive(Serialize)]
struct TableSync<'a> {
    source: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<&'a str>,
}

#[derive(serde::Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(serde::Deserialize)]
struct SizeResponse {
    size: u64,
}

#[derive(serde::Deserialize)]
struct SiteTypeResponse {
    site_type: SiteType,
}

impl HttpRemoteHost {
    /// Creates a client for the control API at `base_url`, authenticating
    /// with `token`. `timeout` caps each request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Fault`] when the underlying HTTP client cannot
    /// be constructed.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::fault(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(response).await
    }

    async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<R, RemoteError> {
        let response = self
            .client
            .post(self.url(path))
            .header(AUTH_HEADER, &self.token)
            .json(payload)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(response).await
    }

    async fn post_unit<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url(path))
            .header(AUTH_HEADER, &self.token)
            .json(payload)
            .send()
            .await
            .map_err(map_transport_error)?;
        ensure_success(response).await.map(|_| ())
    }

    async fn delete_unit(&self, path: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(path))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(map_transport_error)?;
        ensure_success(response).await.map(|_| ())
    }
}

fn map_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        return RemoteError::Timeout { action: "http" };
    }
    RemoteError::fault(err.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|err| err.to_string());
    Err(RemoteError::fault(format!("{status}: {body}")))
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, RemoteError> {
    let response = ensure_success(response).await?;
    response
        .json::<R>()
        .await
        .map_err(|err| RemoteError::fault(format!("invalid response body: {err}")))
}

#[async_trait]
impl DomainApi for HttpRemoteHost {
    async fn domain_exists(&self, scope: &str, domain: &str) -> Result<bool, RemoteError> {
        let response: ExistsResponse = self
            .get_json(&format!("/accounts/{scope}/domains/{domain}/exists"))
            .await?;
        Ok(response.exists)
    }

    async fn create_addon_domain(&self, scope: &str, domain: &str) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/domains"),
            &DomainPayload {
                domain,
                kind: "addon",
            },
        )
        .await
    }

    async fn find_domain(
        &self,
        scope: &str,
        domain: &str,
    ) -> Result<Option<DomainRecord>, RemoteError> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{scope}/domains/{domain}")))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(map_transport_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: DomainRecord = decode(response).await?;
        Ok(Some(record))
    }

    async fn update_document_root(
        &self,
        scope: &str,
        domain: &str,
        document_root: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/domains/{domain}/document-root"),
            &serde_json::json!({ "document_root": document_root }),
        )
        .await
    }
}

#[async_trait]
impl DatabaseApi for HttpRemoteHost {
    async fn create_database(&self, scope: &str, name: &str) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/databases"),
            &serde_json::json!({ "name": name }),
        )
        .await
    }

    async fn create_database_user(
        &self,
        scope: &str,
        user: &str,
        password: &str,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/database-users"),
            &serde_json::json!({ "user": user, "password": password }),
        )
        .await
    }

    async fn grant_privileges(
        &self,
        scope: &str,
        user: &str,
        database: &str,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/database-users/{user}/privileges"),
            &serde_json::json!({ "database": database, "privileges": "ALL PRIVILEGES" }),
        )
        .await
    }

    async fn database_exists(&self, scope: &str, name: &str) -> Result<bool, RemoteError> {
        let response: ExistsResponse = self
            .get_json(&format!("/accounts/{scope}/databases/{name}/exists"))
            .await?;
        Ok(response.exists)
    }

    async fn dump_database(
        &self,
        scope: &str,
        database: &str,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/databases/{database}/dump"),
            &serde_json::json!({ "dest": dest }),
        )
        .await
    }

    async fn sync_full(&self, scope: &str, source: &str, target: &str) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/databases/sync"),
            &TableSync {
                source,
                target,
                table: None,
            },
        )
        .await
    }

    async fn sync_views(&self, scope: &str, source: &str, target: &str) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/databases/sync-views"),
            &TableSync {
                source,
                target,
                table: None,
            },
        )
        .await
    }

    async fn sync_table_structure(
        &self,
        scope: &str,
        source: &str,
        target: &str,
        table: &str,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/databases/sync-structure"),
            &TableSync {
                source,
                target,
                table: Some(table),
            },
        )
        .await
    }

    async fn sync_table_data(
        &self,
        scope: &str,
        source: &str,
        target: &str,
        table: &str,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/databases/sync-data"),
            &TableSync {
                source,
                target,
                table: Some(table),
            },
        )
        .await
    }
}

#[async_trait]
impl FileApi for HttpRemoteHost {
    async fn upload(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/upload"),
            &PathPair {
                source: source.as_str(),
                dest: dest.as_str(),
            },
        )
        .await
    }

    async fn copy(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/copy"),
            &PathPair {
                source: source.as_str(),
                dest: dest.as_str(),
            },
        )
        .await
    }

    async fn move_entry(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/move"),
            &PathPair {
                source: source.as_str(),
                dest: dest.as_str(),
            },
        )
        .await
    }

    async fn remove(&self, scope: &str, path: &Utf8Path) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/remove"),
            &serde_json::json!({ "path": path }),
        )
        .await
    }

    async fn compress_to_zip(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/compress"),
            &PathPair {
                source: source.as_str(),
                dest: dest.as_str(),
            },
        )
        .await
    }

    async fn extract_zip(
        &self,
        scope: &str,
        source: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/extract"),
            &PathPair {
                source: source.as_str(),
                dest: dest.as_str(),
            },
        )
        .await
    }

    async fn download(&self, scope: &str, path: &Utf8Path) -> Result<ByteStream, RemoteError> {
        let response = self
            .client
            .get(self.url(&format!("/accounts/{scope}/files/download")))
            .query(&[("path", path.as_str())])
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map_err(|err| RemoteError::fault(err.to_string()));
        Ok(Box::pin(stream))
    }

    async fn entry_exists(&self, scope: &str, path: &Utf8Path) -> Result<bool, RemoteError> {
        let response: ExistsResponse = self
            .post_json(
                &format!("/accounts/{scope}/files/exists"),
                &serde_json::json!({ "path": path }),
            )
            .await?;
        Ok(response.exists)
    }

    async fn entry_size(&self, scope: &str, path: &Utf8Path) -> Result<u64, RemoteError> {
        let response: SizeResponse = self
            .post_json(
                &format!("/accounts/{scope}/files/size"),
                &serde_json::json!({ "path": path }),
            )
            .await?;
        Ok(response.size)
    }

    async fn write_file(
        &self,
        scope: &str,
        dir: &Utf8Path,
        filename: &str,
        contents: &str,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/files/contents"),
            &serde_json::json!({ "dir": dir, "filename": filename, "contents": contents }),
        )
        .await
    }
}

#[async_trait]
impl BackupApi for HttpRemoteHost {
    async fn list_backups(&self, scope: &str) -> Result<Vec<Backup>, RemoteError> {
        self.get_json(&format!("/accounts/{scope}/backups")).await
    }

    async fn create_backup(&self, scope: &str, spec: &BackupSpec) -> Result<Backup, RemoteError> {
        self.post_json(&format!("/accounts/{scope}/backups"), spec)
            .await
    }

    async fn delete_backup(&self, scope: &str, remote_backup_id: &str) -> Result<(), RemoteError> {
        self.delete_unit(&format!("/accounts/{scope}/backups/{remote_backup_id}"))
            .await
    }

    async fn restore_backup(&self, scope: &str, remote_backup_id: &str) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/backups/{remote_backup_id}/restore"),
            &serde_json::json!({}),
        )
        .await
    }

    async fn download_backup(
        &self,
        scope: &str,
        remote_backup_id: &str,
    ) -> Result<ByteStream, RemoteError> {
        let response = self
            .client
            .get(self.url(&format!(
                "/accounts/{scope}/backups/{remote_backup_id}/download"
            )))
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map_err(|err| RemoteError::fault(err.to_string()));
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl InstanceApi for HttpRemoteHost {
    async fn install_instance(
        &self,
        scope: &str,
        request: &FinalizeRequest,
    ) -> Result<FinalizeOutcome, RemoteError> {
        self.post_json(&format!("/accounts/{scope}/instances"), request)
            .await
    }

    async fn update_instance(
        &self,
        scope: &str,
        remote_id: &str,
        create_backup: bool,
        version: &str,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/instances/{remote_id}/update"),
            &serde_json::json!({ "create_backup": create_backup, "version": version }),
        )
        .await
    }

    async fn delete_instance(
        &self,
        scope: &str,
        remote_id: &str,
        remove_data: bool,
        remove_database: bool,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/instances/{remote_id}/delete"),
            &serde_json::json!({ "remove_data": remove_data, "remove_database": remove_database }),
        )
        .await
    }

    async fn fetch_application(
        &self,
        scope: &str,
        version: &str,
        dest: &Utf8Path,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/application/fetch"),
            &serde_json::json!({ "version": version, "dest": dest }),
        )
        .await
    }

    async fn get_stats(&self, scope: &str, remote_id: &str) -> Result<InstanceStats, RemoteError> {
        self.get_json(&format!("/accounts/{scope}/instances/{remote_id}/stats"))
            .await
    }

    async fn get_bandwidth(
        &self,
        scope: &str,
        remote_id: &str,
        start_date: &str,
        end_date: &str,
        group_by: &str,
    ) -> Result<BTreeMap<String, u64>, RemoteError> {
        self.get_json(&format!(
            "/accounts/{scope}/instances/{remote_id}/bandwidth?start={start_date}&end={end_date}&group_by={group_by}"
        ))
        .await
    }

    async fn list_log_files(
        &self,
        scope: &str,
        remote_id: &str,
    ) -> Result<Vec<LogFile>, RemoteError> {
        self.get_json(&format!("/accounts/{scope}/instances/{remote_id}/logs"))
            .await
    }

    async fn get_site_type(
        &self,
        scope: &str,
        remote_id: &str,
    ) -> Result<SiteType, RemoteError> {
        let response: SiteTypeResponse = self
            .get_json(&format!(
                "/accounts/{scope}/instances/{remote_id}/site-type"
            ))
            .await?;
        Ok(response.site_type)
    }

    async fn change_site_type(
        &self,
        scope: &str,
        remote_id: &str,
        site_type: SiteType,
    ) -> Result<(), RemoteError> {
        self.post_unit(
            &format!("/accounts/{scope}/instances/{remote_id}/site-type"),
            &serde_json::json!({ "site_type": site_type }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let host = HttpRemoteHost::new(
            "https://panel.example.test/",
            "token",
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(
            host.url("/accounts/acme/backups"),
            "https://panel.example.test/accounts/acme/backups"
        );
    }
}
