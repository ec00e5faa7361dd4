//! Database provisioning for new instances.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::capabilities::HostCapabilities;
use crate::credentials::CredentialGenerator;
use crate::model::DatabaseCredentials;
use crate::remote::{DatabaseApi, RemoteError, with_deadline};

/// The remote step a provisioning failure occurred in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionStep {
    /// `create database`.
    CreateDatabase,
    /// `create database user`.
    CreateUser,
    /// `grant privileges`.
    GrantPrivileges,
}

impl ProvisionStep {
    /// Human-readable step name used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateDatabase => "create database",
            Self::CreateUser => "create database user",
            Self::GrantPrivileges => "grant privileges",
        }
    }
}

/// Errors raised while provisioning a database.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("database provisioning failed at step '{}': {source}", step.as_str())]
pub struct DatabaseError {
    /// Step that failed; earlier steps completed and are not rolled back.
    pub step: ProvisionStep,
    /// Underlying remote failure.
    #[source]
    pub source: RemoteError,
}

/// Caller-supplied overrides for generated credentials.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CredentialHints {
    /// Database name to use instead of the derived one.
    pub name: Option<String>,
    /// Database user to use instead of the derived one.
    pub user: Option<String>,
    /// Password to use instead of a generated one.
    pub password: Option<String>,
}

/// Creates database, user, and grant for a new instance.
///
/// The three steps run strictly in order. A failure aborts the sequence and
/// names the failed step; already-completed steps are left in place for the
/// caller to retry against or clean up. Only the grant step is retried
/// locally, as it is idempotent on every known remote.
#[derive(Clone, Debug)]
pub struct DatabaseProvisioner<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
    generator: CredentialGenerator,
}

impl<R: DatabaseApi> DatabaseProvisioner<R> {
    /// Creates a provisioner for the given remote and capability descriptor.
    #[must_use]
    pub const fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            remote,
            capabilities,
            generator: CredentialGenerator,
        }
    }

    /// Provisions a database, filling any missing credential from the
    /// generator, and returns the full credential set.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] naming the step that failed.
    pub async fn provision(
        &self,
        hints: &CredentialHints,
    ) -> Result<DatabaseCredentials, DatabaseError> {
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;

        let name = self.generator.database_name(scope, hints.name.as_deref());
        let user = self.generator.database_user(scope, hints.user.as_deref());
        let password = self.generator.password(hints.password.as_deref());

        with_deadline(
            "database.create",
            timeout,
            self.remote.create_database(scope, &name),
        )
        .await
        .map_err(|source| DatabaseError {
            step: ProvisionStep::CreateDatabase,
            source,
        })?;

        with_deadline(
            "database.create_user",
            timeout,
            self.remote.create_database_user(scope, &user, &password),
        )
        .await
        .map_err(|source| DatabaseError {
            step: ProvisionStep::CreateUser,
            source,
        })?;

        self.grant_with_retry(&user, &name).await?;
        info!(database = %name, user = %user, "database provisioned");

        Ok(DatabaseCredentials {
            host: self.capabilities.db_host.clone(),
            name,
            user,
            password,
        })
    }

    async fn grant_with_retry(&self, user: &str, database: &str) -> Result<(), DatabaseError> {
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;
        let retry = self.capabilities.retry;

        let mut attempt = 0;
        let mut last: Option<RemoteError> = None;
        while let Some(delay) = retry.delay_before(attempt) {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            match with_deadline(
                "database.grant",
                timeout,
                self.remote.grant_privileges(scope, user, database),
            )
            .await
            {
                Ok(()) => return Ok(()),
                // A timed-out grant may still be applying on the remote;
                // re-issuing it blind would race the first attempt.
                Err(source @ RemoteError::Timeout { .. }) => {
                    return Err(DatabaseError {
                        step: ProvisionStep::GrantPrivileges,
                        source,
                    });
                }
                Err(source) => {
                    warn!(user, database, attempt, %source, "privilege grant failed");
                    last = Some(source);
                    attempt += 1;
                }
            }
        }

        Err(DatabaseError {
            step: ProvisionStep::GrantPrivileges,
            source: last.unwrap_or_else(|| RemoteError::fault("grant never attempted")),
        })
    }
}
