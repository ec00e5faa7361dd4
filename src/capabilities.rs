//! Capability descriptor for the remote hosting account.
//!
//! Feature differences between hosting backends (site typing, server-side
//! backup capture) are expressed as data passed into each component at
//! construction, never as overridable behaviour.

use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Default ceiling applied to every remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default scratch directory used for snapshot archives on the remote.
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp/.stagehand";

/// Bounded exponential backoff applied to idempotent remote operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles per subsequent attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff delay preceding `attempt` (zero-based), or `None` when the
    /// attempt budget is exhausted.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.base_delay.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Static description of what the remote hosting account supports and where
/// this core may stage its working files.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostCapabilities {
    /// Account scope (remote username) all primitive calls are issued under.
    pub scope: String,
    /// Host applications use in their database connection string.
    pub db_host: String,
    /// Remote directory for snapshot archives and transfer staging.
    pub scratch_dir: Utf8PathBuf,
    /// Whether instances can be tagged `development`/`staging`/`production`.
    pub supports_site_types: bool,
    /// Whether the remote can capture backups server-side; when `false` the
    /// backup bridge builds the archive itself.
    pub supports_server_side_backups: bool,
    /// Ceiling applied to every remote call.
    pub remote_timeout: Duration,
    /// Backoff applied to the idempotent operations that retry locally.
    pub retry: RetryPolicy,
}

impl HostCapabilities {
    /// Creates a descriptor with defaults for `scope`.
    #[must_use]
    pub fn for_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            db_host: String::from("localhost"),
            scratch_dir: Utf8PathBuf::from(DEFAULT_SCRATCH_DIR),
            supports_site_types: false,
            supports_server_side_backups: false,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Validates the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] when a field is blank or a budget is zero.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        if self.scope.trim().is_empty() {
            return Err(CapabilityError::MissingField { field: "scope" });
        }
        if self.db_host.trim().is_empty() {
            return Err(CapabilityError::MissingField { field: "db_host" });
        }
        if self.scratch_dir.as_str().trim().is_empty() {
            return Err(CapabilityError::MissingField {
                field: "scratch_dir",
            });
        }
        if self.remote_timeout.is_zero() {
            return Err(CapabilityError::ZeroTimeout);
        }
        if self.retry.attempts == 0 {
            return Err(CapabilityError::ZeroRetryAttempts);
        }
        Ok(())
    }
}

/// Errors raised when validating a capability descriptor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CapabilityError {
    /// Raised when a required field is blank.
    #[error("missing or empty field: {field}")]
    MissingField {
        /// Name of the blank field.
        field: &'static str,
    },
    /// Raised when the remote timeout is zero.
    #[error("remote timeout must be greater than zero")]
    ZeroTimeout,
    /// Raised when the retry budget allows no attempts at all.
    #[error("retry policy must allow at least one attempt")]
    ZeroRetryAttempts,
}
