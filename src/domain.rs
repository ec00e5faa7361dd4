//! Idempotent preparation of hosting domains.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::capabilities::HostCapabilities;
use crate::remote::{DomainApi, RemoteError, with_deadline};

/// Errors raised while preparing a domain.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DomainError {
    /// Raised when a freshly created domain still cannot be resolved after
    /// the retry budget is spent. Treated as a remote consistency fault.
    #[error("domain {domain} not visible after creation ({attempts} lookups)")]
    NotVisibleAfterCreate {
        /// Domain that was created.
        domain: String,
        /// Number of lookups performed.
        attempts: u32,
    },
    /// Raised when a remote primitive fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Ensures a hosting domain exists and resolves its document root.
///
/// Resolution always runs before creation, so preparing the same domain
/// twice yields the same document root and issues exactly one remote
/// creation call.
#[derive(Clone, Debug)]
pub struct DomainPreparer<R> {
    remote: Arc<R>,
    capabilities: HostCapabilities,
}

impl<R: DomainApi> DomainPreparer<R> {
    /// Creates a preparer for the given remote and capability descriptor.
    #[must_use]
    pub const fn new(remote: Arc<R>, capabilities: HostCapabilities) -> Self {
        Self {
            remote,
            capabilities,
        }
    }

    /// Ensures `domain` exists, creating it as an addon domain when missing,
    /// and returns its document root.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotVisibleAfterCreate`] when creation succeeds
    /// but lookups keep returning not-found, or [`DomainError::Remote`] on a
    /// primitive failure.
    pub async fn prepare(&self, domain: &str) -> Result<Utf8PathBuf, DomainError> {
        let scope = &self.capabilities.scope;
        let timeout = self.capabilities.remote_timeout;

        if let Some(record) =
            with_deadline("domain.find", timeout, self.remote.find_domain(scope, domain)).await?
        {
            return Ok(record.document_root);
        }

        with_deadline(
            "domain.create",
            timeout,
            self.remote.create_addon_domain(scope, domain),
        )
        .await?;
        info!(domain, "created addon domain");

        // The remote is eventually consistent about fresh domains; give the
        // lookup a bounded number of chances before declaring a fault.
        let retry = self.capabilities.retry;
        let mut attempt = 0;
        while let Some(delay) = retry.delay_before(attempt) {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            if let Some(record) =
                with_deadline("domain.find", timeout, self.remote.find_domain(scope, domain))
                    .await?
            {
                return Ok(record.document_root);
            }
            warn!(domain, attempt, "created domain not yet resolvable");
            attempt += 1;
        }

        Err(DomainError::NotVisibleAfterCreate {
            domain: domain.to_owned(),
            attempts: retry.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRemote;

    fn preparer(remote: ScriptedRemote) -> DomainPreparer<ScriptedRemote> {
        DomainPreparer::new(Arc::new(remote), HostCapabilities::for_scope("acme"))
    }

    #[tokio::test]
    async fn existing_domain_is_not_recreated() {
        let remote = ScriptedRemote::new();
        remote.seed_domain("shop.example.org", "/home/acme/shop.example.org");

        let preparer = preparer(remote.clone());
        let first = preparer.prepare("shop.example.org").await.expect("first");
        let second = preparer.prepare("shop.example.org").await.expect("second");

        assert_eq!(first, "/home/acme/shop.example.org");
        assert_eq!(first, second);
        assert_eq!(remote.calls_matching("domain.create"), 0);
    }

    #[tokio::test]
    async fn missing_domain_is_created_once_then_resolved() {
        let remote = ScriptedRemote::new();

        let preparer = preparer(remote.clone());
        let root = preparer.prepare("new.example.org").await.expect("prepare");

        assert_eq!(root, "/home/acme/new.example.org");
        assert_eq!(remote.calls_matching("domain.create"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_created_domain_exhausts_retries() {
        let remote = ScriptedRemote::new();
        // Creation succeeds but the domain never shows up in lookups.
        remote.hide_created_domains();
        let preparer = preparer(remote.clone());

        let err = preparer
            .prepare("ghost.example.org")
            .await
            .expect_err("expected consistency fault");

        assert_eq!(
            err,
            DomainError::NotVisibleAfterCreate {
                domain: String::from("ghost.example.org"),
                attempts: 3,
            }
        );
        assert_eq!(remote.calls_matching("domain.create"), 1);
        // Pre-create lookup plus one per retry attempt.
        assert_eq!(remote.calls_matching("domain.find"), 4);
    }
}
