//! Guarded calls to external dependencies.
//!
//! Every call the answer pipeline makes to the store, the text index or the
//! completion backend goes through [`guarded`], which applies a per-call
//! timeout and tags failures with the dependency that produced them. Callers
//! decide how to degrade; nothing here retries.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// An external dependency of the answer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Store,
    Index,
    Completion,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dependency::Store => "store",
            Dependency::Index => "index",
            Dependency::Completion => "completion",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("{dependency} call timed out after {timeout:?}")]
    Timeout {
        dependency: Dependency,
        timeout: Duration,
    },
    #[error("{dependency} call failed: {source:#}")]
    Failed {
        dependency: Dependency,
        #[source]
        source: anyhow::Error,
    },
}

impl ExternalError {
    pub fn dependency(&self) -> Dependency {
        match self {
            ExternalError::Timeout { dependency, .. } | ExternalError::Failed { dependency, .. } => {
                *dependency
            }
        }
    }
}

/// Runs `fut` with a timeout, mapping both a timeout and an inner error to
/// an [`ExternalError`] tagged with `dependency`.
pub async fn guarded<T, F>(
    dependency: Dependency,
    timeout: Duration,
    fut: F,
) -> Result<T, ExternalError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ExternalError::Failed { dependency, source }),
        Err(_) => Err(ExternalError::Timeout {
            dependency,
            timeout,
        }),
    }
}

/// Like [`guarded`], but logs the failure at `warn` and returns `None`.
pub async fn guarded_or_warn<T, F>(
    dependency: Dependency,
    timeout: Duration,
    what: &str,
    fut: F,
) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match guarded(dependency, timeout, fut).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(%dependency, what, error = %e, "external call degraded");
            None
        }
    }
}
