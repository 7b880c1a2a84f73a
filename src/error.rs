//! Error types for the ApacheWeb Operator

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error (conflict, timeout, throttling, ...)
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// httpd.conf template failed to render
    #[error("Render error: {0}")]
    Render(#[from] minijinja::Error),

    /// The ApacheWeb spec cannot be reconciled as declared
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Reconcile pass exceeded its deadline
    #[error("Reconcile pass exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Create an invalid spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Error::InvalidSpec(msg.into())
    }

    /// Whether retrying the same inputs can succeed.
    ///
    /// Render and spec errors need a spec change before the next pass can do
    /// anything different, so they are requeued on a slower cadence.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_) | Error::Timeout(_))
    }

    /// Short label used for metrics and event reasons
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::Kube(_) => "kube",
            Error::Render(_) => "render",
            Error::InvalidSpec(_) => "invalid_spec",
            Error::Timeout(_) => "timeout",
        }
    }
}
