//! Kubernetes controllers for the ApacheWeb CRD
//!
//! This module contains the controller wiring that watches ApacheWebs, their
//! children and backend EndpointSlices, and triggers reconciliation.

mod apache_web_controller;
mod backoff;

pub use apache_web_controller::run as run_apache_web_controller;
pub use backoff::RetryTracker;

use std::sync::Arc;
use std::time::Duration;

use crate::config::OperatorConfig;
use crate::platform::PlatformClient;

/// Shared context for reconcile passes.
///
/// Built once in `main` from the real platform, and directly in tests with an
/// in-memory one.
pub struct Context {
    /// Cluster access
    pub platform: Arc<dyn PlatformClient>,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Retry state of failing ApacheWebs
    pub retries: RetryTracker,
}

impl Context {
    /// Create a new context
    pub fn new(platform: Arc<dyn PlatformClient>, config: OperatorConfig) -> Self {
        let retries = RetryTracker::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        );
        Self {
            platform,
            config,
            retries,
        }
    }
}
