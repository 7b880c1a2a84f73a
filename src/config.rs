//! Operator configuration
//!
//! Defaults can be overridden with `APACHEWEB_`-prefixed environment
//! variables, e.g. `APACHEWEB_RECONCILE_TIMEOUT_SECS=60`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OperatorConfig {
    /// Port of the metrics and health endpoints
    pub metrics_port: u16,

    /// Field manager used for server-side apply and as event reporter
    pub field_manager: String,

    /// httpd image run by generated Deployments
    pub image: String,

    /// Deadline of a single reconcile pass
    pub reconcile_timeout_secs: u64,

    /// Maximum number of ApacheWebs reconciled in parallel (0 = unbounded)
    pub concurrency: u16,

    /// First retry delay after a transient failure
    pub backoff_base_secs: u64,

    /// Upper bound of the retry delay
    pub backoff_max_secs: u64,

    /// Retry delay after a render or spec error
    pub invalid_spec_requeue_secs: u64,

    /// Periodic resync of healthy ApacheWebs
    pub resync_interval_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: 8080,
            field_manager: "apacheweb-operator".to_string(),
            image: "docker.io/httpd:2.4".to_string(),
            reconcile_timeout_secs: 30,
            concurrency: 4,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
            invalid_spec_requeue_secs: 300,
            resync_interval_secs: 600,
        }
    }
}

impl OperatorConfig {
    /// Load defaults overlaid with `APACHEWEB_*` environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&OperatorConfig::default())?)
            .add_source(config::Environment::with_prefix("APACHEWEB").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn invalid_spec_requeue(&self) -> Duration {
        Duration::from_secs(self.invalid_spec_requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OperatorConfig::default();
        assert_eq!(config.metrics_port, 8080);
        assert_eq!(config.field_manager, "apacheweb-operator");
        assert_eq!(config.reconcile_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_without_overrides_matches_defaults() {
        // No APACHEWEB_* variables are set in the test environment
        let config = OperatorConfig::load().unwrap();
        assert_eq!(config, OperatorConfig::default());
    }
}
