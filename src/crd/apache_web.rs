//! ApacheWeb Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// ApacheWeb resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apacheweb.arsenal.dev",
    version = "v1alpha1",
    kind = "ApacheWeb",
    plural = "apachewebs",
    singular = "apacheweb",
    shortname = "aw",
    namespaced,
    status = "ApacheWebStatus",
    printcolumn = r#"{"name": "Mode", "type": "string", "jsonPath": ".spec.mode"}"#,
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas"}"#,
    printcolumn = r#"{"name": "Server", "type": "string", "jsonPath": ".spec.serverName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApacheWebSpec {
    /// Which kind of httpd to run (standalone, loadBalanced)
    pub mode: WorkloadMode,

    /// Number of httpd replicas
    #[serde(default = "default_replicas")]
    #[schemars(range(min = 1))]
    pub replicas: i32,

    /// Value of the httpd ServerName directive and the identity label
    pub server_name: String,

    /// Port httpd listens on inside the container
    #[serde(default = "default_port")]
    pub port: i32,

    /// Settings used when mode is standalone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone: Option<StandaloneSpec>,

    /// Settings used when mode is loadBalanced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerSpec>,
}

fn default_replicas() -> i32 {
    1
}

fn default_port() -> i32 {
    8080
}

/// Workload mode
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WorkloadMode {
    /// Serve static content from a document root
    Standalone,
    /// Proxy requests to the endpoints of a backend Service
    LoadBalanced,
}

/// Standalone web server settings
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneSpec {
    /// DocumentRoot directory
    #[serde(default = "default_document_root")]
    pub document_root: String,

    /// ServerAdmin contact
    #[serde(default = "default_server_admin")]
    pub server_admin: String,
}

fn default_document_root() -> String {
    "/usr/local/apache2/htdocs".to_string()
}

fn default_server_admin() -> String {
    "webmaster@localhost".to_string()
}

/// Load balancer settings
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Name of the Service whose EndpointSlices provide the backends
    pub backend_service_name: String,

    /// Protocol used towards the backends (http, https)
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// URL path proxied to the backends
    #[serde(default = "default_path")]
    pub path: String,

    /// Port exposed by the generated Service
    pub port: i32,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

/// The mode-specific payload selected by `mode`.
///
/// Rendering only ever sees this closed form, so a spec whose declared mode
/// has no matching payload never reaches the templates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Workload<'a> {
    Standalone(&'a StandaloneSpec),
    LoadBalanced(&'a LoadBalancerSpec),
}

impl ApacheWebSpec {
    /// Resolve the payload matching the declared mode
    pub fn workload(&self) -> Result<Workload<'_>> {
        match self.mode {
            WorkloadMode::Standalone => self
                .standalone
                .as_ref()
                .map(Workload::Standalone)
                .ok_or_else(|| {
                    Error::invalid_spec("mode is standalone but standalone settings are missing")
                }),
            WorkloadMode::LoadBalanced => self
                .load_balancer
                .as_ref()
                .map(Workload::LoadBalanced)
                .ok_or_else(|| {
                    Error::invalid_spec("mode is loadBalanced but loadBalancer settings are missing")
                }),
        }
    }

    /// Port exposed by the generated Service.
    ///
    /// A populated loadBalancer payload wins over the listening port, even
    /// when the declared mode is standalone.
    pub fn service_port(&self) -> i32 {
        match &self.load_balancer {
            Some(lb) => lb.port,
            None => self.port,
        }
    }
}

/// Backend endpoint observed from an EndpointSlice
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndPoint {
    /// Backend IP address
    pub ip_address: String,

    /// Backend port
    pub port: i32,

    /// Protocol used to reach the backend
    pub proto: String,

    /// Ready condition copied from the EndpointSlice
    pub ready: bool,
}

/// Workload parameters observed for a standalone server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedWorkload {
    pub replicas: i32,
    pub server_name: String,
    pub port: i32,
    pub document_root: String,
    pub server_admin: String,
}

/// ApacheWeb status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApacheWebStatus {
    /// Backends currently written into the load balancer configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_points: Option<Vec<EndPoint>>,

    /// Parameters of the standalone server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<ObservedWorkload>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: WorkloadMode) -> ApacheWebSpec {
        ApacheWebSpec {
            mode,
            replicas: 1,
            server_name: "web".to_string(),
            port: 8080,
            standalone: None,
            load_balancer: None,
        }
    }

    fn lb(port: i32) -> LoadBalancerSpec {
        LoadBalancerSpec {
            backend_service_name: "svcA".to_string(),
            protocol: "https".to_string(),
            path: "/".to_string(),
            port,
        }
    }

    #[test]
    fn workload_requires_matching_payload() {
        let mut s = spec(WorkloadMode::LoadBalanced);
        s.standalone = Some(StandaloneSpec {
            document_root: "/srv".to_string(),
            server_admin: "admin@example.com".to_string(),
        });

        let err = s.workload().unwrap_err();
        assert!(err.to_string().contains("loadBalancer"));

        s.load_balancer = Some(lb(9443));
        assert!(matches!(s.workload().unwrap(), Workload::LoadBalanced(l) if l.port == 9443));
    }

    #[test]
    fn service_port_prefers_load_balancer() {
        let mut s = spec(WorkloadMode::Standalone);
        assert_eq!(s.service_port(), 8080);

        s.load_balancer = Some(lb(9443));
        assert_eq!(s.service_port(), 9443);
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let s: ApacheWebSpec = serde_json::from_value(serde_json::json!({
            "mode": "loadBalanced",
            "serverName": "lb.example.com",
            "loadBalancer": { "backendServiceName": "svcA", "port": 8443 }
        }))
        .unwrap();

        assert_eq!(s.replicas, 1);
        assert_eq!(s.port, 8080);
        let lb = s.load_balancer.unwrap();
        assert_eq!(lb.protocol, "http");
        assert_eq!(lb.path, "/");
    }
}
