//! Custom Resource Definitions for the ApacheWeb Operator

mod apache_web;

pub use apache_web::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&ApacheWeb::crd())?])
}
