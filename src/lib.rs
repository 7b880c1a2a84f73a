//! ApacheWeb Kubernetes Operator
//!
//! This operator runs Apache httpd in Kubernetes, either as a standalone web
//! server or as a load balancer in front of the endpoints of a backend
//! Service, declared through the ApacheWeb Custom Resource Definition.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod endpoints;
pub mod error;
pub mod gate;
pub mod key;
pub mod metrics;
pub mod platform;
pub mod reconcilers;
pub mod render;
pub mod routing;

pub use error::{Error, Result};
