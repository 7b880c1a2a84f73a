//! Reconcilers for the ApacheWeb CRD
//!
//! This module contains the business logic of a reconcile pass:
//! - Validating the ApacheWeb spec
//! - Rendering and applying the children
//! - Updating resource status

pub mod apache_web;
