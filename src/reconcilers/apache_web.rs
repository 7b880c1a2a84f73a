//! ApacheWeb reconciler
//!
//! One pass for one ApacheWeb:
//! - fetch the ApacheWeb (gone means done, owner references clean up)
//! - aggregate backend endpoints for load balancers
//! - render the desired ConfigMap, Deployment and Service
//! - gate on the fingerprint recorded on every live child
//! - apply the children, then write status
//!
//! Status is written last. A pass that fails or times out part way leaves the
//! previous status in place and the next pass recomputes everything.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controllers::Context;
use crate::crd::{ApacheWeb, ApacheWebStatus, Condition, EndPoint, ObservedWorkload, Workload};
use crate::endpoints;
use crate::error::{Error, Result};
use crate::gate::{self, Fingerprint};
use crate::key::ObjectKey;
use crate::metrics;
use crate::platform::{PlatformClient, WebEvent};
use crate::render::{self, DesiredState};

/// What a reconcile pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The ApacheWeb no longer exists
    Missing,
    /// Children and status already matched the desired state
    Unchanged,
    /// Children were applied and status written
    Applied,
    /// Children matched, only the status was rewritten
    StatusRefreshed,
}

/// Validate the ApacheWeb spec and resolve its mode payload
pub fn validate(web: &ApacheWeb) -> Result<Workload<'_>> {
    if web.spec.replicas < 1 {
        return Err(Error::invalid_spec(format!(
            "replicas must be at least 1, got {}",
            web.spec.replicas
        )));
    }

    if web.spec.server_name.trim().is_empty() {
        return Err(Error::invalid_spec("serverName must not be empty"));
    }

    if !(1..=65535).contains(&web.spec.port) {
        return Err(Error::invalid_spec(format!(
            "port {} is outside 1-65535",
            web.spec.port
        )));
    }

    let workload = web.spec.workload()?;
    if let Workload::LoadBalanced(lb) = workload {
        if lb.backend_service_name.is_empty() {
            return Err(Error::invalid_spec("loadBalancer.backendServiceName must not be empty"));
        }
        if !(1..=65535).contains(&lb.port) {
            return Err(Error::invalid_spec(format!(
                "loadBalancer.port {} is outside 1-65535",
                lb.port
            )));
        }
    }

    Ok(workload)
}

/// Run one reconcile pass for `key`
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<Outcome> {
    let platform = ctx.platform.as_ref();

    let Some(web) = platform.get_web(key).await? else {
        debug!(key = %key, "ApacheWeb not found, nothing to reconcile");
        metrics::forget_web(&key.namespace, &key.name);
        return Ok(Outcome::Missing);
    };

    info!(
        name = %key.name,
        namespace = %key.namespace,
        generation = web.metadata.generation.unwrap_or_default(),
        "Reconciling ApacheWeb"
    );

    let workload = validate(&web)?;

    let observed = match workload {
        Workload::LoadBalanced(lb) => {
            let slices = platform
                .list_endpoint_slices(&key.namespace, &lb.backend_service_name)
                .await?;
            endpoints::aggregate(&lb.backend_service_name, &lb.protocol, &slices)
        }
        Workload::Standalone(_) => endpoints::AggregatedEndpoints::default(),
    };

    let existing = ExistingChildren::fetch(platform, key).await?;

    let desired = render::build(&web, &observed.endpoints, &observed.version, &ctx.config.image)?;
    let status = desired_status(&web, workload, &observed.endpoints);

    let children_current = existing.applied_with(&desired.fingerprint);
    let status_current = status_matches(web.status.as_ref(), &status);

    if children_current && status_current {
        info!(
            name = %key.name,
            fingerprint = %desired.fingerprint,
            "Children unchanged, nothing to patch"
        );
        metrics::RECONCILE_SKIPS.with_label_values(&["ApacheWeb"]).inc();
        return Ok(Outcome::Unchanged);
    }

    if !children_current {
        apply_children(platform, &desired).await?;
    }

    platform.patch_status(key, &status).await?;

    if children_current {
        debug!(name = %key.name, "Children current, refreshed stale status");
        return Ok(Outcome::StatusRefreshed);
    }

    record_applied(platform, &web, key, workload, &observed.endpoints).await;

    info!(
        name = %key.name,
        namespace = %key.namespace,
        fingerprint = %desired.fingerprint,
        endpoints = observed.endpoints.len(),
        "Applied ApacheWeb children"
    );

    Ok(Outcome::Applied)
}

/// Children as currently stored in the cluster
struct ExistingChildren {
    config_map: Option<ConfigMap>,
    deployment: Option<Deployment>,
    service: Option<Service>,
}

impl ExistingChildren {
    async fn fetch(platform: &dyn PlatformClient, key: &ObjectKey) -> Result<Self> {
        Ok(Self {
            config_map: platform.get_config_map(key).await?,
            deployment: platform.get_deployment(key).await?,
            service: platform.get_service(key).await?,
        })
    }

    /// Whether all children exist and each was applied from `fingerprint`
    fn applied_with(&self, fingerprint: &Fingerprint) -> bool {
        let (Some(config_map), Some(deployment), Some(service)) =
            (&self.config_map, &self.deployment, &self.service)
        else {
            return false;
        };

        [
            Fingerprint::recorded_on(config_map),
            Fingerprint::recorded_on(deployment),
            Fingerprint::recorded_on(service),
        ]
        .iter()
        .all(|recorded| gate::should_skip(recorded.as_ref(), fingerprint))
    }
}

/// Apply ConfigMap first so the Deployment never mounts a stale configuration
async fn apply_children(platform: &dyn PlatformClient, desired: &DesiredState) -> Result<()> {
    platform.apply_config_map(&desired.config_map).await?;
    metrics::APPLIED_RESOURCES.with_label_values(&["ConfigMap"]).inc();

    platform.apply_deployment(&desired.deployment).await?;
    metrics::APPLIED_RESOURCES.with_label_values(&["Deployment"]).inc();

    platform.apply_service(&desired.service).await?;
    metrics::APPLIED_RESOURCES.with_label_values(&["Service"]).inc();

    Ok(())
}

/// Status a successful pass leaves behind
fn desired_status(web: &ApacheWeb, workload: Workload<'_>, observed: &[EndPoint]) -> ApacheWebStatus {
    let (end_points, observed_workload) = match workload {
        Workload::LoadBalanced(_) => (Some(observed.to_vec()), None),
        Workload::Standalone(standalone) => (
            None,
            Some(ObservedWorkload {
                replicas: web.spec.replicas,
                server_name: web.spec.server_name.clone(),
                port: web.spec.port,
                document_root: standalone.document_root.clone(),
                server_admin: standalone.server_admin.clone(),
            }),
        ),
    };

    ApacheWebStatus {
        end_points,
        workload: observed_workload,
        observed_generation: web.metadata.generation,
        conditions: vec![Condition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            last_transition_time: Utc::now(),
            reason: Some("Reconciled".to_string()),
            message: Some("Children are applied".to_string()),
        }],
    }
}

/// Whether the recorded status already reports what `desired` would write.
///
/// Condition timestamps are ignored.
fn status_matches(current: Option<&ApacheWebStatus>, desired: &ApacheWebStatus) -> bool {
    current.is_some_and(|current| {
        current.observed_generation == desired.observed_generation
            && current.end_points == desired.end_points
            && current.workload == desired.workload
    })
}

/// Record events and gauges for an applying pass.
///
/// Event delivery is best effort: a lost event must not fail a pass whose
/// writes already landed.
async fn record_applied(
    platform: &dyn PlatformClient,
    web: &ApacheWeb,
    key: &ObjectKey,
    workload: Workload<'_>,
    observed: &[EndPoint],
) {
    let events: Vec<WebEvent> = match workload {
        Workload::LoadBalanced(_) => {
            let ready = observed.iter().filter(|ep| ep.ready).count();
            metrics::OBSERVED_ENDPOINTS
                .with_label_values(&[key.namespace.as_str(), key.name.as_str(), "true"])
                .set(ready as f64);
            metrics::OBSERVED_ENDPOINTS
                .with_label_values(&[key.namespace.as_str(), key.name.as_str(), "false"])
                .set((observed.len() - ready) as f64);

            observed.iter().map(endpoint_event).collect()
        }
        Workload::Standalone(standalone) => vec![WebEvent::normal(
            "Created",
            format!(
                "Apache web server with port {}, server name {}, document root {} was applied",
                web.spec.port, web.spec.server_name, standalone.document_root
            ),
        )],
    };

    for event in events {
        if let Err(e) = platform.publish_event(web, event).await {
            warn!(name = %web.name_any(), error = %e, "Failed to publish event");
        }
    }
}

fn endpoint_event(ep: &EndPoint) -> WebEvent {
    if ep.ready {
        WebEvent::normal(
            "EndpointAdded",
            format!(
                "Endpoint {}:{} ({}) added to the balancer",
                ep.ip_address, ep.port, ep.proto
            ),
        )
    } else {
        WebEvent::warning(
            "EndpointNotReady",
            format!(
                "Endpoint {}:{} ({}) is not ready and receives no traffic",
                ep.ip_address, ep.port, ep.proto
            ),
        )
    }
}
