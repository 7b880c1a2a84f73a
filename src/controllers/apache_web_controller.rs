//! ApacheWeb controller
//!
//! Watches ApacheWeb resources, their children and the EndpointSlices of
//! declared backend Services, and triggers reconciliation.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        reflector::{ObjectRef, Store},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::ApacheWeb;
use crate::endpoints::SERVICE_NAME_LABEL;
use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::metrics;
use crate::platform::WebEvent;
use crate::reconcilers::apache_web::{self as web_reconciler, Outcome};
use crate::render::IDENTITY_LABEL;
use crate::routing::{EventRouter, WatchEvent};

/// Run the ApacheWeb controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<ApacheWeb> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("ApacheWeb CRD not installed: {}", e);
        return;
    }

    info!(
        concurrency = context.config.concurrency,
        "Starting ApacheWeb controller"
    );

    let controller = Controller::new(api, WatcherConfig::default());
    let router = EventRouter::new(controller.store());
    let children = WatcherConfig::default().labels(IDENTITY_LABEL);

    let config_map_router = router.clone();
    let deployment_router = router.clone();
    let service_router = router.clone();

    controller
        .watches(
            Api::<ConfigMap>::all(client.clone()),
            children.clone(),
            move |cm| route_child(&config_map_router, &cm),
        )
        .watches(
            Api::<Deployment>::all(client.clone()),
            children.clone(),
            move |deploy| route_child(&deployment_router, &deploy),
        )
        .watches(
            Api::<Service>::all(client.clone()),
            children,
            move |svc| route_child(&service_router, &svc),
        )
        .watches(
            Api::<EndpointSlice>::all(client),
            WatcherConfig::default().labels(SERVICE_NAME_LABEL),
            move |slice| router.route(WatchEvent::discovery(&slice)),
        )
        .with_config(ControllerConfig::default().concurrency(context.config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled ApacheWeb"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Reconciliation error");
                }
            }
        })
        .await;
}

fn route_child<K: ResourceExt>(
    router: &EventRouter<Store<ApacheWeb>>,
    child: &K,
) -> Vec<ObjectRef<ApacheWeb>> {
    WatchEvent::child_changed(child)
        .map(|event| router.route(event))
        .unwrap_or_default()
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<ApacheWeb>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["ApacheWeb"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["ApacheWeb"]).inc();

    let key = ObjectKey::for_resource(obj.as_ref());
    let deadline = ctx.config.reconcile_timeout();

    let result = match tokio::time::timeout(deadline, web_reconciler::reconcile(&key, &ctx)).await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline)),
    };

    match result {
        Ok(outcome) => {
            ctx.retries.reset(&key);
            if outcome == Outcome::Missing {
                return Ok(Action::await_change());
            }
            Ok(Action::requeue(ctx.config.resync_interval()))
        }
        Err(e) => {
            metrics::RECONCILIATION_ERRORS
                .with_label_values(&["ApacheWeb", e.metric_label()])
                .inc();

            let event = WebEvent::warning("ReconcileFailed", e.to_string());
            if let Err(publish_err) = ctx.platform.publish_event(&obj, event).await {
                warn!(error = %publish_err, "Failed to publish failure event");
            }

            Err(e)
        }
    }
}

/// Error policy for the controller
fn error_policy(obj: Arc<ApacheWeb>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectKey::for_resource(obj.as_ref());

    // Spec and render errors only clear on a spec change, which triggers its
    // own pass.
    let requeue_duration = if error.is_transient() {
        ctx.retries.next_delay(&key)
    } else {
        ctx.config.invalid_spec_requeue()
    };

    error!(
        name = %key.name,
        namespace = %key.namespace,
        error = %error,
        requeue_secs = requeue_duration.as_secs(),
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_duration)
}
