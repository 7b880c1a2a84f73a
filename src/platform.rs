//! Kubernetes API access for the reconciler
//!
//! The reconciler only talks to the cluster through [`PlatformClient`], so a
//! pass can be driven against an in-memory platform in tests while production
//! uses [`KubePlatform`].

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{ListParams, Patch, PatchParams, PostParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::debug;

use crate::crd::{ApacheWeb, ApacheWebStatus};
use crate::endpoints::SERVICE_NAME_LABEL;
use crate::error::{Error, Result};
use crate::key::ObjectKey;

/// Severity of an event recorded against an ApacheWeb
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Kubernetes event recorded against an ApacheWeb
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebEvent {
    pub severity: EventSeverity,
    pub reason: String,
    pub note: String,
}

impl WebEvent {
    pub fn normal(reason: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason: reason.into(),
            note: note.into(),
        }
    }

    pub fn warning(reason: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason: reason.into(),
            note: note.into(),
        }
    }
}

/// Cluster operations a reconcile pass performs
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Get an ApacheWeb, `None` if it does not exist
    async fn get_web(&self, key: &ObjectKey) -> Result<Option<ApacheWeb>>;

    /// List the EndpointSlices of a Service
    async fn list_endpoint_slices(&self, namespace: &str, service: &str)
        -> Result<Vec<EndpointSlice>>;

    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>>;

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>>;

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>>;

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn apply_service(&self, service: &Service) -> Result<()>;

    /// Replace the status of an ApacheWeb
    async fn patch_status(&self, key: &ObjectKey, status: &ApacheWebStatus) -> Result<()>;

    async fn publish_event(&self, web: &ApacheWeb, event: WebEvent) -> Result<()>;
}

/// [`PlatformClient`] backed by the Kubernetes API server
pub struct KubePlatform {
    client: Client,
    field_manager: String,
    reporter: Reporter,
}

impl KubePlatform {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        let field_manager = field_manager.into();
        let reporter = Reporter {
            controller: field_manager.clone(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            client,
            field_manager,
            reporter,
        }
    }

    async fn get_opt<K>(&self, key: &ObjectKey) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    /// Server-side apply `obj`, creating it if the apply path reports it missing
    async fn apply_or_create<K>(&self, obj: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let key = ObjectKey::for_resource(obj);
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = PatchParams::apply(&self.field_manager).force();

        match api.patch(&key.name, &params, &Patch::Apply(obj)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %K::kind(&()), key = %key, "Apply reported not found, creating");
                let post = PostParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..Default::default()
                };
                api.create(&post, obj).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn get_web(&self, key: &ObjectKey) -> Result<Option<ApacheWeb>> {
        self.get_opt(key).await
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<EndpointSlice>> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{}={}", SERVICE_NAME_LABEL, service));
        Ok(api.list(&params).await?.items)
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>> {
        self.get_opt(key).await
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>> {
        self.get_opt(key).await
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>> {
        self.get_opt(key).await
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.apply_or_create(config_map).await
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.apply_or_create(deployment).await
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.apply_or_create(service).await
    }

    async fn patch_status(&self, key: &ObjectKey, status: &ApacheWebStatus) -> Result<()> {
        let api: Api<ApacheWeb> = Api::namespaced(self.client.clone(), &key.namespace);

        // Every field is written, absent ones as null, so nothing from an
        // earlier pass survives the merge.
        let status_patch = json!({
            "status": {
                "endPoints": status.end_points,
                "workload": status.workload,
                "observedGeneration": status.observed_generation,
                "conditions": status.conditions,
            }
        });

        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;

        Ok(())
    }

    async fn publish_event(&self, web: &ApacheWeb, event: WebEvent) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), web.object_ref(&()));
        let type_ = match event.severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };

        recorder
            .publish(Event {
                type_,
                reason: event.reason,
                note: Some(event.note),
                action: "Reconciling".to_string(),
                secondary: None,
            })
            .await
            .map_err(Error::from)
    }
}
