//! Event routing from children and EndpointSlices back to ApacheWebs
//!
//! A change to a ConfigMap, Deployment or Service we own routes to the
//! ApacheWeb named by its controller owner reference.
//!
//! A load balancer also has to be re-rendered whenever the EndpointSlices of
//! its backend Service change. The slices carry no owner reference to us, so
//! the affected ApacheWebs are found through a secondary index from backend
//! Service to the ApacheWebs that name it.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::crd::ApacheWeb;
use crate::endpoints::SERVICE_NAME_LABEL;
use crate::key::ObjectKey;

/// A backend Service, identified by namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendRef {
    pub namespace: String,
    pub service: String,
}

impl BackendRef {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }

    /// Backend declared by an ApacheWeb, if it names one
    pub fn declared_by(web: &ApacheWeb) -> Option<Self> {
        let lb = web.spec.load_balancer.as_ref()?;
        if lb.backend_service_name.is_empty() {
            return None;
        }
        let key = ObjectKey::for_resource(web);
        Some(Self::new(key.namespace, lb.backend_service_name.clone()))
    }
}

/// Backend Service to the ApacheWebs that declared it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecondaryIndex {
    entries: BTreeMap<BackendRef, BTreeSet<ObjectKey>>,
}

impl SecondaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan live ApacheWebs and index every declared backend
    pub fn rebuild<I, W>(webs: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Borrow<ApacheWeb>,
    {
        let mut index = Self::new();
        for web in webs {
            let web = web.borrow();
            if let Some(backend) = BackendRef::declared_by(web) {
                index.insert(backend, ObjectKey::for_resource(web));
            }
        }
        index
    }

    pub fn insert(&mut self, backend: BackendRef, key: ObjectKey) {
        self.entries.entry(backend).or_default().insert(key);
    }

    /// Drop `key` from every backend it was indexed under
    pub fn remove(&mut self, key: &ObjectKey) {
        self.entries.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// ApacheWebs depending on `backend`, in key order
    pub fn query(&self, backend: &BackendRef) -> Vec<ObjectKey> {
        self.entries
            .get(backend)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A change notification the controller reacts to
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// A child of this ApacheWeb changed
    SpecChanged(ObjectKey),
    /// An EndpointSlice changed
    DiscoveryChanged {
        namespace: Option<String>,
        labels: BTreeMap<String, String>,
    },
}

impl WatchEvent {
    /// Event for a changed child, `None` unless an ApacheWeb controls it
    pub fn child_changed<K: ResourceExt>(child: &K) -> Option<Self> {
        let owner = child.owner_references().iter().find(|owner| {
            owner.controller == Some(true)
                && owner.kind == ApacheWeb::kind(&())
                && owner.api_version == ApacheWeb::api_version(&())
        })?;

        Some(WatchEvent::SpecChanged(ObjectKey::new(
            child.namespace().unwrap_or_else(|| "default".to_string()),
            owner.name.clone(),
        )))
    }

    pub fn discovery(slice: &EndpointSlice) -> Self {
        WatchEvent::DiscoveryChanged {
            namespace: slice.namespace(),
            labels: slice.labels().clone(),
        }
    }
}

/// Resolve the ApacheWebs affected by a change to an EndpointSlice.
///
/// Slices without the service-name label, or for Services nobody declared as
/// a backend, resolve to nothing.
pub fn resolve_affected(
    index: &SecondaryIndex,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> Vec<ObjectKey> {
    let Some(service) = labels.get(SERVICE_NAME_LABEL) else {
        return Vec::new();
    };
    let backend = BackendRef::new(namespace.unwrap_or("default"), service.as_str());
    index.query(&backend)
}

/// Point-in-time view of the live ApacheWebs
pub trait SpecSource: Send + Sync {
    fn snapshot(&self) -> Vec<Arc<ApacheWeb>>;
}

impl SpecSource for Store<ApacheWeb> {
    fn snapshot(&self) -> Vec<Arc<ApacheWeb>> {
        self.state()
    }
}

impl SpecSource for Vec<Arc<ApacheWeb>> {
    fn snapshot(&self) -> Vec<Arc<ApacheWeb>> {
        self.clone()
    }
}

/// Maps watch events to the ApacheWeb keys that must be reconciled
#[derive(Clone)]
pub struct EventRouter<S> {
    specs: S,
}

impl<S: SpecSource> EventRouter<S> {
    pub fn new(specs: S) -> Self {
        Self { specs }
    }

    pub fn route(&self, event: WatchEvent) -> Vec<ObjectRef<ApacheWeb>> {
        let keys = match event {
            WatchEvent::SpecChanged(key) => vec![key],
            WatchEvent::DiscoveryChanged { namespace, labels } => {
                let index = SecondaryIndex::rebuild(self.specs.snapshot());
                let affected = resolve_affected(&index, namespace.as_deref(), &labels);
                debug!(
                    service = labels.get(SERVICE_NAME_LABEL).map(String::as_str).unwrap_or_default(),
                    namespace = namespace.as_deref().unwrap_or_default(),
                    affected_count = affected.len(),
                    "Routing EndpointSlice change"
                );
                affected
            }
        };
        keys.iter().map(ObjectKey::object_ref).collect()
    }
}
