//! Identity of a reconciled ApacheWeb

use std::fmt;

use kube::{runtime::reflector::ObjectRef, ResourceExt};

use crate::crd::ApacheWeb;

/// Namespace and name of an ApacheWeb.
///
/// Children share the same key: the ConfigMap, Deployment and Service are
/// named after the ApacheWeb that owns them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, falling back to the `default` namespace
    pub fn for_resource<K: ResourceExt>(obj: &K) -> Self {
        Self::new(
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }

    /// Controller queue reference for this key
    pub fn object_ref(&self) -> ObjectRef<ApacheWeb> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }
}

impl From<&ObjectRef<ApacheWeb>> for ObjectKey {
    fn from(obj_ref: &ObjectRef<ApacheWeb>) -> Self {
        Self::new(
            obj_ref.namespace.clone().unwrap_or_else(|| "default".to_string()),
            obj_ref.name.clone(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
