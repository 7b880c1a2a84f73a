//! Change gating
//!
//! Every applying pass stamps each child with the inputs it was rendered from.
//! A later pass whose inputs match the stamp on all children writes nothing,
//! which keeps our own patches from re-triggering the controller. A pass cut
//! short after the ConfigMap leaves the later children with the old stamp, so
//! the next pass applies again.

use std::collections::BTreeMap;
use std::fmt;

use kube::ResourceExt;

/// Child annotation holding the EndpointSlice revision
pub const ENDPOINT_SLICE_VERSION_ANNOTATION: &str = "apacheweb.arsenal.dev/endpoint-slice-version";

/// Child annotation holding the ApacheWeb generation
pub const GENERATION_ANNOTATION: &str = "apacheweb.arsenal.dev/generation";

/// Inputs a rendered configuration was derived from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fingerprint {
    /// EndpointSlice revision, empty for standalone servers
    pub discovery_revision: String,
    /// metadata.generation of the ApacheWeb
    pub generation: i64,
}

impl Fingerprint {
    pub fn new(discovery_revision: impl Into<String>, generation: i64) -> Self {
        Self {
            discovery_revision: discovery_revision.into(),
            generation,
        }
    }

    /// Annotations recording this fingerprint
    pub fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                ENDPOINT_SLICE_VERSION_ANNOTATION.to_string(),
                self.discovery_revision.clone(),
            ),
            (GENERATION_ANNOTATION.to_string(), self.generation.to_string()),
        ])
    }

    /// Read the fingerprint stamped on a child.
    ///
    /// Missing or unparsable annotations yield `None`, which never gates.
    pub fn recorded_on<K: ResourceExt>(child: &K) -> Option<Self> {
        let annotations = child.annotations();
        let generation = annotations.get(GENERATION_ANNOTATION)?.parse().ok()?;
        let discovery_revision = annotations.get(ENDPOINT_SLICE_VERSION_ANNOTATION)?.clone();
        Some(Self {
            discovery_revision,
            generation,
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.discovery_revision.is_empty() {
            write!(f, "g{}", self.generation)
        } else {
            write!(f, "g{}-r{}", self.generation, self.discovery_revision)
        }
    }
}

/// Whether the previously applied state already matches `next`
pub fn should_skip(previous: Option<&Fingerprint>, next: &Fingerprint) -> bool {
    previous == Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(annotations: Option<BTreeMap<String, String>>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn annotations_round_trip_through_config_map() {
        let fp = Fingerprint::new("4711", 3);
        let cm = config_map(Some(fp.annotations()));
        assert_eq!(Fingerprint::recorded_on(&cm), Some(fp));
    }

    #[test]
    fn skip_only_on_equal_fingerprints() {
        let applied = Fingerprint::new("4711", 3);

        assert!(should_skip(Some(&applied), &Fingerprint::new("4711", 3)));
        assert!(!should_skip(Some(&applied), &Fingerprint::new("4712", 3)));
        assert!(!should_skip(Some(&applied), &Fingerprint::new("4711", 4)));
        assert!(!should_skip(None, &applied));
    }

    #[test]
    fn unannotated_config_map_has_no_fingerprint() {
        assert_eq!(Fingerprint::recorded_on(&config_map(None)), None);

        let garbled = BTreeMap::from([
            (GENERATION_ANNOTATION.to_string(), "three".to_string()),
            (ENDPOINT_SLICE_VERSION_ANNOTATION.to_string(), "1".to_string()),
        ]);
        assert_eq!(Fingerprint::recorded_on(&config_map(Some(garbled))), None);
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(Fingerprint::new("", 2).to_string(), "g2");
        assert_eq!(Fingerprint::new("10,11", 2).to_string(), "g2-r10,11");
    }
}
