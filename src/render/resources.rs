//! Child resource descriptors

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::ApacheWeb;
use crate::gate::Fingerprint;

/// Identity label shared by every child and the pod template
pub const IDENTITY_LABEL: &str = "servername";

/// ConfigMap key holding the rendered configuration
pub const CONFIG_KEY: &str = "httpd.conf";

/// Pod template annotation that rolls the pods when the configuration changes
pub const CONFIG_VERSION_ANNOTATION: &str = "apacheweb.arsenal.dev/config-version";

const CONTAINER_NAME: &str = "httpd";
const CONFIG_VOLUME: &str = "httpd-conf";
const CONFIG_MOUNT_PATH: &str = "/usr/local/apache2/conf/httpd.conf";

pub(super) fn identity_labels(web: &ApacheWeb) -> BTreeMap<String, String> {
    BTreeMap::from([(IDENTITY_LABEL.to_string(), web.spec.server_name.clone())])
}

/// Metadata shared by all children, stamped with the fingerprint they were rendered from
fn child_metadata(web: &ApacheWeb, owner: &OwnerReference, fingerprint: &Fingerprint) -> ObjectMeta {
    ObjectMeta {
        name: Some(web.name_any()),
        namespace: web.namespace(),
        labels: Some(identity_labels(web)),
        annotations: Some(fingerprint.annotations()),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

pub(super) fn config_map(
    web: &ApacheWeb,
    owner: &OwnerReference,
    config_text: &str,
    fingerprint: &Fingerprint,
) -> ConfigMap {
    ConfigMap {
        metadata: child_metadata(web, owner, fingerprint),
        data: Some(BTreeMap::from([(
            CONFIG_KEY.to_string(),
            config_text.to_string(),
        )])),
        ..Default::default()
    }
}

pub(super) fn deployment(
    web: &ApacheWeb,
    owner: &OwnerReference,
    image: &str,
    fingerprint: &Fingerprint,
) -> Deployment {
    let labels = identity_labels(web);

    Deployment {
        metadata: child_metadata(web, owner, fingerprint),
        spec: Some(DeploymentSpec {
            replicas: Some(web.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_VERSION_ANNOTATION.to_string(),
                        fingerprint.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            container_port: web.spec.port,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: CONFIG_VOLUME.to_string(),
                            mount_path: CONFIG_MOUNT_PATH.to_string(),
                            sub_path: Some(CONFIG_KEY.to_string()),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: web.name_any(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn service(
    web: &ApacheWeb,
    owner: &OwnerReference,
    fingerprint: &Fingerprint,
) -> Service {
    Service {
        metadata: child_metadata(web, owner, fingerprint),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: web.spec.service_port(),
                target_port: Some(IntOrString::Int(web.spec.port)),
                ..Default::default()
            }]),
            selector: Some(identity_labels(web)),
            ..Default::default()
        }),
        ..Default::default()
    }
}
