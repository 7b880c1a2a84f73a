//! Desired state rendering
//!
//! Turns an ApacheWeb and the endpoints observed for it into the children
//! that should exist: a ConfigMap with the rendered httpd.conf, a Deployment
//! mounting it and a Service in front of the pods. Rendering is pure. Equal
//! inputs produce byte-identical configuration text and equal descriptors.

mod resources;
mod templates;

pub use resources::{CONFIG_KEY, CONFIG_VERSION_ANNOTATION, IDENTITY_LABEL};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::Resource;

use crate::crd::{ApacheWeb, EndPoint, Workload};
use crate::error::{Error, Result};
use crate::gate::Fingerprint;

/// The children an ApacheWeb should have
#[derive(Clone, Debug)]
pub struct DesiredState {
    pub config_text: String,
    pub fingerprint: Fingerprint,
    pub config_map: ConfigMap,
    pub deployment: Deployment,
    pub service: Service,
}

/// Render the desired children of `web`.
///
/// `discovery_revision` is the revision of the EndpointSlices `endpoints`
/// were aggregated from, empty for standalone servers.
pub fn build(
    web: &ApacheWeb,
    endpoints: &[EndPoint],
    discovery_revision: &str,
    image: &str,
) -> Result<DesiredState> {
    let spec = &web.spec;

    let config_text = match spec.workload()? {
        Workload::Standalone(standalone) => {
            templates::render_standalone(spec.port, &spec.server_name, standalone)?
        }
        Workload::LoadBalanced(lb) => {
            templates::render_load_balancer(spec.port, &spec.server_name, lb, endpoints)?
        }
    };

    let owner = web
        .controller_owner_ref(&())
        .ok_or_else(|| Error::invalid_spec("ApacheWeb has no uid yet"))?;
    let fingerprint = Fingerprint::new(
        discovery_revision,
        web.metadata.generation.unwrap_or_default(),
    );

    Ok(DesiredState {
        config_map: resources::config_map(web, &owner, &config_text, &fingerprint),
        deployment: resources::deployment(web, &owner, image, &fingerprint),
        service: resources::service(web, &owner, &fingerprint),
        config_text,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApacheWebSpec, LoadBalancerSpec, StandaloneSpec, WorkloadMode};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    const IMAGE: &str = "docker.io/httpd:2.4";

    fn web(mode: WorkloadMode) -> ApacheWeb {
        ApacheWeb {
            metadata: ObjectMeta {
                name: Some("frontend".to_string()),
                namespace: Some("shop".to_string()),
                uid: Some("0b6f5c1e-1c1d-4f5e-9d3a-2f1e0c9b8a77".to_string()),
                generation: Some(2),
                ..Default::default()
            },
            spec: ApacheWebSpec {
                mode,
                replicas: 3,
                server_name: "shop.example.com".to_string(),
                port: 8080,
                standalone: Some(StandaloneSpec {
                    document_root: "/srv/www".to_string(),
                    server_admin: "ops@example.com".to_string(),
                }),
                load_balancer: None,
            },
            status: None,
        }
    }

    fn with_load_balancer(mut web: ApacheWeb) -> ApacheWeb {
        web.spec.load_balancer = Some(LoadBalancerSpec {
            backend_service_name: "svcA".to_string(),
            protocol: "https".to_string(),
            path: "/".to_string(),
            port: 9443,
        });
        web
    }

    fn endpoints() -> Vec<EndPoint> {
        ["10.0.0.1", "10.0.0.2"]
            .iter()
            .map(|ip| EndPoint {
                ip_address: ip.to_string(),
                port: 8443,
                proto: "https".to_string(),
                ready: true,
            })
            .collect()
    }

    #[test]
    fn rendering_is_deterministic() {
        let web = with_load_balancer(web(WorkloadMode::LoadBalanced));

        let first = build(&web, &endpoints(), "55", IMAGE).unwrap();
        let second = build(&web, &endpoints(), "55", IMAGE).unwrap();

        assert_eq!(first.config_text, second.config_text);
        assert_eq!(first.config_map, second.config_map);
        assert_eq!(first.deployment, second.deployment);
        assert_eq!(first.service, second.service);
    }

    #[test]
    fn replicas_are_copied_exactly() {
        let desired = build(&web(WorkloadMode::Standalone), &[], "", IMAGE).unwrap();
        let spec = desired.deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
    }

    #[test]
    fn service_port_prefers_load_balancer_payload() {
        // Both payloads populated while the mode says standalone
        let web = with_load_balancer(web(WorkloadMode::Standalone));

        let desired = build(&web, &[], "", IMAGE).unwrap();

        let ports = desired.service.spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 9443);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
        assert!(desired.config_text.contains("DocumentRoot"));
    }

    #[test]
    fn every_child_is_owned_by_the_apacheweb() {
        let desired = build(&web(WorkloadMode::Standalone), &[], "", IMAGE).unwrap();

        let owners = [
            desired.config_map.metadata.owner_references,
            desired.deployment.metadata.owner_references,
            desired.service.metadata.owner_references,
        ];
        for refs in owners {
            let refs = refs.unwrap();
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].kind, "ApacheWeb");
            assert_eq!(refs[0].name, "frontend");
            assert_eq!(refs[0].uid, "0b6f5c1e-1c1d-4f5e-9d3a-2f1e0c9b8a77");
            assert_eq!(refs[0].controller, Some(true));
        }
    }

    #[test]
    fn workload_shape_is_single_container_single_mount() {
        let desired = build(&web(WorkloadMode::Standalone), &[], "", IMAGE).unwrap();

        let deployment = desired.deployment.spec.unwrap();
        let selector = deployment.selector.match_labels.unwrap();
        assert_eq!(selector.get(IDENTITY_LABEL).map(String::as_str), Some("shop.example.com"));

        let template = deployment.template;
        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations.get(CONFIG_VERSION_ANNOTATION).map(String::as_str), Some("g2"));

        let pod = template.spec.unwrap();
        assert_eq!(pod.containers.len(), 1);
        let container = &pod.containers[0];
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
        assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 1);

        let volumes = pod.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0].config_map.as_ref().map(|c| c.name.as_str()),
            Some("frontend")
        );
    }

    #[test]
    fn every_child_carries_fingerprint() {
        let web = with_load_balancer(web(WorkloadMode::LoadBalanced));
        let desired = build(&web, &endpoints(), "55", IMAGE).unwrap();
        let expected = Some(Fingerprint::new("55", 2));

        assert_eq!(Fingerprint::recorded_on(&desired.config_map), expected);
        assert_eq!(Fingerprint::recorded_on(&desired.deployment), expected);
        assert_eq!(Fingerprint::recorded_on(&desired.service), expected);
        let data = desired.config_map.data.unwrap();
        assert_eq!(data.get(CONFIG_KEY), Some(&desired.config_text));
    }

    #[test]
    fn missing_uid_is_rejected() {
        let mut web = web(WorkloadMode::Standalone);
        web.metadata.uid = None;
        assert!(matches!(build(&web, &[], "", IMAGE), Err(Error::InvalidSpec(_))));
    }
}
