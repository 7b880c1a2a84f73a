//! Backend endpoint aggregation
//!
//! Flattens the EndpointSlices of a backend Service into the list of
//! `proto://ip:port` members the load balancer configuration is rendered from.

use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::ResourceExt;

use crate::crd::EndPoint;

/// Label the EndpointSlice controller puts on every slice of a Service
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Backends of one Service, plus the revision of the slices they came from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatedEndpoints {
    pub endpoints: Vec<EndPoint>,
    /// resourceVersion of each selected slice, in selection order, joined by `,`
    pub version: String,
}

/// Aggregate the endpoints of `backend_service_name` from `slices`.
///
/// Only slices labeled for the backend are used. For each one, every
/// non-empty address is paired with every port that has a value. Ordering
/// follows the slices, then endpoints, then addresses, then ports, so equal
/// discovery data always yields an equal list.
pub fn aggregate(
    backend_service_name: &str,
    protocol: &str,
    slices: &[EndpointSlice],
) -> AggregatedEndpoints {
    let mut endpoints = Vec::new();
    let mut versions = Vec::new();

    for slice in slices
        .iter()
        .filter(|s| serves_backend(s, backend_service_name))
    {
        versions.push(slice.resource_version().unwrap_or_default());

        let ports: Vec<i32> = slice
            .ports
            .iter()
            .flatten()
            .filter_map(|p| p.port)
            .collect();

        for endpoint in &slice.endpoints {
            // A missing ready condition means unknown, which consumers treat as ready
            let ready = endpoint
                .conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true);

            for address in endpoint.addresses.iter().filter(|a| !a.is_empty()) {
                for port in &ports {
                    endpoints.push(EndPoint {
                        ip_address: address.clone(),
                        port: *port,
                        proto: protocol.to_string(),
                        ready,
                    });
                }
            }
        }
    }

    AggregatedEndpoints {
        endpoints,
        version: versions.join(","),
    }
}

/// Whether a slice belongs to the named Service
pub fn serves_backend(slice: &EndpointSlice, backend_service_name: &str) -> bool {
    slice
        .labels()
        .get(SERVICE_NAME_LABEL)
        .is_some_and(|name| name == backend_service_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn slice(service: &str, version: &str, endpoints: Vec<Endpoint>, ports: &[Option<i32>]) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(format!("{}-abcde", service)),
                namespace: Some("default".to_string()),
                labels: Some([(SERVICE_NAME_LABEL.to_string(), service.to_string())].into()),
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints,
            ports: Some(
                ports
                    .iter()
                    .map(|p| EndpointPort {
                        port: *p,
                        ..Default::default()
                    })
                    .collect(),
            ),
        }
    }

    fn endpoint(addresses: &[&str], ready: Option<bool>) -> Endpoint {
        Endpoint {
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            conditions: Some(EndpointConditions {
                ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn two_addresses_two_ports_yield_four_endpoints_address_major() {
        let slices = vec![slice(
            "svcA",
            "101",
            vec![endpoint(&["1.1.1.1", "2.2.2.2"], Some(true))],
            &[Some(8443), Some(9443)],
        )];

        let result = aggregate("svcA", "https", &slices);

        let pairs: Vec<(&str, i32)> = result
            .endpoints
            .iter()
            .map(|e| (e.ip_address.as_str(), e.port))
            .collect();
        assert_eq!(
            pairs,
            vec![("1.1.1.1", 8443), ("1.1.1.1", 9443), ("2.2.2.2", 8443), ("2.2.2.2", 9443)]
        );
        assert!(result.endpoints.iter().all(|e| e.proto == "https" && e.ready));
        assert_eq!(result.version, "101");
    }

    #[test]
    fn skips_empty_addresses_and_undefined_ports() {
        let slices = vec![slice(
            "svcA",
            "7",
            vec![endpoint(&["", "10.0.0.5"], Some(false))],
            &[None, Some(80)],
        )];

        let result = aggregate("svcA", "http", &slices);

        assert_eq!(
            result.endpoints,
            vec![EndPoint {
                ip_address: "10.0.0.5".to_string(),
                port: 80,
                proto: "http".to_string(),
                ready: false,
            }]
        );
    }

    #[test]
    fn ignores_slices_of_other_services() {
        let slices = vec![
            slice("other", "1", vec![endpoint(&["9.9.9.9"], Some(true))], &[Some(80)]),
            slice("svcA", "2", vec![endpoint(&["1.1.1.1"], None)], &[Some(80)]),
        ];

        let result = aggregate("svcA", "http", &slices);

        assert_eq!(result.endpoints.len(), 1);
        assert_eq!(result.endpoints[0].ip_address, "1.1.1.1");
        assert!(result.endpoints[0].ready);
        assert_eq!(result.version, "2");
    }

    #[test]
    fn version_covers_every_selected_slice() {
        let slices = vec![
            slice("svcA", "10", vec![endpoint(&["1.1.1.1"], Some(true))], &[Some(80)]),
            slice("svcA", "11", vec![endpoint(&["2.2.2.2"], Some(true))], &[Some(80)]),
        ];

        let result = aggregate("svcA", "http", &slices);

        assert_eq!(result.endpoints.len(), 2);
        assert_eq!(result.version, "10,11");
    }

    #[test]
    fn no_matching_slice_is_empty() {
        let result = aggregate("svcA", "http", &[]);
        assert!(result.endpoints.is_empty());
        assert!(result.version.is_empty());
    }
}
