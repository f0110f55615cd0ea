//! Resolution of a live address for an infrastructure's services
//!
//! Cluster-internal services have an address as soon as they exist.
//! Load-balanced services get theirs asynchronously, and the platform gives
//! no completion signal, so the resolver polls until one shows up or the
//! configured deadline passes.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ObiError, Result};
use crate::graph::{ResourceGraph, Role};
use crate::platform::{self, Platform};

/// How long and how often to wait for an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(p) if p.eq_ignore_ascii_case("UDP") => Protocol::Udp,
            _ => Protocol::Tcp,
        }
    }
}

/// A reachable address; host is never empty and port never zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Address of a service if it has one yet
///
/// Load balancers report their ingress IP or hostname; every other type is
/// addressed through its cluster IP.
pub fn service_address(service: &Service) -> Option<Endpoint> {
    let spec = service.spec.as_ref()?;
    let port = spec.ports.as_ref()?.first()?;
    let port_number = u16::try_from(port.port).ok().filter(|p| *p > 0)?;
    let protocol = Protocol::parse(port.protocol.as_deref());

    let host = if spec.type_.as_deref() == Some("LoadBalancer") {
        let ingress = service
            .status
            .as_ref()?
            .load_balancer
            .as_ref()?
            .ingress
            .as_ref()?
            .first()?;
        ingress.ip.clone().or_else(|| ingress.hostname.clone())?
    } else {
        spec.cluster_ip.clone().filter(|ip| ip != "None")?
    };

    if host.trim().is_empty() {
        return None;
    }

    Some(Endpoint {
        host,
        port: port_number,
        protocol,
    })
}

pub struct ConnectionResolver<'a, P: ?Sized> {
    platform: &'a P,
    poll: PollConfig,
}

impl<'a, P: Platform + ?Sized> ConnectionResolver<'a, P> {
    pub fn new(platform: &'a P, poll: PollConfig) -> Self {
        Self { platform, poll }
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    /// Master address of the named infrastructure
    pub async fn resolve(&self, namespace: &str, name: &str) -> Result<Endpoint> {
        self.resolve_role(namespace, name, Role::MasterService).await
    }

    /// Address of the service that fills `role` in the named infrastructure
    pub async fn resolve_role(&self, namespace: &str, name: &str, role: Role) -> Result<Endpoint> {
        let master = platform::read::<Deployment, _>(self.platform, namespace, name)
            .await?
            .ok_or_else(|| ObiError::InfrastructureNotFound {
                name: name.to_string(),
            })?;

        self.resolve_workload_role(namespace, &master, role).await
    }

    /// Master address for an already fetched master workload
    pub async fn resolve_workload(&self, namespace: &str, master: &Deployment) -> Result<Endpoint> {
        self.resolve_workload_role(namespace, master, Role::MasterService)
            .await
    }

    async fn resolve_workload_role(
        &self,
        namespace: &str,
        master: &Deployment,
        role: Role,
    ) -> Result<Endpoint> {
        let graph = ResourceGraph::from_workload(master);
        let service = graph
            .get(role)
            .ok_or_else(|| ObiError::ServiceUnreachable {
                service: master.metadata.name.clone().unwrap_or_default(),
                reason: format!("workload has no {} annotation", role.annotation_key()),
            })?;

        let endpoint = self.wait_for_address(namespace, service).await?;
        info!(%namespace, service = %service, endpoint = %endpoint, "Resolved service address");
        Ok(endpoint)
    }

    /// Current address of a service, without waiting
    pub async fn current_address(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<Endpoint>> {
        let svc = self.read_service(namespace, service).await?;
        Ok(service_address(&svc))
    }

    /// Poll a service until it has an address
    pub async fn wait_for_address(&self, namespace: &str, service: &str) -> Result<Endpoint> {
        match self.poll.timeout {
            Some(limit) => tokio::time::timeout(limit, self.poll_address(namespace, service))
                .await
                .map_err(|_| ObiError::Timeout {
                    service: service.to_string(),
                    waited: limit,
                })?,
            None => self.poll_address(namespace, service).await,
        }
    }

    async fn poll_address(&self, namespace: &str, service: &str) -> Result<Endpoint> {
        loop {
            let svc = self.read_service(namespace, service).await?;
            if let Some(endpoint) = service_address(&svc) {
                return Ok(endpoint);
            }
            debug!(
                %namespace,
                service = %service,
                retry_in_secs = self.poll.interval.as_secs_f64(),
                "Waiting for service address"
            );
            tokio::time::sleep(self.poll.interval).await;
        }
    }

    async fn read_service(&self, namespace: &str, service: &str) -> Result<Service> {
        match platform::read::<Service, _>(self.platform, namespace, service).await {
            Ok(Some(svc)) => Ok(svc),
            Ok(None) => Err(ObiError::ServiceUnreachable {
                service: service.to_string(),
                reason: "service does not exist".to_string(),
            }),
            Err(e) => Err(ObiError::ServiceUnreachable {
                service: service.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::manifests;
    use crate::platform::{InMemoryPlatform, ResourceStore};
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn fast_poll(timeout: Option<Duration>) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            timeout,
        }
    }

    fn master_with_service(name: &str, service: &str) -> Deployment {
        let annotations: BTreeMap<String, String> =
            [("master-service-name".to_string(), service.to_string())].into();
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_service_address_prefers_ingress() {
        let mut svc = manifests::service("svc", "sel", 8081, Protocol::Tcp, true, BTreeMap::new());
        assert!(service_address(&svc).is_none());

        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    hostname: Some("lb.example.com".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        let endpoint = service_address(&svc).unwrap();
        assert_eq!(endpoint.host, "lb.example.com");
        assert_eq!(endpoint.port, 8081);
        assert_eq!(endpoint.to_string(), "lb.example.com:8081");
    }

    #[test]
    fn test_service_address_rejects_headless() {
        let mut svc =
            manifests::service("svc", "sel", 50051, Protocol::Tcp, false, BTreeMap::new());
        svc.spec.as_mut().unwrap().cluster_ip = Some("None".to_string());
        assert!(service_address(&svc).is_none());

        svc.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.7".to_string());
        assert_eq!(service_address(&svc).unwrap().host, "10.0.0.7");
    }

    #[tokio::test]
    async fn test_resolve_polls_until_ingress() {
        let platform = InMemoryPlatform::with_ingress_delay(3);
        let svc = manifests::service("m-svc", "sel", 8081, Protocol::Tcp, true, BTreeMap::new());
        ResourceStore::<Service>::create(&platform, "ns", &svc).await.unwrap();
        let master = master_with_service("infra1", "m-svc");
        ResourceStore::<Deployment>::create(&platform, "ns", &master)
            .await
            .unwrap();

        let resolver = ConnectionResolver::new(&platform, fast_poll(Some(Duration::from_secs(5))));
        let endpoint = resolver.resolve("ns", "infra1").await.unwrap();
        assert!(!endpoint.host.is_empty());
        assert_eq!(endpoint.port, 8081);
    }

    #[tokio::test]
    async fn test_resolve_unknown_infrastructure() {
        let platform = InMemoryPlatform::new();
        let resolver = ConnectionResolver::new(&platform, fast_poll(None));
        let err = resolver.resolve("ns", "missing").await.unwrap_err();
        assert!(matches!(err, ObiError::InfrastructureNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_missing_service_is_unreachable() {
        let platform = InMemoryPlatform::new();
        ResourceStore::<Deployment>::create(&platform, "ns", &master_with_service("infra1", "gone"))
            .await
            .unwrap();

        let resolver = ConnectionResolver::new(&platform, fast_poll(None));
        let err = resolver.resolve("ns", "infra1").await.unwrap_err();
        assert!(matches!(err, ObiError::ServiceUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let platform = InMemoryPlatform::with_ingress_delay(usize::MAX);
        let svc = manifests::service("m-svc", "sel", 8081, Protocol::Tcp, true, BTreeMap::new());
        ResourceStore::<Service>::create(&platform, "ns", &svc).await.unwrap();

        let poll = fast_poll(Some(Duration::from_millis(30)));
        let resolver = ConnectionResolver::new(&platform, poll);
        let err = resolver.wait_for_address("ns", "m-svc").await.unwrap_err();
        assert!(matches!(err, ObiError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_internal_service_resolves_immediately() {
        let platform = InMemoryPlatform::with_ingress_delay(usize::MAX);
        let svc = manifests::service("p-svc", "sel", 50051, Protocol::Tcp, false, BTreeMap::new());
        ResourceStore::<Service>::create(&platform, "ns", &svc).await.unwrap();

        let poll = fast_poll(Some(Duration::from_millis(30)));
        let resolver = ConnectionResolver::new(&platform, poll);
        let endpoint = resolver.wait_for_address("ns", "p-svc").await.unwrap();
        assert!(endpoint.host.starts_with("10.96."));
        assert_eq!(endpoint.port, 50051);
    }

    #[tokio::test]
    async fn test_resolve_role_reads_its_own_annotation() {
        let platform = InMemoryPlatform::new();
        let svc = manifests::service("a-svc", "sel", 8083, Protocol::Tcp, false, BTreeMap::new());
        ResourceStore::<Service>::create(&platform, "ns", &svc).await.unwrap();
        let mut master = master_with_service("infra1", "m-svc");
        master
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert("api-service-name".to_string(), "a-svc".to_string());
        ResourceStore::<Deployment>::create(&platform, "ns", &master)
            .await
            .unwrap();

        let resolver = ConnectionResolver::new(&platform, fast_poll(None));
        let endpoint = resolver
            .resolve_role("ns", "infra1", Role::ApiService)
            .await
            .unwrap();
        assert_eq!(endpoint.port, 8083);

        let err = resolver
            .resolve_role("ns", "infra1", Role::PredictorService)
            .await
            .unwrap_err();
        assert!(matches!(err, ObiError::ServiceUnreachable { ref reason, .. }
            if reason.contains("predictor-service-name")));
    }
}
