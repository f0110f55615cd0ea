//! Resource graph of an infrastructure
//!
//! The platform has no place to keep relationships between objects other
//! than the objects themselves, so the graph is an adjacency map from
//! logical role to object names, serialized once into the annotations of the
//! owning workload. The master workload owns the top level; the predictor
//! workload owns its own credential and configuration objects.
//!
//! The graph is never patched in place: it is built in memory, stamped at
//! creation, and rebuilt from annotations whenever it is needed.

mod builder;
pub mod manifests;

use k8s_openapi::api::apps::v1::Deployment;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub use builder::{CreatedInfrastructure, InfrastructureBuilder};

/// Annotation carrying the creation time of an infrastructure
pub const CREATED_AT_ANNOTATION: &str = "obi/created-at";

/// Label present on every object the control plane creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "obi";
/// Label naming the infrastructure an object belongs to
pub const INFRASTRUCTURE_LABEL: &str = "obi/infrastructure";
/// Label naming the component an object belongs to
pub const COMPONENT_LABEL: &str = "obi/component";
/// Pod selector key
pub const SELECTOR_LABEL: &str = "app";

/// Selector matching every master workload
pub fn master_selector() -> String {
    format!("{}={}", COMPONENT_LABEL, Component::Master.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Master,
    Predictor,
    Api,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Master => "master",
            Component::Predictor => "predictor",
            Component::Api => "api",
        }
    }
}

/// Logical role of a child object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    MasterService,
    HeartbeatService,
    PredictorService,
    PredictorWorkload,
    ApiService,
    ApiWorkload,
    Secrets,
    ConfigMap,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::MasterService,
        Role::HeartbeatService,
        Role::PredictorService,
        Role::PredictorWorkload,
        Role::ApiService,
        Role::ApiWorkload,
        Role::Secrets,
        Role::ConfigMap,
    ];

    pub fn annotation_key(&self) -> &'static str {
        match self {
            Role::MasterService => "master-service-name",
            Role::HeartbeatService => "heartbeat-service-name",
            Role::PredictorService => "predictor-service-name",
            Role::PredictorWorkload => "predictor-deployment-name",
            Role::ApiService => "api-service-name",
            Role::ApiWorkload => "api-deployment-name",
            Role::Secrets => "secret-names",
            Role::ConfigMap => "config-map-name",
        }
    }

    /// Roles whose annotation holds a comma-separated list
    fn is_multi(&self) -> bool {
        matches!(self, Role::Secrets)
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Role::MasterService
            | Role::HeartbeatService
            | Role::PredictorService
            | Role::ApiService => ObjectKind::Service,
            Role::PredictorWorkload | Role::ApiWorkload => ObjectKind::Workload,
            Role::Secrets => ObjectKind::Secret,
            Role::ConfigMap => ObjectKind::ConfigMap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ObjectKind {
    Workload,
    Service,
    Secret,
    ConfigMap,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjectKind::Workload => "Deployment",
            ObjectKind::Service => "Service",
            ObjectKind::Secret => "Secret",
            ObjectKind::ConfigMap => "ConfigMap",
        };
        f.write_str(name)
    }
}

/// Role -> object names owned by one workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceGraph {
    edges: BTreeMap<Role, Vec<String>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: Role, name: impl Into<String>) {
        let name = name.into();
        let names = self.edges.entry(role).or_default();
        if role.is_multi() {
            if !names.contains(&name) {
                names.push(name);
            }
        } else {
            *names = vec![name];
        }
    }

    pub fn with(mut self, role: Role, name: impl Into<String>) -> Self {
        self.insert(role, name);
        self
    }

    /// Single name recorded for `role`
    pub fn get(&self, role: Role) -> Option<&str> {
        self.edges
            .get(&role)
            .and_then(|names| names.first())
            .map(String::as_str)
    }

    /// Every name recorded for `role`
    pub fn names(&self, role: Role) -> &[String] {
        self.edges.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.edges.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &str)> {
        self.edges
            .iter()
            .flat_map(|(role, names)| names.iter().map(move |n| (*role, n.as_str())))
    }

    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        self.edges
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(role, names)| (role.annotation_key().to_string(), names.join(",")))
            .collect()
    }

    /// Rebuild from annotations; unrelated annotations are ignored
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let mut graph = Self::new();
        for role in Role::ALL {
            let Some(value) = annotations.get(role.annotation_key()) else {
                continue;
            };
            for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                graph.insert(role, name);
            }
        }
        graph
    }

    pub fn from_workload(workload: &Deployment) -> Self {
        workload
            .metadata
            .annotations
            .as_ref()
            .map(Self::from_annotations)
            .unwrap_or_default()
    }
}

/// Every object of an infrastructure, grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectSet {
    pub workloads: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub secrets: BTreeSet<String>,
    pub config_maps: BTreeSet<String>,
}

impl ObjectSet {
    /// Objects reachable from the master graph and, one hop further, the
    /// predictor's own graph. The master workload itself is not included.
    pub fn collect(master: &ResourceGraph, predictor: Option<&ResourceGraph>) -> Self {
        let mut set = Self::default();
        set.add_graph(master);
        if let Some(predictor) = predictor {
            set.add_graph(predictor);
        }
        set
    }

    fn add_graph(&mut self, graph: &ResourceGraph) {
        for (role, name) in graph.iter() {
            let bucket = match role.kind() {
                ObjectKind::Workload => &mut self.workloads,
                ObjectKind::Service => &mut self.services,
                ObjectKind::Secret => &mut self.secrets,
                ObjectKind::ConfigMap => &mut self.config_maps,
            };
            bucket.insert(name.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.workloads.len() + self.services.len() + self.secrets.len() + self.config_maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn master_graph() -> ResourceGraph {
        ResourceGraph::new()
            .with(Role::MasterService, "m-svc")
            .with(Role::HeartbeatService, "hb-svc")
            .with(Role::PredictorService, "p-svc")
            .with(Role::PredictorWorkload, "p-dep")
            .with(Role::ApiService, "api-svc")
            .with(Role::ApiWorkload, "api-dep")
            .with(Role::Secrets, "compute-creds")
            .with(Role::Secrets, "storage-creds")
            .with(Role::ConfigMap, "shared-cfg")
    }

    #[test]
    fn test_annotations_round_trip() {
        let graph = master_graph();
        let annotations = graph.to_annotations();

        assert_eq!(annotations["master-service-name"], "m-svc");
        assert_eq!(annotations["secret-names"], "compute-creds,storage-creds");
        assert_eq!(ResourceGraph::from_annotations(&annotations), graph);
    }

    #[test]
    fn test_single_roles_keep_last_name() {
        let graph = ResourceGraph::new()
            .with(Role::ConfigMap, "first")
            .with(Role::ConfigMap, "second");
        assert_eq!(graph.names(Role::ConfigMap), ["second".to_string()]);
    }

    #[test]
    fn test_unrelated_annotations_ignored() {
        let mut annotations = master_graph().to_annotations();
        annotations.insert(CREATED_AT_ANNOTATION.to_string(), "2024-01-01T00:00:00Z".into());
        annotations.insert("deployment.kubernetes.io/revision".into(), "1".into());

        assert_eq!(ResourceGraph::from_annotations(&annotations), master_graph());
    }

    #[test]
    fn test_from_workload_without_annotations() {
        let workload = Deployment {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ResourceGraph::from_workload(&workload).is_empty());
    }

    #[test]
    fn test_object_set_includes_predictor_hop() {
        let predictor = ResourceGraph::new()
            .with(Role::Secrets, "predictor-creds")
            .with(Role::ConfigMap, "predictor-cfg");
        let set = ObjectSet::collect(&master_graph(), Some(&predictor));

        assert_eq!(set.workloads.len(), 2);
        assert_eq!(set.services.len(), 4);
        assert!(set.secrets.contains("predictor-creds"));
        assert_eq!(set.secrets.len(), 3);
        assert_eq!(set.config_maps.len(), 2);
        assert_eq!(set.len(), 11);
    }
}
