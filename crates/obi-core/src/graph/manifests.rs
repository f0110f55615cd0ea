//! Object manifests for the pieces of an infrastructure

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, ExecAction,
    Lifecycle, LifecycleHandler, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource,
    SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;

use super::{
    Component, COMPONENT_LABEL, INFRASTRUCTURE_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    SELECTOR_LABEL,
};
use crate::config::{DatabaseConfig, SchedulingLevel};
use crate::resolver::Protocol;

/// Key of the configuration document inside the shared configuration object
pub const CONFIG_KEY: &str = "config.json";
/// Key of the service account inside a credential object
pub const CREDENTIALS_KEY: &str = "credentials.json";

pub const CONFIG_MOUNT_PATH: &str = "/etc/obi/config";
pub const CREDENTIALS_MOUNT_PATH: &str = "/etc/obi/credentials";
pub const BUCKET_MOUNT_PATH: &str = "/mnt/bucket";

/// Labels shared by every object of one component
pub fn labels(infrastructure: &str, component: Component) -> BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL, MANAGED_BY_VALUE),
        (INFRASTRUCTURE_LABEL, infrastructure),
        (COMPONENT_LABEL, component.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn meta(name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Network endpoint routing `port` to pods labelled `app=<selector>`
pub fn service(
    name: &str,
    selector: &str,
    port: u16,
    protocol: Protocol,
    external: bool,
    labels: BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: meta(name, labels),
        spec: Some(ServiceSpec {
            type_: Some(if external { "LoadBalancer" } else { "ClusterIP" }.to_string()),
            selector: Some([(SELECTOR_LABEL.to_string(), selector.to_string())].into()),
            ports: Some(vec![ServicePort {
                name: Some(protocol.as_str().to_lowercase()),
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                protocol: Some(protocol.as_str().to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service account file contents as the platform's secret decoding expects
/// them: line breaks removed
pub fn sanitize_credentials(raw: &str) -> String {
    raw.replace("\r\n", "").replace(['\n', '\r'], "")
}

pub fn credential_secret(name: &str, content: &str, labels: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: meta(name, labels),
        type_: Some("Opaque".to_string()),
        data: Some(
            [(
                CREDENTIALS_KEY.to_string(),
                ByteString(sanitize_credentials(content).into_bytes()),
            )]
            .into(),
        ),
        ..Default::default()
    }
}

pub fn config_map(
    name: &str,
    data: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: meta(name, labels),
        data: if data.is_empty() { None } else { Some(data) },
        ..Default::default()
    }
}

/// Document the master reads through `CONFIG_PATH`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterConfig {
    pub heartbeat_host: String,
    pub heartbeat_port: u16,
    pub project_id: String,
    pub region: String,
    pub zone: String,
    pub scheduling_levels: Vec<SchedulingLevel>,
    pub priority_map: BTreeMap<String, i32>,
    pub autoscaling_factor_one_job_one_cluster: f32,
    #[serde(rename = "autoscalingFactorOneJobOneClusterHP")]
    pub autoscaling_factor_one_job_one_cluster_hp: f32,
    pub predictor_host: String,
    pub predictor_port: u16,
    pub master_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
}

/// Bucket mounted into a workload by a privileged start/stop hook
#[derive(Debug, Clone)]
pub struct BucketMount {
    pub bucket: String,
    /// Credential object holding the storage service account
    pub secret: String,
}

/// Everything needed to render one workload
#[derive(Debug, Clone)]
pub struct WorkloadManifest {
    pub name: String,
    pub selector: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<(u16, Protocol)>,
    pub config_map: Option<String>,
    pub secrets: Vec<String>,
    pub env: Vec<(String, String)>,
    pub bucket_mount: Option<BucketMount>,
}

impl WorkloadManifest {
    pub fn new(name: &str, selector: &str, image: &str, labels: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            image: image.to_string(),
            labels,
            annotations: BTreeMap::new(),
            ports: Vec::new(),
            config_map: None,
            secrets: Vec::new(),
            env: Vec::new(),
            bucket_mount: None,
        }
    }

    pub fn port(mut self, port: u16, protocol: Protocol) -> Self {
        self.ports.push((port, protocol));
        self
    }

    pub fn config_map(mut self, name: &str) -> Self {
        self.config_map = Some(name.to_string());
        self
    }

    pub fn secret(mut self, name: &str) -> Self {
        if !self.secrets.iter().any(|s| s == name) {
            self.secrets.push(name.to_string());
        }
        self
    }

    pub fn env(mut self, name: &str, value: impl Into<String>) -> Self {
        self.env.push((name.to_string(), value.into()));
        self
    }

    pub fn annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations.extend(annotations);
        self
    }

    pub fn bucket_mount(mut self, mount: BucketMount) -> Self {
        self = self.secret(&mount.secret);
        self.bucket_mount = Some(mount);
        self
    }

    pub fn render(&self) -> Deployment {
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        let mut env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        if let Some(config_map) = &self.config_map {
            volumes.push(Volume {
                name: "config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(config_map.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: "config".to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            });
            env.push(EnvVar {
                name: "CONFIG_PATH".to_string(),
                value: Some(format!("{}/{}", CONFIG_MOUNT_PATH, CONFIG_KEY)),
                ..Default::default()
            });
        }

        for (index, secret) in self.secrets.iter().enumerate() {
            let volume = format!("credentials-{}", index);
            volumes.push(Volume {
                name: volume.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: volume,
                mount_path: format!("{}/{}", CREDENTIALS_MOUNT_PATH, secret),
                read_only: Some(true),
                ..Default::default()
            });
        }

        let (lifecycle, security_context) = match &self.bucket_mount {
            Some(mount) => bucket_hooks(mount),
            None => (None, None),
        };

        let container = Container {
            name: self.labels
                .get(COMPONENT_LABEL)
                .cloned()
                .unwrap_or_else(|| "main".to_string()),
            image: Some(self.image.clone()),
            ports: (!self.ports.is_empty()).then(|| {
                self.ports
                    .iter()
                    .map(|(port, protocol)| ContainerPort {
                        container_port: i32::from(*port),
                        protocol: Some(protocol.as_str().to_string()),
                        ..Default::default()
                    })
                    .collect()
            }),
            env: (!env.is_empty()).then_some(env),
            volume_mounts: (!mounts.is_empty()).then_some(mounts),
            lifecycle,
            security_context,
            ..Default::default()
        };

        let mut pod_labels = self.labels.clone();
        pod_labels.insert(SELECTOR_LABEL.to_string(), self.selector.clone());

        Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(self.labels.clone()),
                annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(
                        [(SELECTOR_LABEL.to_string(), self.selector.clone())].into(),
                    ),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: (!volumes.is_empty()).then_some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn exec(command: Vec<String>) -> LifecycleHandler {
    LifecycleHandler {
        exec: Some(ExecAction {
            command: Some(command),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// FUSE mount on start, unmount on stop; needs a privileged container
fn bucket_hooks(mount: &BucketMount) -> (Option<Lifecycle>, Option<SecurityContext>) {
    let key_file = format!("{}/{}/{}", CREDENTIALS_MOUNT_PATH, mount.secret, CREDENTIALS_KEY);
    let lifecycle = Lifecycle {
        post_start: Some(exec(vec![
            "gcsfuse".to_string(),
            "--key-file".to_string(),
            key_file,
            mount.bucket.clone(),
            BUCKET_MOUNT_PATH.to_string(),
        ])),
        pre_stop: Some(exec(vec![
            "fusermount".to_string(),
            "-u".to_string(),
            BUCKET_MOUNT_PATH.to_string(),
        ])),
        ..Default::default()
    };
    let security_context = SecurityContext {
        privileged: Some(true),
        capabilities: Some(Capabilities {
            add: Some(vec!["SYS_ADMIN".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    };
    (Some(lifecycle), Some(security_context))
}
