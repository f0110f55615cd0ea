//! Creation of a complete infrastructure
//!
//! Objects are created one at a time in dependency order and the master
//! workload goes last, carrying the annotations that describe everything
//! else. A failure at any step stops the build; nothing is rolled back.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::manifests::{self, BucketMount, MasterConfig, WorkloadManifest, CONFIG_KEY};
use super::{Component, ObjectKind, ResourceGraph, Role, CREATED_AT_ANNOTATION};
use crate::config::{InfrastructureDescriptor, InfrastructureSpec, Settings};
use crate::error::{ObiError, Result};
use crate::naming::{self, NameGenerator};
use crate::observability::EventLogger;
use crate::platform::{self, Platform, PlatformError, PlatformObject, ResourceStore};
use crate::resolver::{ConnectionResolver, Endpoint, Protocol};

/// Outcome of a successful build
#[derive(Debug, Clone, Serialize)]
pub struct CreatedInfrastructure {
    pub name: String,
    pub namespace: String,
    pub graph: ResourceGraph,
    pub heartbeat: Endpoint,
    pub api: Endpoint,
}

pub struct InfrastructureBuilder<'a, P: ?Sized> {
    platform: &'a P,
    settings: &'a Settings,
    names: NameGenerator,
}

/// Credential file contents, read before anything is created
struct Credentials {
    compute: String,
    storage: String,
}

fn read_credentials(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ObiError::io(path, e))
}

impl<'a, P: Platform + ?Sized> InfrastructureBuilder<'a, P> {
    pub fn new(platform: &'a P, settings: &'a Settings) -> Self {
        Self {
            platform,
            settings,
            names: NameGenerator::new(),
        }
    }

    /// Create every object of the infrastructure described by `descriptor`
    ///
    /// Validation, credential reads and the name collision check all happen
    /// before the first mutation.
    pub async fn create(
        &self,
        descriptor: &InfrastructureDescriptor,
    ) -> Result<CreatedInfrastructure> {
        let spec = descriptor.validate()?;
        let credentials = Credentials {
            compute: read_credentials(&spec.compute_credentials_path)?,
            storage: read_credentials(&spec.storage_credentials_path)?,
        };

        let namespace = spec
            .namespace
            .clone()
            .unwrap_or_else(|| self.settings.namespace.clone());
        let name = match &spec.name {
            Some(name) if naming::is_valid_name(name) => name.clone(),
            Some(name) => {
                return Err(ObiError::InvalidConfiguration(format!(
                    "infrastructure name \"{}\" must be a lowercase DNS label starting \
                     with a letter, at most {} characters",
                    name,
                    naming::MAX_NAME_LEN
                )))
            }
            None => self.names.infrastructure_name(),
        };

        if platform::read::<Deployment, _>(self.platform, &namespace, &name)
            .await?
            .is_some()
        {
            return Err(ObiError::AlreadyExists { name });
        }

        info!(%namespace, infrastructure = %name, "Creating infrastructure");
        let build = Build {
            builder: self,
            spec: &spec,
            namespace: &namespace,
            name: &name,
            events: EventLogger::new(namespace.as_str()),
        };
        build.run(credentials).await
    }
}

/// State of one in-flight build
struct Build<'b, 'a, P: ?Sized> {
    builder: &'b InfrastructureBuilder<'a, P>,
    spec: &'b InfrastructureSpec,
    namespace: &'b str,
    name: &'b str,
    events: EventLogger,
}

impl<'b, 'a, P: Platform + ?Sized> Build<'b, 'a, P> {
    fn settings(&self) -> &Settings {
        self.builder.settings
    }

    fn object_name(&self, role: &str) -> String {
        self.builder.names.object_name(self.name, role)
    }

    fn labels(&self, component: Component) -> BTreeMap<String, String> {
        manifests::labels(self.name, component)
    }

    async fn create<K>(&self, kind: ObjectKind, object: &K) -> Result<()>
    where
        K: PlatformObject,
        P: ResourceStore<K>,
    {
        let created = platform::create(self.builder.platform, self.namespace, object).await?;
        let name = created.meta().name.clone().unwrap_or_default();
        self.events.object_created(self.name, kind, &name);
        Ok(())
    }

    async fn wait_for(&self, service: &str) -> Result<Endpoint> {
        let resolver =
            ConnectionResolver::new(self.builder.platform, self.settings().poll_config());
        let endpoint = resolver.wait_for_address(self.namespace, service).await?;
        debug!(service = %service, endpoint = %endpoint, "Service address assigned");
        Ok(endpoint)
    }

    async fn run(&self, credentials: Credentials) -> Result<CreatedInfrastructure> {
        let settings = self.settings();
        let mut graph = ResourceGraph::new();

        // Credential objects
        let compute_secret = self.object_name("compute-credentials");
        let storage_secret = self.object_name("storage-credentials");
        for (secret, content) in [
            (&compute_secret, &credentials.compute),
            (&storage_secret, &credentials.storage),
        ] {
            let object =
                manifests::credential_secret(secret, content, self.labels(Component::Master));
            self.create::<Secret>(ObjectKind::Secret, &object).await?;
            graph.insert(Role::Secrets, secret.as_str());
        }

        // Pod selectors
        let master_selector = self.object_name("master");
        let predictor_selector = self.object_name("predictor");
        let api_selector = self.object_name("api");

        // Master and heartbeat endpoints
        let master_service = self.object_name("master-svc");
        let heartbeat_service = self.object_name("heartbeat-svc");
        self.create::<Service>(
            ObjectKind::Service,
            &manifests::service(
                &master_service,
                &master_selector,
                settings.master_port,
                Protocol::Tcp,
                true,
                self.labels(Component::Master),
            ),
        )
        .await?;
        graph.insert(Role::MasterService, master_service.as_str());
        self.create::<Service>(
            ObjectKind::Service,
            &manifests::service(
                &heartbeat_service,
                &master_selector,
                settings.heartbeat_port,
                Protocol::Udp,
                true,
                self.labels(Component::Master),
            ),
        )
        .await?;
        graph.insert(Role::HeartbeatService, heartbeat_service.as_str());
        let heartbeat = self.wait_for(&heartbeat_service).await?;

        // Predictor
        let predictor = self
            .create_predictor(&predictor_selector, &credentials.storage)
            .await?;
        graph.insert(Role::PredictorService, predictor.service.as_str());
        graph.insert(Role::PredictorWorkload, predictor.workload.as_str());

        // Shared configuration
        let shared_config = self.object_name("config");
        let document = MasterConfig {
            heartbeat_host: heartbeat.host.clone(),
            heartbeat_port: heartbeat.port,
            project_id: self.spec.project_id.clone(),
            region: self.spec.region.clone(),
            zone: self.spec.zone.clone(),
            scheduling_levels: self.spec.scheduling_levels.clone(),
            priority_map: self.spec.priority_map.clone(),
            autoscaling_factor_one_job_one_cluster: self
                .spec
                .autoscaling_factor_one_job_one_cluster,
            autoscaling_factor_one_job_one_cluster_hp: self
                .spec
                .autoscaling_factor_one_job_one_cluster_hp,
            predictor_host: predictor.endpoint.host.clone(),
            predictor_port: predictor.endpoint.port,
            master_port: settings.master_port,
            database: self.spec.database.clone(),
        };
        let data = [(CONFIG_KEY.to_string(), serde_json::to_string_pretty(&document)?)].into();
        self.create::<ConfigMap>(
            ObjectKind::ConfigMap,
            &manifests::config_map(&shared_config, data, self.labels(Component::Master)),
        )
        .await?;
        graph.insert(Role::ConfigMap, shared_config.as_str());

        // API
        let api_service = self.object_name("api-svc");
        self.create::<Service>(
            ObjectKind::Service,
            &manifests::service(
                &api_service,
                &api_selector,
                settings.api_port,
                Protocol::Tcp,
                true,
                self.labels(Component::Api),
            ),
        )
        .await?;
        graph.insert(Role::ApiService, api_service.as_str());
        let api = self.wait_for(&api_service).await?;

        let api_workload = self.object_name("api");
        let mut manifest = WorkloadManifest::new(
            &api_workload,
            &api_selector,
            &settings.api_image,
            self.labels(Component::Api),
        )
        .port(settings.api_port, Protocol::Tcp)
        .config_map(&shared_config)
        .env("OBI_INFRASTRUCTURE", self.name);
        if let Some(database) = &self.spec.database {
            manifest = manifest
                .env("DATABASE_HOST", database.host.as_str())
                .env("DATABASE_PORT", database.port.to_string())
                .env("DATABASE_NAME", database.name.as_str());
        }
        self.create::<Deployment>(ObjectKind::Workload, &manifest.render())
            .await?;
        graph.insert(Role::ApiWorkload, api_workload.as_str());

        // Master, last
        let mut annotations = graph.to_annotations();
        annotations.insert(
            CREATED_AT_ANNOTATION.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
        let master = WorkloadManifest::new(
            self.name,
            &master_selector,
            &settings.master_image,
            self.labels(Component::Master),
        )
        .port(settings.master_port, Protocol::Tcp)
        .port(settings.heartbeat_port, Protocol::Udp)
        .config_map(&shared_config)
        .secret(&compute_secret)
        .secret(&storage_secret)
        .annotations(annotations)
        .render();

        match platform::create(self.builder.platform, self.namespace, &master).await {
            Ok(_) => self.events.object_created(self.name, ObjectKind::Workload, self.name),
            Err(ObiError::Platform {
                source: PlatformError::AlreadyExists { .. },
                ..
            }) => {
                return Err(ObiError::AlreadyExists {
                    name: self.name.to_string(),
                })
            }
            Err(e) => return Err(e),
        }

        let objects = graph.iter().count() + predictor.graph.iter().count() + 1;
        self.events.infrastructure_created(self.name, objects);

        Ok(CreatedInfrastructure {
            name: self.name.to_string(),
            namespace: self.namespace.to_string(),
            graph,
            heartbeat,
            api,
        })
    }

    async fn create_predictor(
        &self,
        selector: &str,
        storage_credentials: &str,
    ) -> Result<PredictorObjects> {
        let settings = self.settings();
        let labels = self.labels(Component::Predictor);
        let mut graph = ResourceGraph::new();

        let service = self.object_name("predictor-svc");
        self.create::<Service>(
            ObjectKind::Service,
            &manifests::service(
                &service,
                selector,
                settings.predictor_port,
                Protocol::Tcp,
                false,
                labels.clone(),
            ),
        )
        .await?;
        let endpoint = self.wait_for(&service).await?;

        let config = self.object_name("predictor-config");
        self.create::<ConfigMap>(
            ObjectKind::ConfigMap,
            &manifests::config_map(&config, BTreeMap::new(), labels.clone()),
        )
        .await?;
        graph.insert(Role::ConfigMap, config.as_str());

        let workload = self.object_name("predictor");
        let mut manifest =
            WorkloadManifest::new(&workload, selector, &settings.predictor_image, labels.clone())
                .port(settings.predictor_port, Protocol::Tcp)
                .config_map(&config);

        if let Some(bucket) = &self.spec.bucket {
            let secret = self.object_name("predictor-credentials");
            self.create::<Secret>(
                ObjectKind::Secret,
                &manifests::credential_secret(&secret, storage_credentials, labels),
            )
            .await?;
            graph.insert(Role::Secrets, secret.as_str());
            manifest = manifest.bucket_mount(BucketMount {
                bucket: bucket.clone(),
                secret,
            });
        }

        let deployment = manifest.annotations(graph.to_annotations()).render();
        self.create::<Deployment>(ObjectKind::Workload, &deployment).await?;

        Ok(PredictorObjects {
            service,
            workload,
            endpoint,
            graph,
        })
    }
}

struct PredictorObjects {
    service: String,
    workload: String,
    endpoint: Endpoint,
    graph: ResourceGraph,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryPlatform;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn credential_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn descriptor(compute: &NamedTempFile, storage: &NamedTempFile) -> InfrastructureDescriptor {
        InfrastructureDescriptor {
            name: Some("infra1".to_string()),
            project_id: Some("p".to_string()),
            region: Some("r".to_string()),
            zone: Some("z".to_string()),
            compute_credentials_path: Some(compute.path().to_path_buf()),
            storage_credentials_path: Some(storage.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_master_annotations_name_existing_objects() {
        let (compute, storage) = (credential_file("{\n}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let created = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor(&compute, &storage))
            .await
            .unwrap();
        assert_eq!(created.name, "infra1");
        assert_eq!(created.namespace, "obi");

        let master = platform::read::<Deployment, _>(&platform, "obi", "infra1")
            .await
            .unwrap()
            .unwrap();
        let annotations = master.metadata.annotations.clone().unwrap();
        assert!(annotations.contains_key(CREATED_AT_ANNOTATION));

        let graph = ResourceGraph::from_workload(&master);
        assert_eq!(graph, created.graph);
        assert_eq!(graph.names(Role::Secrets).len(), 2);
        for role in Role::ALL {
            assert!(!graph.names(role).is_empty(), "missing {:?}", role);
        }

        let stored = platform.object_names("obi");
        for (role, name) in graph.iter() {
            let kind = role.kind().to_string();
            assert!(
                stored.iter().any(|(k, n)| *k == kind && n == name),
                "{} {} was not created",
                kind,
                name
            );
        }
    }

    #[tokio::test]
    async fn test_shared_config_embeds_addresses() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let created = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor(&compute, &storage))
            .await
            .unwrap();

        let config_map = created.graph.get(Role::ConfigMap).unwrap();
        let config = platform::read::<ConfigMap, _>(&platform, "obi", config_map)
            .await
            .unwrap()
            .unwrap();
        let document: serde_json::Value =
            serde_json::from_str(&config.data.unwrap()[CONFIG_KEY]).unwrap();

        assert_eq!(document["heartbeatHost"], created.heartbeat.host.as_str());
        assert_eq!(document["heartbeatPort"], 8080);
        assert_eq!(document["projectId"], "p");
        assert!(document["predictorHost"].as_str().unwrap().starts_with("10.96."));
        assert_eq!(document["predictorPort"], 50051);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_without_mutation() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();
        let builder = InfrastructureBuilder::new(&platform, &settings);

        builder.create(&descriptor(&compute, &storage)).await.unwrap();
        let mutations = platform.mutation_count();

        let err = builder
            .create(&descriptor(&compute, &storage))
            .await
            .unwrap_err();
        assert!(matches!(err, ObiError::AlreadyExists { ref name } if name == "infra1"));
        assert_eq!(platform.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_unreadable_credentials_fail_before_mutation() {
        let compute = credential_file("{}");
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let mut descriptor = descriptor(&compute, &compute);
        descriptor.storage_credentials_path = Some("/nonexistent/storage.json".into());

        let err = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, ObiError::Io { .. }));
        assert_eq!(platform.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let mut descriptor = descriptor(&compute, &storage);
        descriptor.name = Some("Infra_1".to_string());

        let err = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, ObiError::InvalidConfiguration(_)));
        assert_eq!(platform.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_generated_name_when_descriptor_has_none() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let mut descriptor = descriptor(&compute, &storage);
        descriptor.name = None;
        descriptor.namespace = Some("tenant-a".to_string());

        let created = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor)
            .await
            .unwrap();
        assert!(created.name.starts_with("obi-infrastructure-"));
        assert_eq!(created.namespace, "tenant-a");
        assert_eq!(platform.object_count("obi"), 0);
    }

    #[tokio::test]
    async fn test_bucket_gives_predictor_its_own_secret() {
        let (compute, storage) = (credential_file("{}"), credential_file("{\n\"k\": 1\n}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let mut descriptor = descriptor(&compute, &storage);
        descriptor.bucket = Some("models".to_string());

        let created = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor)
            .await
            .unwrap();

        let predictor_name = created.graph.get(Role::PredictorWorkload).unwrap();
        let predictor = platform::read::<Deployment, _>(&platform, "obi", predictor_name)
            .await
            .unwrap()
            .unwrap();
        let predictor_graph = ResourceGraph::from_workload(&predictor);
        let secret_name = predictor_graph.get(Role::Secrets).unwrap();
        assert!(!created.graph.names(Role::Secrets).iter().any(|s| s == secret_name));

        let secret = platform::read::<Secret, _>(&platform, "obi", secret_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            secret.data.unwrap()[manifests::CREDENTIALS_KEY].0,
            b"{\"k\": 1}".to_vec()
        );
    }

    #[tokio::test]
    async fn test_api_workload_receives_database_address() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let mut descriptor = descriptor(&compute, &storage);
        descriptor.database = Some(crate::config::DatabaseConfig {
            host: "db.internal".to_string(),
            port: 5433,
            username: "obi".to_string(),
            password: "secret".to_string(),
            name: "jobs".to_string(),
        });

        let created = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor)
            .await
            .unwrap();

        let api_name = created.graph.get(Role::ApiWorkload).unwrap();
        let api = platform::read::<Deployment, _>(&platform, "obi", api_name)
            .await
            .unwrap()
            .unwrap();
        let pod = api.spec.unwrap().template.spec.unwrap();
        let env: BTreeMap<String, String> = pod.containers[0]
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect();
        assert_eq!(env["OBI_INFRASTRUCTURE"], "infra1");
        assert_eq!(env["DATABASE_HOST"], "db.internal");
        assert_eq!(env["DATABASE_PORT"], "5433");
        assert_eq!(env["DATABASE_NAME"], "jobs");
    }

    #[tokio::test]
    async fn test_name_starting_with_digit_is_rejected_without_mutation() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        let settings = Settings::default();

        let mut descriptor = descriptor(&compute, &storage);
        descriptor.name = Some("1infra".to_string());

        let err = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, ObiError::InvalidConfiguration(ref m) if m.contains("1infra")));
        assert_eq!(platform.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_step_stops_build_before_master() {
        let (compute, storage) = (credential_file("{}"), credential_file("{}"));
        let platform = InMemoryPlatform::new();
        platform.fail_matching("infra1-api-svc", 500);
        let settings = Settings::default();

        let err = InfrastructureBuilder::new(&platform, &settings)
            .create(&descriptor(&compute, &storage))
            .await
            .unwrap_err();
        match err {
            ObiError::Platform {
                source: PlatformError::Api { code, .. },
                ..
            } => assert_eq!(code, 500),
            other => panic!("expected platform error, got {:?}", other),
        }

        // Earlier steps stay in place and the master is never written
        assert!(platform.mutation_count() > 0);
        assert!(platform::read::<Deployment, _>(&platform, "obi", "infra1")
            .await
            .unwrap()
            .is_none());
        assert!(!platform
            .object_names("obi")
            .iter()
            .any(|(_, name)| name.starts_with("infra1-api")));
    }
}
