//! Kubernetes-backed resource store

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use std::path::Path;
use tracing::debug;

use super::{kind_of, PlatformError, PlatformObject, ResourceStore};

/// Client handle for one cluster, built once by the top-level command
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using an explicit kubeconfig, or the usual inference chain
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster service account)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, PlatformError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)
                    .map_err(|e| PlatformError::Client(e.to_string()))?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &kube::config::KubeConfigOptions::default(),
                )
                .await
                .map_err(|e| PlatformError::Client(e.to_string()))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| PlatformError::Client(e.to_string()))?,
        };

        let client = Client::try_from(config).map_err(|e| PlatformError::Client(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn api<K: PlatformObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error<K: PlatformObject>(name: &str, err: kube::Error) -> PlatformError {
    match err {
        kube::Error::Api(response) if response.code == 404 => PlatformError::NotFound {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => PlatformError::AlreadyExists {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        kube::Error::Api(response) => PlatformError::Api {
            code: response.code,
            message: response.message,
        },
        kube::Error::SerdeError(e) => PlatformError::Serialization(e.to_string()),
        other => PlatformError::Client(other.to_string()),
    }
}

#[async_trait]
impl<K: PlatformObject> ResourceStore<K> for KubePlatform {
    async fn create(&self, namespace: &str, object: &K) -> Result<K, PlatformError> {
        let name = object.meta().name.clone().unwrap_or_default();
        debug!(kind = %kind_of::<K>(), %namespace, %name, "Creating object");
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error::<K>(&name, e))
    }

    async fn read(&self, namespace: &str, name: &str) -> Result<Option<K>, PlatformError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error::<K>(name, e))
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, PlatformError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| map_error::<K>("", e))?;
        Ok(list.items)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        debug!(kind = %kind_of::<K>(), %namespace, %name, "Deleting object");
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error::<K>(name, e))
    }
}
