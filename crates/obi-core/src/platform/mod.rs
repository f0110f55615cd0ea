//! Resource primitives on the orchestration platform
//!
//! This module provides:
//! - `ResourceStore`, the create/read/list/delete surface for one object kind
//! - `Platform`, the four kinds an infrastructure is made of
//! - a Kubernetes implementation and an in-process one for tests
//!
//! Call sites go through the free functions below, which log a failed
//! operation with its name before handing the error back.

mod kubernetes;
pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::error;

use crate::error::ObiError;

pub use kubernetes::KubePlatform;
pub use memory::InMemoryPlatform;

/// Errors surfaced by a platform adapter
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("platform API returned {code}: {message}")]
    Api { code: u16, message: String },

    #[error("platform client error: {0}")]
    Client(String),

    #[error("malformed platform object: {0}")]
    Serialization(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}

/// A namespaced object the control plane manages
pub trait PlatformObject:
    ::kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> PlatformObject for K where
    K: ::kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name used in logs and errors
pub fn kind_of<K: PlatformObject>() -> String {
    K::kind(&()).to_string()
}

/// Create/read/list/delete for one object kind
#[async_trait]
pub trait ResourceStore<K: PlatformObject>: Send + Sync {
    async fn create(&self, namespace: &str, object: &K) -> Result<K, PlatformError>;

    /// `Ok(None)` when the object does not exist
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<K>, PlatformError>;

    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, PlatformError>;

    /// Fails with `PlatformError::NotFound` when the object is already gone
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), PlatformError>;
}

/// Workloads, network endpoints, credential objects and configuration objects
pub trait Platform:
    ResourceStore<Deployment>
    + ResourceStore<Service>
    + ResourceStore<Secret>
    + ResourceStore<ConfigMap>
{
}

impl<T> Platform for T where
    T: ResourceStore<Deployment>
        + ResourceStore<Service>
        + ResourceStore<Secret>
        + ResourceStore<ConfigMap>
{
}

fn object_name<K: PlatformObject>(object: &K) -> String {
    object.meta().name.clone().unwrap_or_default()
}

pub async fn create<K, P>(platform: &P, namespace: &str, object: &K) -> Result<K, ObiError>
where
    K: PlatformObject,
    P: ResourceStore<K> + ?Sized,
{
    platform.create(namespace, object).await.map_err(|e| {
        let name = object_name(object);
        error!(
            operation = "create",
            kind = %kind_of::<K>(),
            %namespace,
            %name, error = %e,
            "Platform operation failed"
        );
        ObiError::platform(format!("create {} {}", kind_of::<K>(), name), e)
    })
}

pub async fn read<K, P>(platform: &P, namespace: &str, name: &str) -> Result<Option<K>, ObiError>
where
    K: PlatformObject,
    P: ResourceStore<K> + ?Sized,
{
    platform.read(namespace, name).await.map_err(|e| {
        error!(
            operation = "read",
            kind = %kind_of::<K>(),
            %namespace,
            %name, error = %e,
            "Platform operation failed"
        );
        ObiError::platform(format!("read {} {}", kind_of::<K>(), name), e)
    })
}

pub async fn list<K, P>(
    platform: &P,
    namespace: &str,
    label_selector: Option<&str>,
) -> Result<Vec<K>, ObiError>
where
    K: PlatformObject,
    P: ResourceStore<K> + ?Sized,
{
    platform.list(namespace, label_selector).await.map_err(|e| {
        error!(
            operation = "list",
            kind = %kind_of::<K>(),
            %namespace,
            error = %e,
            "Platform operation failed"
        );
        ObiError::platform(format!("list {}", kind_of::<K>()), e)
    })
}

/// Delete without logging: the caller decides whether absence is a failure
pub async fn delete<K, P>(platform: &P, namespace: &str, name: &str) -> Result<(), PlatformError>
where
    K: PlatformObject,
    P: ResourceStore<K> + ?Sized,
{
    platform.delete(namespace, name).await
}
