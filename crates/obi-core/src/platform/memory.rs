//! In-process resource store
//!
//! Behaves like a single-namespace-aware API server for the object kinds the
//! control plane uses: names are unique per kind and namespace, services get
//! a cluster IP on creation, and load-balanced services only report an
//! ingress address after they have been read a configurable number of
//! times. Every successful create or delete counts as one mutation.
//!
//! Creates and deletes of names with a registered prefix fail with an API
//! error until the faults are cleared.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{kind_of, PlatformError, PlatformObject, ResourceStore};

type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    lb_reads: BTreeMap<ObjectKey, usize>,
    next_ip: u32,
    faults: Vec<(String, u16)>,
}

impl State {
    fn fault(&self, kind: &str, name: &str) -> Option<PlatformError> {
        self.faults
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, code)| PlatformError::Api {
                code: *code,
                message: format!("injected failure for {} \"{}\"", kind, name),
            })
    }
}

pub struct InMemoryPlatform {
    state: Mutex<State>,
    mutations: AtomicUsize,
    reads_before_ingress: usize,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    /// Load balancers get an address on their first read
    pub fn new() -> Self {
        Self::with_ingress_delay(0)
    }

    /// Load balancers get an address once they have been read `reads` times
    /// without one
    pub fn with_ingress_delay(reads: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            mutations: AtomicUsize::new(0),
            reads_before_ingress: reads,
        }
    }

    /// Successful creates and deletes so far
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Objects of every kind currently stored in `namespace`
    pub fn object_count(&self, namespace: &str) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(_, ns, _)| ns == namespace)
            .count()
    }

    /// `(kind, name)` of every object in `namespace`
    pub fn object_names(&self, namespace: &str) -> Vec<(String, String)> {
        self.lock()
            .objects
            .keys()
            .filter(|(_, ns, _)| ns == namespace)
            .map(|(kind, _, name)| (kind.clone(), name.clone()))
            .collect()
    }

    /// Fail creates and deletes of any object whose name starts with `prefix`
    pub fn fail_matching(&self, prefix: &str, code: u16) {
        self.lock().faults.push((prefix.to_string(), code));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key<K: PlatformObject>(namespace: &str, name: &str) -> ObjectKey {
    (kind_of::<K>(), namespace.to_string(), name.to_string())
}

fn is_load_balancer(service: &Value) -> bool {
    service.pointer("/spec/type").and_then(Value::as_str) == Some("LoadBalancer")
}

fn has_ingress(service: &Value) -> bool {
    service
        .pointer("/status/loadBalancer/ingress")
        .and_then(Value::as_array)
        .map(|ingress| !ingress.is_empty())
        .unwrap_or(false)
}

fn matches_selector(object: &Value, selector: &str) -> bool {
    let labels = object.pointer("/metadata/labels");
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => {
                labels.and_then(|l| l.get(k.trim())).and_then(Value::as_str) == Some(v.trim())
            }
            None => labels.and_then(|l| l.get(term)).is_some(),
        })
}

fn decode<K: PlatformObject>(value: Value) -> Result<K, PlatformError> {
    serde_json::from_value(value).map_err(|e| PlatformError::Serialization(e.to_string()))
}

#[async_trait]
impl<K: PlatformObject> ResourceStore<K> for InMemoryPlatform {
    async fn create(&self, namespace: &str, object: &K) -> Result<K, PlatformError> {
        let name = object
            .meta()
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlatformError::Api {
                code: 422,
                message: format!("{} is missing metadata.name", kind_of::<K>()),
            })?;

        let mut value =
            serde_json::to_value(object).map_err(|e| PlatformError::Serialization(e.to_string()))?;
        let key = key::<K>(namespace, &name);

        let mut state = self.lock();
        if let Some(fault) = state.fault(&key.0, &name) {
            return Err(fault);
        }
        if state.objects.contains_key(&key) {
            return Err(PlatformError::AlreadyExists {
                kind: kind_of::<K>(),
                name,
            });
        }

        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["creationTimestamp"] = json!(chrono::Utc::now().to_rfc3339());
        if kind_of::<K>() == "Service" {
            state.next_ip += 1;
            let ip = format!("10.96.{}.{}", state.next_ip / 256, state.next_ip % 256);
            value["spec"]["clusterIP"] = json!(ip);
        }

        state.objects.insert(key, value.clone());
        drop(state);

        self.mutations.fetch_add(1, Ordering::SeqCst);
        decode(value)
    }

    async fn read(&self, namespace: &str, name: &str) -> Result<Option<K>, PlatformError> {
        let key = key::<K>(namespace, name);
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(value) = state.objects.get_mut(&key) else {
            return Ok(None);
        };

        if is_load_balancer(value) && !has_ingress(value) {
            let reads = state.lb_reads.entry(key).or_insert(0);
            if *reads >= self.reads_before_ingress {
                let octet = 10 + state.next_ip % 200;
                value["status"]["loadBalancer"]["ingress"] =
                    json!([{ "ip": format!("35.190.0.{}", octet) }]);
            } else {
                *reads += 1;
            }
        }

        decode(value.clone()).map(Some)
    }

    async fn list(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, PlatformError> {
        let kind = kind_of::<K>();
        let values: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, v)| label_selector.map_or(true, |s| matches_selector(v, s)))
            .map(|(_, v)| v.clone())
            .collect();

        values.into_iter().map(decode).collect()
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), PlatformError> {
        let key = key::<K>(namespace, name);
        let mut state = self.lock();
        if let Some(fault) = state.fault(&key.0, name) {
            return Err(fault);
        }
        if state.objects.remove(&key).is_none() {
            return Err(PlatformError::NotFound {
                kind: kind_of::<K>(),
                name: name.to_string(),
            });
        }
        state.lb_reads.remove(&key);
        drop(state);

        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceSpec};
    use kube::api::ObjectMeta;

    fn load_balancer(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some([("obi/infrastructure".to_string(), "infra1".to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let platform = InMemoryPlatform::new();
        ResourceStore::<ConfigMap>::create(&platform, "ns", &config_map("cfg"))
            .await
            .unwrap();

        let err = ResourceStore::<ConfigMap>::create(&platform, "ns", &config_map("cfg"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::AlreadyExists { .. }));
        assert_eq!(platform.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_same_name_in_other_namespace_is_independent() {
        let platform = InMemoryPlatform::new();
        ResourceStore::<ConfigMap>::create(&platform, "a", &config_map("cfg"))
            .await
            .unwrap();
        ResourceStore::<ConfigMap>::create(&platform, "b", &config_map("cfg"))
            .await
            .unwrap();

        assert_eq!(platform.object_count("a"), 1);
        assert_eq!(platform.object_count("b"), 1);
    }

    #[tokio::test]
    async fn test_ingress_assigned_after_delay() {
        let platform = InMemoryPlatform::with_ingress_delay(2);
        let created = ResourceStore::<Service>::create(&platform, "ns", &load_balancer("svc"))
            .await
            .unwrap();
        assert!(created.spec.unwrap().cluster_ip.is_some());

        for _ in 0..2 {
            let svc = ResourceStore::<Service>::read(&platform, "ns", "svc")
                .await
                .unwrap()
                .unwrap();
            assert!(svc.status.and_then(|s| s.load_balancer).and_then(|l| l.ingress).is_none());
        }

        let svc = ResourceStore::<Service>::read(&platform, "ns", "svc")
            .await
            .unwrap()
            .unwrap();
        let ingress = svc.status.unwrap().load_balancer.unwrap().ingress.unwrap();
        assert!(ingress[0].ip.as_deref().unwrap().starts_with("35.190."));
    }

    #[tokio::test]
    async fn test_list_filters_by_label() {
        let platform = InMemoryPlatform::new();
        ResourceStore::<ConfigMap>::create(&platform, "ns", &config_map("labelled"))
            .await
            .unwrap();
        let mut plain = config_map("plain");
        plain.metadata.labels = None;
        ResourceStore::<ConfigMap>::create(&platform, "ns", &plain)
            .await
            .unwrap();

        let all = ResourceStore::<ConfigMap>::list(&platform, "ns", None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let selector = Some("obi/infrastructure=infra1");
        let selected = ResourceStore::<ConfigMap>::list(&platform, "ns", selector)
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].metadata.name.as_deref(), Some("labelled"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let platform = InMemoryPlatform::new();
        let err = ResourceStore::<ConfigMap>::delete(&platform, "ns", "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(platform.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_fault_until_cleared() {
        let platform = InMemoryPlatform::new();
        ResourceStore::<ConfigMap>::create(&platform, "ns", &config_map("cfg-a"))
            .await
            .unwrap();
        platform.fail_matching("cfg", 503);

        let err = ResourceStore::<ConfigMap>::delete(&platform, "ns", "cfg-a")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Api { code: 503, .. }));
        let err = ResourceStore::<ConfigMap>::create(&platform, "ns", &config_map("cfg-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Api { code: 503, .. }));
        assert_eq!(platform.mutation_count(), 1);

        platform.clear_faults();
        ResourceStore::<ConfigMap>::delete(&platform, "ns", "cfg-a")
            .await
            .unwrap();
        assert_eq!(platform.object_count("ns"), 0);
    }
}
