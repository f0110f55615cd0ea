//! Deletion of an infrastructure given only its name
//!
//! The object graph is rebuilt from the master's annotations plus one hop
//! into the predictor workload. Objects that are already gone are logged and
//! skipped, so a teardown interrupted halfway can simply be run again.
//! Workloads are deleted only after every service, configuration object and
//! credential object is gone, and the master goes last, since workloads are
//! the only record of their children.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{error, info};

use crate::error::{ObiError, Result};
use crate::graph::{ObjectKind, ObjectSet, ResourceGraph, Role};
use crate::observability::EventLogger;
use crate::platform::{self, Platform, PlatformObject, ResourceStore};

/// One object touched by a teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub infrastructure: String,
    pub namespace: String,
    pub deleted: Vec<ObjectRef>,
    /// Named in the graph but already absent
    pub missing: Vec<ObjectRef>,
}

impl TeardownReport {
    /// Whether the master itself was found
    pub fn found(&self) -> bool {
        self.deleted
            .iter()
            .any(|o| o.kind == ObjectKind::Workload && o.name == self.infrastructure)
    }
}

pub struct TeardownEngine<'a, P: ?Sized> {
    platform: &'a P,
}

struct Pass {
    events: EventLogger,
    report: TeardownReport,
    first_error: Option<ObiError>,
}

impl<'a, P: Platform + ?Sized> TeardownEngine<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Every object the named infrastructure consists of, without deleting
    pub async fn collect(&self, namespace: &str, name: &str) -> Result<Option<ObjectSet>> {
        let Some(master) = platform::read::<Deployment, _>(self.platform, namespace, name).await?
        else {
            return Ok(None);
        };

        let graph = ResourceGraph::from_workload(&master);
        let predictor = match graph.get(Role::PredictorWorkload) {
            Some(predictor) => {
                platform::read::<Deployment, _>(self.platform, namespace, predictor)
                    .await?
                    .map(|workload| ResourceGraph::from_workload(&workload))
            }
            None => None,
        };

        Ok(Some(ObjectSet::collect(&graph, predictor.as_ref())))
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<TeardownReport> {
        let mut pass = Pass {
            events: EventLogger::new(namespace),
            report: TeardownReport {
                infrastructure: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            first_error: None,
        };

        let Some(objects) = self.collect(namespace, name).await? else {
            pass.events
                .object_already_absent(name, ObjectKind::Workload, name);
            pass.report.missing.push(ObjectRef {
                kind: ObjectKind::Workload,
                name: name.to_string(),
            });
            return Ok(pass.report);
        };

        info!(
            %namespace,
            infrastructure = %name,
            objects = objects.len() + 1,
            "Deleting infrastructure"
        );

        let services = &objects.services;
        self.delete_all::<Service>(namespace, services, ObjectKind::Service, &mut pass)
            .await;
        let config_maps = &objects.config_maps;
        self.delete_all::<ConfigMap>(namespace, config_maps, ObjectKind::ConfigMap, &mut pass)
            .await;
        let secrets = &objects.secrets;
        self.delete_all::<Secret>(namespace, secrets, ObjectKind::Secret, &mut pass)
            .await;
        Self::check(&mut pass, namespace, name)?;

        let workloads = &objects.workloads;
        self.delete_all::<Deployment>(namespace, workloads, ObjectKind::Workload, &mut pass)
            .await;
        Self::check(&mut pass, namespace, name)?;

        let master: BTreeSet<String> = [name.to_string()].into();
        self.delete_all::<Deployment>(namespace, &master, ObjectKind::Workload, &mut pass)
            .await;
        if let Some(err) = pass.first_error.take() {
            return Err(err);
        }

        pass.events.infrastructure_deleted(
            name,
            pass.report.deleted.len(),
            pass.report.missing.len(),
        );
        Ok(pass.report)
    }

    /// Stop the pass at the first recorded failure, leaving the workloads
    /// that still describe what is left
    fn check(pass: &mut Pass, namespace: &str, name: &str) -> Result<()> {
        match pass.first_error.take() {
            Some(err) => {
                error!(
                    %namespace,
                    infrastructure = %name,
                    "Teardown incomplete, keeping remaining workloads so it can be retried"
                );
                Err(err)
            }
            None => Ok(()),
        }
    }

    async fn delete_all<K>(
        &self,
        namespace: &str,
        names: &BTreeSet<String>,
        kind: ObjectKind,
        pass: &mut Pass,
    ) where
        K: PlatformObject,
        P: ResourceStore<K>,
    {
        let infrastructure = pass.report.infrastructure.clone();
        for name in names {
            let object = ObjectRef {
                kind,
                name: name.clone(),
            };
            match platform::delete::<K, _>(self.platform, namespace, name).await {
                Ok(()) => {
                    pass.events.object_deleted(&infrastructure, kind, name);
                    pass.report.deleted.push(object);
                }
                Err(e) if e.is_not_found() => {
                    pass.events.object_already_absent(&infrastructure, kind, name);
                    pass.report.missing.push(object);
                }
                Err(e) => {
                    error!(
                        operation = "delete",
                        %kind,
                        %namespace,
                        %name,
                        error = %e,
                        "Platform operation failed"
                    );
                    if pass.first_error.is_none() {
                        let operation = format!("delete {} {}", kind, name);
                        pass.first_error = Some(ObiError::platform(operation, e));
                    }
                }
            }
        }
    }
}
