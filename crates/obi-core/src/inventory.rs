//! Read-only views of existing infrastructures

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use serde::Serialize;

use crate::error::{ObiError, Result};
use crate::graph::{self, ResourceGraph, Role, CREATED_AT_ANNOTATION};
use crate::platform::{self, Platform};
use crate::resolver::{ConnectionResolver, Endpoint, PollConfig};

#[derive(Debug, Clone, Serialize)]
pub struct InfrastructureSummary {
    pub name: String,
    pub namespace: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfrastructureDescription {
    #[serde(flatten)]
    pub summary: InfrastructureSummary,
    pub graph: ResourceGraph,
    /// Objects recorded on the predictor workload, if it still exists
    pub predictor: Option<ResourceGraph>,
    pub master: Option<Endpoint>,
    pub heartbeat: Option<Endpoint>,
    pub api: Option<Endpoint>,
}

fn created_at(workload: &Deployment) -> Option<DateTime<Utc>> {
    workload
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CREATED_AT_ANNOTATION))
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|time| time.with_timezone(&Utc))
        .or_else(|| workload.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

fn summary(namespace: &str, workload: &Deployment) -> InfrastructureSummary {
    InfrastructureSummary {
        name: workload.metadata.name.clone().unwrap_or_default(),
        namespace: namespace.to_string(),
        created_at: created_at(workload),
    }
}

/// Address of a recorded service, `None` while unassigned or unreadable
async fn current_address<P: Platform + ?Sized>(
    resolver: &ConnectionResolver<'_, P>,
    namespace: &str,
    service: Option<&str>,
) -> Option<Endpoint> {
    resolver
        .current_address(namespace, service?)
        .await
        .ok()
        .flatten()
}

/// Every infrastructure in `namespace`, oldest first
pub async fn list<P: Platform + ?Sized>(
    platform: &P,
    namespace: &str,
) -> Result<Vec<InfrastructureSummary>> {
    let selector = graph::master_selector();
    let masters = platform::list::<Deployment, _>(platform, namespace, Some(&selector)).await?;

    let mut summaries: Vec<_> = masters.iter().map(|m| summary(namespace, m)).collect();
    summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
    Ok(summaries)
}

/// Reconstructed graph and whatever addresses are assigned right now
pub async fn describe<P: Platform + ?Sized>(
    platform: &P,
    namespace: &str,
    name: &str,
) -> Result<InfrastructureDescription> {
    let master = platform::read::<Deployment, _>(platform, namespace, name)
        .await?
        .ok_or_else(|| ObiError::InfrastructureNotFound {
            name: name.to_string(),
        })?;
    let graph = ResourceGraph::from_workload(&master);

    let predictor = match graph.get(Role::PredictorWorkload) {
        Some(predictor) => platform::read::<Deployment, _>(platform, namespace, predictor)
            .await?
            .map(|workload| ResourceGraph::from_workload(&workload)),
        None => None,
    };

    let resolver = ConnectionResolver::new(platform, PollConfig::default());
    let master_address =
        current_address(&resolver, namespace, graph.get(Role::MasterService)).await;
    let heartbeat = current_address(&resolver, namespace, graph.get(Role::HeartbeatService)).await;
    let api = current_address(&resolver, namespace, graph.get(Role::ApiService)).await;

    Ok(InfrastructureDescription {
        summary: summary(namespace, &master),
        graph,
        predictor,
        master: master_address,
        heartbeat,
        api,
    })
}
