//! Job status from an infrastructure's API service
//!
//! The API service fronts the master's job table over HTTP. A bearer token
//! is obtained from `/api/login` with the same credentials the master checks
//! on submission, then `/api/job/{id}` and `/api/jobs` return table rows.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::error::{ObiError, Result};
use crate::graph::Role;
use crate::observability::EventLogger;
use crate::platform::Platform;
use crate::resolver::{ConnectionResolver, Endpoint, PollConfig};

/// One row of the master's job table
///
/// Column names arrive lowercased from the database, so each field also
/// accepts the lowercase spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    #[serde(default)]
    pub id: Option<i32>,

    #[serde(default, alias = "clustername")]
    pub cluster_name: Option<String>,

    pub status: String,

    #[serde(default, alias = "creationtimestamp")]
    pub creation_timestamp: Option<String>,

    #[serde(default, alias = "executablepath")]
    pub executable_path: Option<String>,

    #[serde(default, rename = "type")]
    pub job_type: Option<String>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub arguments: Option<String>,

    #[serde(default, alias = "driveroutputuri")]
    pub driver_output_uri: Option<String>,
}

impl JobInfo {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("completed")
    }

    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case("failed")
    }
}

/// The API answers with a bare object when exactly one row matches
#[derive(Deserialize)]
#[serde(untagged)]
enum Rows {
    Many(Vec<JobInfo>),
    One(JobInfo),
}

impl From<Rows> for Vec<JobInfo> {
    fn from(rows: Rows) -> Self {
        match rows {
            Rows::Many(jobs) => jobs,
            Rows::One(job) => vec![job],
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job(&self, job_id: i32) -> Result<JobInfo>;
}

pub struct JobApiClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl JobApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ObiError::InvalidConfiguration(format!("job API url: {}", e)))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
        })
    }

    pub fn for_endpoint(scheme: &str, endpoint: &Endpoint) -> Result<Self> {
        Self::new(&format!("{}://{}/", scheme, endpoint))
    }

    /// Client for the named infrastructure's API service, logged in when
    /// settings carry credentials
    pub async fn connect<P: Platform + ?Sized>(
        platform: &P,
        settings: &Settings,
        namespace: &str,
        infrastructure: &str,
    ) -> Result<Self> {
        let endpoint = ConnectionResolver::new(platform, settings.poll_config())
            .resolve_role(namespace, infrastructure, Role::ApiService)
            .await?;
        let mut client = Self::for_endpoint(&settings.api_scheme, &endpoint)?;

        if let (Some(username), Some(password)) = (&settings.rpc_username, &settings.rpc_password)
        {
            client.login(username, password).await?;
        }
        Ok(client)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Exchange credentials for a bearer token used on every later request
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&["api", "login"])?)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| ObiError::JobApi(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ObiError::JobApi(format!("login returned {}", status)));
        }

        let token = response
            .text()
            .await
            .map_err(|e| ObiError::JobApi(e.to_string()))?;
        self.token = Some(token.trim().to_string());
        Ok(())
    }

    /// Jobs filtered by infrastructure and status prefix
    pub async fn jobs(&self, cluster: Option<&str>, status: Option<&str>) -> Result<Vec<JobInfo>> {
        let mut url = self.endpoint(&["api", "jobs"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(cluster) = cluster {
                query.append_pair("cluster", cluster);
            }
            if let Some(status) = status {
                query.append_pair("status", status);
            }
        }

        let response = self.get(url).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let rows: Rows = Self::parse(response).await?;
        Ok(rows.into())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ObiError::InvalidConfiguration("job API url cannot be a base".to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let request = self.client.get(url);
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request
            .send()
            .await
            .map_err(|e| ObiError::JobApi(e.to_string()))
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(ObiError::JobApi(format!("{} returned {}", response.url(), status)));
        }
        response
            .json()
            .await
            .map_err(|e| ObiError::JobApi(e.to_string()))
    }
}

#[async_trait]
impl JobStatusSource for JobApiClient {
    async fn job(&self, job_id: i32) -> Result<JobInfo> {
        let id = job_id.to_string();
        let response = self.get(self.endpoint(&["api", "job", &id])?).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObiError::JobNotFound { job_id });
        }

        let rows: Vec<JobInfo> = Self::parse::<Rows>(response).await?.into();
        rows.into_iter()
            .next()
            .ok_or(ObiError::JobNotFound { job_id })
    }
}

/// Poll a job until it completes or fails
///
/// A failed job is an error carrying the driver output location.
pub async fn wait_for_job(
    source: &dyn JobStatusSource,
    job_id: i32,
    poll: PollConfig,
    events: &EventLogger,
) -> Result<JobInfo> {
    let job = match poll.timeout {
        Some(limit) => tokio::time::timeout(limit, poll_job(source, job_id, poll))
            .await
            .map_err(|_| ObiError::JobWaitTimeout {
                job_id,
                waited: limit,
            })??,
        None => poll_job(source, job_id, poll).await?,
    };

    events.job_finished(job_id, &job.status);
    if job.is_failed() {
        return Err(ObiError::JobFailed {
            job_id,
            driver_output_uri: job.driver_output_uri,
        });
    }
    Ok(job)
}

async fn poll_job(source: &dyn JobStatusSource, job_id: i32, poll: PollConfig) -> Result<JobInfo> {
    loop {
        let job = source.job(job_id).await?;
        if job.is_completed() || job.is_failed() {
            return Ok(job);
        }
        debug!(
            job_id = job_id,
            status = %job.status,
            retry_in_secs = poll.interval.as_secs_f64(),
            "Waiting for job to finish"
        );
        tokio::time::sleep(poll.interval).await;
    }
}
