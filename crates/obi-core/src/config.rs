//! Client settings and infrastructure descriptors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ObiError, Result};
use crate::resolver::PollConfig;

/// Control-plane settings
///
/// Loaded from defaults, an optional settings file and `OBI_*` environment
/// variables, in increasing precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Namespace infrastructures live in unless the descriptor says otherwise
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_master_image")]
    pub master_image: String,

    #[serde(default = "default_predictor_image")]
    pub predictor_image: String,

    #[serde(default = "default_api_image")]
    pub api_image: String,

    /// Job submission port on the master (TCP)
    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// Heartbeat ingestion port on the master (UDP)
    #[serde(default = "default_heartbeat_port")]
    pub heartbeat_port: u16,

    #[serde(default = "default_predictor_port")]
    pub predictor_port: u16,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Bucket local executables are uploaded to
    #[serde(default = "default_artifact_bucket")]
    pub artifact_bucket: String,

    /// Key prefix for uploaded executables
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,

    #[serde(default = "default_storage_url")]
    pub storage_url: String,

    /// OAuth access token for the storage API
    #[serde(default)]
    pub storage_token: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on waiting for a load balancer address, 0 waits forever
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_rpc_connect_timeout")]
    pub rpc_connect_timeout_secs: u64,

    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    #[serde(default)]
    pub rpc_username: Option<String>,

    #[serde(default)]
    pub rpc_password: Option<String>,

    /// CA certificate; when set the master is reached over TLS
    #[serde(default)]
    pub rpc_ca_cert_path: Option<PathBuf>,

    /// Scheme of the job status API behind the api service
    #[serde(default = "default_api_scheme")]
    pub api_scheme: String,

    /// Delay between job status requests while waiting for a job
    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_secs: u64,

    /// Upper bound on waiting for a job to finish, 0 waits forever
    #[serde(default)]
    pub job_wait_timeout_secs: u64,
}

fn default_namespace() -> String {
    "obi".to_string()
}

fn default_master_image() -> String {
    "obi/master:latest".to_string()
}

fn default_predictor_image() -> String {
    "obi/predictor:latest".to_string()
}

fn default_api_image() -> String {
    "obi/api:latest".to_string()
}

fn default_master_port() -> u16 {
    8081
}

fn default_heartbeat_port() -> u16 {
    8080
}

fn default_predictor_port() -> u16 {
    50051
}

fn default_api_port() -> u16 {
    8083
}

fn default_artifact_bucket() -> String {
    "obi-artifacts".to_string()
}

fn default_artifact_prefix() -> String {
    "tmp".to_string()
}

fn default_storage_url() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_timeout() -> u64 {
    600
}

fn default_rpc_connect_timeout() -> u64 {
    10
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_api_scheme() -> String {
    "http".to_string()
}

fn default_job_poll_interval() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            master_image: default_master_image(),
            predictor_image: default_predictor_image(),
            api_image: default_api_image(),
            master_port: default_master_port(),
            heartbeat_port: default_heartbeat_port(),
            predictor_port: default_predictor_port(),
            api_port: default_api_port(),
            artifact_bucket: default_artifact_bucket(),
            artifact_prefix: default_artifact_prefix(),
            storage_url: default_storage_url(),
            storage_token: None,
            poll_interval_secs: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            rpc_connect_timeout_secs: default_rpc_connect_timeout(),
            rpc_timeout_secs: default_rpc_timeout(),
            rpc_username: None,
            rpc_password: None,
            rpc_ca_cert_path: None,
            api_scheme: default_api_scheme(),
            job_poll_interval_secs: default_job_poll_interval(),
            job_wait_timeout_secs: 0,
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus `OBI_*` environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("OBI").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            timeout: match self.poll_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// Polling used by `--wait` on submitted jobs
    pub fn job_poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.job_poll_interval_secs.max(1)),
            timeout: match self.job_wait_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Connection parameters for the master's job database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database_name")]
    pub name: String,
}

fn default_database_port() -> u16 {
    5432
}

fn default_database_name() -> String {
    "postgres".to_string()
}

/// One priority level of the master's job packing scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingLevel {
    /// 0 packs by accumulated duration, 1 by job count
    #[serde(default)]
    pub policy: i32,
    /// Seconds a bin may wait before it is flushed
    pub timeout: i32,
    pub bin_capacity: i32,
    #[serde(default)]
    pub autoscaling_factor: f32,
}

/// User description of an infrastructure, read once per create
///
/// Keys are camelCase. Map keys such as priority names are user data and
/// keep their case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    /// Service account for the compute platform the master drives
    #[serde(default)]
    pub compute_credentials_path: Option<PathBuf>,
    /// Service account for object storage
    #[serde(default)]
    pub storage_credentials_path: Option<PathBuf>,
    /// Bucket mounted into the predictor
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub scheduling_levels: Vec<SchedulingLevel>,
    #[serde(default)]
    pub priority_map: BTreeMap<String, i32>,
    #[serde(default)]
    pub autoscaling_factor_one_job_one_cluster: Option<f32>,
    #[serde(default, rename = "autoscalingFactorOneJobOneClusterHP")]
    pub autoscaling_factor_one_job_one_cluster_hp: Option<f32>,
}

/// A descriptor whose mandatory fields are known to be present
#[derive(Debug, Clone)]
pub struct InfrastructureSpec {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub project_id: String,
    pub region: String,
    pub zone: String,
    pub compute_credentials_path: PathBuf,
    pub storage_credentials_path: PathBuf,
    pub bucket: Option<String>,
    pub database: Option<DatabaseConfig>,
    pub scheduling_levels: Vec<SchedulingLevel>,
    pub priority_map: BTreeMap<String, i32>,
    pub autoscaling_factor_one_job_one_cluster: f32,
    pub autoscaling_factor_one_job_one_cluster_hp: f32,
}

fn required<T: Clone>(value: &Option<T>, field: &str) -> Result<T> {
    value.clone().ok_or_else(|| ObiError::configuration(field))
}

fn required_text(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ObiError::configuration(field)),
    }
}

impl InfrastructureDescriptor {
    /// Read a descriptor file (JSON or TOML by extension, YAML otherwise)
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ObiError::io(path, e))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let invalid = |e: &dyn std::fmt::Display| {
            ObiError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        };

        match extension.as_deref() {
            Some("json") => serde_json::from_str(&text).map_err(|e| invalid(&e)),
            Some("toml") => toml::from_str(&text).map_err(|e| invalid(&e)),
            _ => serde_yaml::from_str(&text).map_err(|e| invalid(&e)),
        }
    }

    /// Check mandatory fields, naming the first one that is missing
    pub fn validate(&self) -> Result<InfrastructureSpec> {
        let compute_credentials_path =
            required(&self.compute_credentials_path, "computeCredentialsPath")?;
        let storage_credentials_path =
            required(&self.storage_credentials_path, "storageCredentialsPath")?;
        let project_id = required_text(&self.project_id, "projectId")?;
        let region = required_text(&self.region, "region")?;
        let zone = required_text(&self.zone, "zone")?;

        Ok(InfrastructureSpec {
            name: self.name.clone().filter(|n| !n.trim().is_empty()),
            namespace: self.namespace.clone().filter(|n| !n.trim().is_empty()),
            project_id,
            region,
            zone,
            compute_credentials_path,
            storage_credentials_path,
            bucket: self.bucket.clone().filter(|b| !b.trim().is_empty()),
            database: self.database.clone(),
            scheduling_levels: self.scheduling_levels.clone(),
            priority_map: self.priority_map.clone(),
            autoscaling_factor_one_job_one_cluster: self
                .autoscaling_factor_one_job_one_cluster
                .unwrap_or(1.0),
            autoscaling_factor_one_job_one_cluster_hp: self
                .autoscaling_factor_one_job_one_cluster_hp
                .unwrap_or(1.0),
        })
    }
}
