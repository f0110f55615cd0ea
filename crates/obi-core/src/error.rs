//! Error taxonomy for control-plane operations

use std::time::Duration;

use crate::platform::PlatformError;

pub type Result<T> = std::result::Result<T, ObiError>;

#[derive(Debug, thiserror::Error)]
pub enum ObiError {
    /// A mandatory descriptor or settings field is absent
    #[error("configuration error: missing mandatory field \"{field}\"")]
    Configuration { field: String },

    #[error("configuration error: {0}")]
    InvalidConfiguration(String),

    #[error("infrastructure \"{name}\" already exists")]
    AlreadyExists { name: String },

    #[error("infrastructure \"{name}\" not found")]
    InfrastructureNotFound { name: String },

    #[error("service \"{service}\" is unreachable: {reason}")]
    ServiceUnreachable { service: String, reason: String },

    #[error("timed out after {waited:?} waiting for an address on service \"{service}\"")]
    Timeout { service: String, waited: Duration },

    #[error("unsupported job type \"{requested}\", valid types are {supported:?}")]
    UnsupportedJobType {
        requested: String,
        supported: Vec<String>,
    },

    #[error("platform operation {operation} failed: {source}")]
    Platform {
        operation: String,
        #[source]
        source: PlatformError,
    },

    #[error("artifact storage error: {0}")]
    Storage(String),

    #[error("job dispatch failed: {0}")]
    Dispatch(String),

    #[error("master of \"{infrastructure}\" rejected the job submission")]
    SubmissionRejected { infrastructure: String },

    #[error("job status API error: {0}")]
    JobApi(String),

    #[error("timed out after {waited:?} waiting for job {job_id} to finish")]
    JobWaitTimeout { job_id: i32, waited: Duration },

    #[error("job {job_id} not found")]
    JobNotFound { job_id: i32 },

    #[error(
        "job {job_id} failed, driver output: {}",
        driver_output_uri.as_deref().unwrap_or("unavailable")
    )]
    JobFailed {
        job_id: i32,
        driver_output_uri: Option<String>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ObiError {
    pub fn configuration(field: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
        }
    }

    pub fn platform(operation: impl Into<String>, source: PlatformError) -> Self {
        Self::Platform {
            operation: operation.into(),
            source,
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<config::ConfigError> for ObiError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(field) => Self::Configuration { field },
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_field() {
        let err = ObiError::configuration("projectId");
        assert!(err.to_string().contains("\"projectId\""));
    }

    #[test]
    fn test_unsupported_job_type_lists_valid_types() {
        let err = ObiError::UnsupportedJobType {
            requested: "Unsupported".to_string(),
            supported: vec!["PySpark".to_string()],
        };
        assert!(err.to_string().contains("[\"PySpark\"]"));
    }

    #[test]
    fn test_job_failed_points_at_driver_output() {
        let err = ObiError::JobFailed {
            job_id: 7,
            driver_output_uri: Some("gs://bkt/out/driver.log".to_string()),
        };
        assert_eq!(err.to_string(), "job 7 failed, driver output: gs://bkt/out/driver.log");

        let err = ObiError::JobFailed {
            job_id: 7,
            driver_output_uri: None,
        };
        assert!(err.to_string().ends_with("unavailable"));
    }
}
