//! Job submission pipeline
//!
//! A submission is checked, its executable staged, the target master
//! resolved and the request dispatched, in that order. Nothing reaches
//! storage or the network before the job type and infrastructure name have
//! been accepted.

pub mod dispatch;
pub mod status;
pub mod storage;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::config::Settings;
use crate::error::{ObiError, Result};
use crate::naming;
use crate::observability::EventLogger;
use crate::platform::Platform;
use crate::proto::{JobSubmissionRequest, WireJobType};
use crate::resolver::{ConnectionResolver, Endpoint};

pub use dispatch::{GrpcDispatcher, JobDispatcher, RpcCredentials};
pub use status::{wait_for_job, JobApiClient, JobInfo, JobStatusSource};
pub use storage::{content_key, content_prefix, stage_executable, ArtifactStore, GcsStore};

/// Job kinds the master protocol declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobType {
    PySpark,
}

impl JobType {
    pub const ALL: [JobType; 1] = [JobType::PySpark];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PySpark => "PySpark",
        }
    }

    pub fn supported() -> Vec<String> {
        Self::ALL.iter().map(|t| t.as_str().to_string()).collect()
    }

    fn wire(&self) -> WireJobType {
        match self {
            JobType::PySpark => WireJobType::Pyspark,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ObiError;

    /// Accepts the display name or the protocol's enum name, in any case
    fn from_str(s: &str) -> Result<Self> {
        let requested = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| {
                requested.eq_ignore_ascii_case(t.as_str())
                    || requested.eq_ignore_ascii_case(t.wire().as_str_name())
            })
            .ok_or_else(|| ObiError::UnsupportedJobType {
                requested: s.to_string(),
                supported: Self::supported(),
            })
    }
}

/// A job as the user asked for it
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub infrastructure: String,
    /// Local path or remote URI
    pub executable: String,
    pub job_type: String,
    pub priority: i32,
    /// Argument vector as captured, program token first
    pub argv: Vec<String>,
}

impl JobRequest {
    /// Argument string sent to the master: the program token is dropped
    /// whole, even when it contains spaces, and the remaining arguments are
    /// joined by single spaces
    pub fn job_args(&self) -> String {
        self.argv
            .iter()
            .skip(1)
            .flat_map(|arg| arg.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What the master accepted
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub infrastructure: String,
    pub job_id: i32,
    pub job_type: JobType,
    /// Executable reference after staging
    pub executable: String,
    pub master: Endpoint,
}

pub struct JobSubmitter<'a, P: ?Sized> {
    platform: &'a P,
    settings: &'a Settings,
    store: &'a dyn ArtifactStore,
    dispatcher: &'a dyn JobDispatcher,
}

impl<'a, P: Platform + ?Sized> JobSubmitter<'a, P> {
    pub fn new(
        platform: &'a P,
        settings: &'a Settings,
        store: &'a dyn ArtifactStore,
        dispatcher: &'a dyn JobDispatcher,
    ) -> Self {
        Self {
            platform,
            settings,
            store,
            dispatcher,
        }
    }

    pub async fn submit(
        &self,
        namespace: &str,
        request: &JobRequest,
    ) -> Result<SubmissionReceipt> {
        let job_type: JobType = request.job_type.parse()?;
        if !naming::is_valid_name(&request.infrastructure) {
            return Err(ObiError::InvalidConfiguration(format!(
                "invalid infrastructure name \"{}\"",
                request.infrastructure
            )));
        }

        let events = EventLogger::new(namespace);
        let executable = stage_executable(
            self.store,
            &self.settings.artifact_prefix,
            &request.executable,
            &events,
        )
        .await?;

        let master = ConnectionResolver::new(self.platform, self.settings.poll_config())
            .resolve(namespace, &request.infrastructure)
            .await?;

        let wire = JobSubmissionRequest {
            executable_path: executable.clone(),
            infrastructure: request.infrastructure.clone(),
            r#type: job_type.wire() as i32,
            job_args: request.job_args(),
            priority: request.priority,
        };
        let response = self.dispatcher.submit(&master, wire).await?;
        if !response.succeeded {
            return Err(ObiError::SubmissionRejected {
                infrastructure: request.infrastructure.clone(),
            });
        }

        events.job_submitted(
            &request.infrastructure,
            job_type.as_str(),
            response.job_id,
            &executable,
        );
        Ok(SubmissionReceipt {
            infrastructure: request.infrastructure.clone(),
            job_id: response.job_id,
            job_type,
            executable,
            master,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(argv: &[&str]) -> JobRequest {
        JobRequest {
            infrastructure: "infra1".to_string(),
            executable: "gs://bkt/job.py".to_string(),
            job_type: "PySpark".to_string(),
            priority: 0,
            argv: argv.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_job_type_parsing() {
        assert_eq!("PySpark".parse::<JobType>().unwrap(), JobType::PySpark);
        assert_eq!("pyspark".parse::<JobType>().unwrap(), JobType::PySpark);
        assert_eq!("PYSPARK".parse::<JobType>().unwrap(), JobType::PySpark);

        match "Unsupported".parse::<JobType>() {
            Err(ObiError::UnsupportedJobType { requested, supported }) => {
                assert_eq!(requested, "Unsupported");
                assert_eq!(supported, vec!["PySpark".to_string()]);
            }
            other => panic!("expected unsupported job type, got {:?}", other),
        }
    }

    #[test]
    fn test_job_args_drop_first_token() {
        assert_eq!(request(&["job.py", "--input", "a b"]).job_args(), "--input a b");
        assert_eq!(request(&["job.py"]).job_args(), "");
        assert_eq!(request(&[]).job_args(), "");
    }

    #[test]
    fn test_job_args_program_path_with_spaces() {
        let args = request(&["/home/me/my job.py", "--epochs", "3"]).job_args();
        assert_eq!(args, "--epochs 3");
    }
}
