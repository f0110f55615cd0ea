//! Control plane for per-tenant OBI infrastructures
//!
//! This crate provides:
//! - Creation of an infrastructure's object graph on the orchestration platform
//! - Resolution of a live master address for an existing infrastructure
//! - Idempotent teardown from nothing but the infrastructure name
//! - Job submission with content-addressed executable staging
//! - Job status lookups and waiting through the infrastructure's API service
//!
//! The platform is the only store of state: relationships between objects are
//! kept as annotations on the master workload.

pub mod config;
pub mod error;
pub mod graph;
pub mod inventory;
pub mod naming;
pub mod observability;
pub mod platform;
pub mod proto;
pub mod resolver;
pub mod submit;
pub mod teardown;

pub use config::{InfrastructureDescriptor, InfrastructureSpec, Settings};
pub use error::{ObiError, Result};
pub use graph::{
    CreatedInfrastructure, InfrastructureBuilder, ObjectKind, ObjectSet, ResourceGraph, Role,
};
pub use inventory::{InfrastructureDescription, InfrastructureSummary};
pub use naming::NameGenerator;
pub use observability::EventLogger;
pub use platform::{InMemoryPlatform, KubePlatform, Platform, PlatformError};
pub use resolver::{ConnectionResolver, Endpoint, PollConfig};
pub use submit::{JobInfo, JobRequest, JobSubmitter, JobType, SubmissionReceipt};
pub use teardown::{TeardownEngine, TeardownReport};
