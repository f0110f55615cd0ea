//! Structured lifecycle events
//!
//! Every mutation the control plane performs is reported as one `tracing`
//! event with an `event` field, so JSON log output can be filtered by it.

use tracing::{info, warn};

use crate::graph::ObjectKind;

/// Emits lifecycle events for one namespace
#[derive(Debug, Clone)]
pub struct EventLogger {
    namespace: String,
}

impl EventLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn object_created(&self, infrastructure: &str, kind: ObjectKind, name: &str) {
        info!(
            event = "object_created",
            namespace = %self.namespace,
            infrastructure = %infrastructure,
            kind = %kind,
            name = %name,
            "Created object"
        );
    }

    pub fn infrastructure_created(&self, infrastructure: &str, objects: usize) {
        info!(
            event = "infrastructure_created",
            namespace = %self.namespace,
            infrastructure = %infrastructure,
            objects = objects,
            "Infrastructure created"
        );
    }

    pub fn object_deleted(&self, infrastructure: &str, kind: ObjectKind, name: &str) {
        info!(
            event = "object_deleted",
            namespace = %self.namespace,
            infrastructure = %infrastructure,
            kind = %kind,
            name = %name,
            "Deleted object"
        );
    }

    /// An object named in the graph was already gone
    pub fn object_already_absent(&self, infrastructure: &str, kind: ObjectKind, name: &str) {
        warn!(
            event = "object_already_absent",
            namespace = %self.namespace,
            infrastructure = %infrastructure,
            kind = %kind,
            name = %name,
            "Object already absent, skipping"
        );
    }

    pub fn infrastructure_deleted(&self, infrastructure: &str, deleted: usize, missing: usize) {
        info!(
            event = "infrastructure_deleted",
            namespace = %self.namespace,
            infrastructure = %infrastructure,
            deleted = deleted,
            missing = missing,
            "Infrastructure deleted"
        );
    }

    pub fn artifact_uploaded(&self, uri: &str, bytes: usize) {
        info!(event = "artifact_uploaded", uri = %uri, bytes = bytes, "Uploaded executable");
    }

    pub fn artifact_reused(&self, uri: &str) {
        info!(event = "artifact_reused", uri = %uri, "Executable already staged, skipping upload");
    }

    pub fn job_submitted(
        &self,
        infrastructure: &str,
        job_type: &str,
        job_id: i32,
        executable: &str,
    ) {
        info!(
            event = "job_submitted",
            namespace = %self.namespace,
            infrastructure = %infrastructure,
            job_type = %job_type,
            job_id = job_id,
            executable = %executable,
            "Job submitted"
        );
    }

    pub fn job_finished(&self, job_id: i32, status: &str) {
        info!(
            event = "job_finished",
            namespace = %self.namespace,
            job_id = job_id,
            status = %status,
            "Job finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_logger_creation() {
        let logger = EventLogger::new("obi");
        assert_eq!(logger.namespace(), "obi");
        logger.object_created("infra1", ObjectKind::Service, "infra1-master-svc-1a2b3c4d");
    }
}
