//! Workflow metadata owned by the surrounding service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkflowStatus;

/// Listing and authorization record of a workflow
///
/// Written by the service that creates workflows; the engine only reads it to
/// decide whether a caller may signal a workflow. It plays no part in replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub workflow_id: String,
    pub project_id: String,
    pub task: String,
    pub status: WorkflowStatus,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_workflow_id: Option<String>,
    /// Optimistic-locking version maintained by the owner
    pub version: i64,
}

impl WorkflowMetadata {
    /// Create metadata for a freshly created workflow
    pub fn new(
        workflow_id: impl Into<String>,
        project_id: impl Into<String>,
        task: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            project_id: project_id.into(),
            task: task.into(),
            status: WorkflowStatus::Pending,
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            parent_workflow_id: None,
            version: 1,
        }
    }

    /// Set the parent workflow
    pub fn with_parent(mut self, parent_workflow_id: impl Into<String>) -> Self {
        self.parent_workflow_id = Some(parent_workflow_id.into());
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    /// Check if `owner_id` owns this workflow
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metadata() {
        let metadata = WorkflowMetadata::new("w1", "p1", "fix tests", "alice").with_parent("w0");

        assert_eq!(metadata.status, WorkflowStatus::Pending);
        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.parent_workflow_id.as_deref(), Some("w0"));
        assert!(metadata.is_owned_by("alice"));
        assert!(!metadata.is_owned_by("bob"));
    }
}
