use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Destination helpers for the topics the backend publishes on
pub mod topics {
    /// Task list changes
    pub const TASKS: &str = "/topic/tasks";

    /// Status updates for a single task
    pub fn task(task_id: impl std::fmt::Display) -> String {
        format!("{}/{}", TASKS, task_id)
    }

    /// Events for a single agent
    pub fn agent(agent_id: impl std::fmt::Display) -> String {
        format!("/topic/agents/{}", agent_id)
    }
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Generating,
    Generated,
    CommitPending,
    Committed,
    PushPending,
    Pushed,
    PrCreated,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// How far a task's changes have travelled through git
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GitPhase {
    None,
    Committed,
    Pushed,
    PrCreated,
}

/// Payload published on `/topic/tasks/{id}` when an agent reports progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdate {
    /// Always `STATUS_UPDATE`
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Raw status reported by the agent
    pub status: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_commit_hash: String,
    #[serde(default)]
    pub git_pr_url: String,
    /// Local time of the broker host, without offset
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
}

impl TaskStatusUpdate {
    pub const TYPE: &'static str = "STATUS_UPDATE";

    /// `status` as a known [`TaskStatus`], if it is one.
    pub fn task_status(&self) -> Option<TaskStatus> {
        serde_json::from_value(serde_json::Value::String(self.status.clone())).ok()
    }

    pub fn has_pull_request(&self) -> bool {
        !self.git_pr_url.is_empty()
    }
}
