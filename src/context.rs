//! Execution contexts an observation is assigned to

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of ids a metric definition may require from its callers.
///
/// The order of the variants is the canonical order used in error messages
/// and store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignmentKind {
    Schedule,
    Workflow,
    WorkflowVersion,
    Execution,
    Task,
}

impl AssignmentKind {
    /// All kinds, in canonical order
    pub const ALL: [AssignmentKind; 5] = [
        AssignmentKind::Schedule,
        AssignmentKind::Workflow,
        AssignmentKind::WorkflowVersion,
        AssignmentKind::Execution,
        AssignmentKind::Task,
    ];

    /// Canonical name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentKind::Schedule => "schedule",
            AssignmentKind::Workflow => "workflow",
            AssignmentKind::WorkflowVersion => "workflowVersion",
            AssignmentKind::Execution => "execution",
            AssignmentKind::Task => "task",
        }
    }
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete assignment of an observation: which schedule/workflow/execution/
/// task it belongs to. All ids are optional; a metric's definition declares
/// which subset is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
}

impl Context {
    /// Context with no ids set. Store queries treat it as "every context".
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if no id is set
    pub fn is_empty(&self) -> bool {
        self.provided_kinds().is_empty()
    }

    /// True if the id of the given kind is present
    pub fn provides(&self, kind: AssignmentKind) -> bool {
        match kind {
            AssignmentKind::Schedule => self.schedule_id.is_some(),
            AssignmentKind::Workflow => self.workflow_id.is_some(),
            AssignmentKind::WorkflowVersion => self.workflow_version_id.is_some(),
            AssignmentKind::Execution => self.execution_id.is_some(),
            AssignmentKind::Task => self.task_id.is_some(),
        }
    }

    /// The kinds whose ids are present, in canonical order
    pub fn provided_kinds(&self) -> Vec<AssignmentKind> {
        AssignmentKind::ALL
            .into_iter()
            .filter(|kind| self.provides(*kind))
            .collect()
    }

    /// Allow-list projection: a new context carrying only the ids of the
    /// given kinds. Ids of any other kind are dropped.
    pub fn project(&self, kinds: &[AssignmentKind]) -> Context {
        let mut projected = Context::default();
        for kind in kinds {
            match kind {
                AssignmentKind::Schedule => projected.schedule_id = self.schedule_id,
                AssignmentKind::Workflow => {
                    projected.workflow_id = self.workflow_id.clone()
                }
                AssignmentKind::WorkflowVersion => {
                    projected.workflow_version_id = self.workflow_version_id.clone()
                }
                AssignmentKind::Execution => projected.execution_id = self.execution_id,
                AssignmentKind::Task => projected.task_id = self.task_id,
            }
        }
        projected
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = self.schedule_id {
            parts.push(format!("scheduleId: {id}"));
        }
        if let Some(id) = &self.workflow_id {
            parts.push(format!("workflowId: \"{id}\""));
        }
        if let Some(id) = &self.workflow_version_id {
            parts.push(format!("workflowVersionId: \"{id}\""));
        }
        if let Some(id) = self.execution_id {
            parts.push(format!("executionId: {id}"));
        }
        if let Some(id) = self.task_id {
            parts.push(format!("taskId: {id}"));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}
