//! Workflow persistence trait.

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{Workflow, WorkflowPatch},
};

/// CRUD surface over a workflow collection. Implementations validate
/// workflows on every write.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a workflow by id.
    async fn save(&self, workflow: Workflow) -> Result<()>;

    /// Fetch one workflow.
    async fn get(&self, id: &str) -> Result<Option<Workflow>>;

    /// All workflows, ordered by creation time ascending.
    async fn list(&self) -> Result<Vec<Workflow>>;

    /// Remove a workflow. Returns `false` when `id` was not present.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Apply a partial update, returning the updated workflow.
    async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow>;
}

pub(crate) fn apply_patch(workflow: &mut Workflow, patch: WorkflowPatch) {
    if let Some(name) = patch.name {
        workflow.name = name;
    }
    if let Some(description) = patch.description {
        workflow.description = Some(description);
    }
    if let Some(steps) = patch.steps {
        workflow.steps = steps;
    }
    if let Some(parameters) = patch.parameters {
        workflow.parameters = Some(parameters);
    }
}
