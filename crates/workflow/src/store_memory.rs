//! In-memory workflow store for tests and embedders without persistence.

use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{
    error::{Error, Result},
    store::{WorkflowStore, apply_patch},
    types::{Workflow, WorkflowPatch},
};

#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save(&self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        let mut all: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }

    async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let mut workflows = self.workflows.write().await;
        let Some(existing) = workflows.get(id) else {
            return Err(Error::not_found(id));
        };
        let mut candidate = existing.clone();
        apply_patch(&mut candidate, patch);
        candidate.validate()?;
        workflows.insert(id.to_string(), candidate.clone());
        Ok(candidate)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Step;

    #[tokio::test]
    async fn crud_cycle() {
        let store = MemoryStore::new();
        let mut workflow = Workflow::new("smoke");
        workflow.steps = vec![Step::screenshot()];
        let id = workflow.id.clone();

        store.save(workflow).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);

        let updated = store
            .update(
                &id,
                WorkflowPatch {
                    description: Some("nightly smoke run".into()),
                    ..WorkflowPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("nightly smoke run"));

        assert!(store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
