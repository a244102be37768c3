//! File-backed workflow store.
//!
//! All workflows live in one pretty-printed JSON document so users can read
//! and hand-edit their library. Writes go through a temp file and keep one
//! `.bak` generation of the previous document.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    tokio::{fs, sync::RwLock},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    store::{WorkflowStore, apply_patch},
    types::{Workflow, WorkflowPatch},
};

pub struct FileStore {
    path: PathBuf,
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl FileStore {
    /// Open the store at `path`, loading any existing document. A missing
    /// file is an empty store, not an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let workflows = match fs::read_to_string(&path).await {
            Ok(raw) => {
                let loaded: HashMap<String, Workflow> = serde_json::from_str(&raw)?;
                info!(path = %path.display(), count = loaded.len(), "loaded workflow store");
                loaded
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "workflow store file absent, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            workflows: RwLock::new(workflows),
        })
    }

    /// `$SOULPILOT_DATA_DIR/workflows.json`, falling back to
    /// `~/.soulpilot/workflows.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(dir) = std::env::var("SOULPILOT_DATA_DIR") {
            return PathBuf::from(dir).join("workflows.json");
        }
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".soulpilot")
            .join("workflows.json")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole document atomically: temp file, previous document
    /// renamed to `.bak`, temp renamed into place.
    async fn persist(&self) -> Result<()> {
        let snapshot = self.workflows.read().await.clone();
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;

        if fs::metadata(&self.path).await.is_ok() {
            let backup = self.path.with_extension("json.bak");
            if let Err(e) = fs::rename(&self.path, &backup).await {
                warn!(error = %e, "could not rotate workflow store backup");
            }
        }

        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = snapshot.len(), "persisted workflow store");
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for FileStore {
    async fn save(&self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
        self.persist().await
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
        let removed = self.workflows.write().await.remove(id).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let updated = {
            let mut workflows = self.workflows.write().await;
            let Some(existing) = workflows.get(id) else {
                return Err(Error::not_found(id));
            };
            let mut candidate = existing.clone();
            apply_patch(&mut candidate, patch);
            candidate.validate()?;
            workflows.insert(id.to_string(), candidate.clone());
            candidate
        };
        self.persist().await?;
        Ok(updated)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::Step;

    fn sample(name: &str) -> Workflow {
        let mut workflow = Workflow::new(name);
        workflow.steps = vec![Step::navigate("https://example.com"), Step::click("#go")];
        workflow
    }

    #[tokio::test]
    async fn save_and_reopen_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workflows.json");

        let workflow = sample("checkout");
        let id = workflow.id.clone();
        {
            let store = FileStore::open(&path).await.unwrap();
            store.save(workflow.clone()).await.unwrap();
        }

        let reopened = FileStore::open(&path).await.unwrap();
        let loaded = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded, workflow);
    }

    #[tokio::test]
    async fn second_write_keeps_a_backup_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workflows.json");
        let store = FileStore::open(&path).await.unwrap();

        store.save(sample("one")).await.unwrap();
        store.save(sample("two")).await.unwrap();

        assert!(path.exists());
        assert!(path.with_extension("json.bak").exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn save_rejects_empty_id() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("workflows.json")).await.unwrap();

        let mut workflow = sample("broken");
        workflow.id = String::new();
        assert!(matches!(
            store.save(workflow).await,
            Err(Error::MissingId)
        ));
    }

    #[tokio::test]
    async fn update_patches_only_provided_fields() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("workflows.json")).await.unwrap();

        let workflow = sample("original");
        let id = workflow.id.clone();
        store.save(workflow).await.unwrap();

        let patch = WorkflowPatch {
            name: Some("renamed".into()),
            ..WorkflowPatch::default()
        };
        let updated = store.update(&id, patch).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.steps.len(), 2);
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("workflows.json")).await.unwrap();
        let result = store.update("ghost", WorkflowPatch::default()).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_missing_returns_false() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("workflows.json")).await.unwrap();
        assert!(!store.delete("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn list_orders_by_creation_time() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("workflows.json")).await.unwrap();

        let mut first = sample("first");
        first.created_at = 100;
        let mut second = sample("second");
        second.created_at = 200;

        store.save(second).await.unwrap();
        store.save(first).await.unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
