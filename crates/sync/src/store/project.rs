//! Project store: the active project id and the known project list.
//!
//! The active project id lives in a `watch` channel. The persistence
//! middlewares hold receivers of it and skip writes for any project that
//! is no longer active.

use adcanvas_core::{EntityId, Project};
use tokio::sync::{watch, RwLock};

pub struct ProjectStore {
    current: watch::Sender<Option<EntityId>>,
    projects: RwLock<Vec<Project>>,
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStore {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            projects: RwLock::new(Vec::new()),
        }
    }

    pub fn current_project(&self) -> Option<EntityId> {
        *self.current.borrow()
    }

    pub fn set_current_project(&self, project_id: Option<EntityId>) {
        let previous = self.current.send_replace(project_id);
        if previous != project_id {
            tracing::debug!(?previous, current = ?project_id, "Active project changed");
        }
    }

    pub fn watch_current(&self) -> watch::Receiver<Option<EntityId>> {
        self.current.subscribe()
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.projects.read().await.clone()
    }

    pub async fn set_projects(&self, projects: Vec<Project>) {
        *self.projects.write().await = projects;
    }

    pub async fn get(&self, id: EntityId) -> Option<Project> {
        self.projects.read().await.iter().find(|p| p.id == id).cloned()
    }

    /// Insert `project` or replace the stored project with the same id.
    pub async fn upsert(&self, project: Project) {
        let mut projects = self.projects.write().await;
        match projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project,
            None => projects.push(project),
        }
    }

    pub async fn remove(&self, id: EntityId) -> bool {
        let mut projects = self.projects.write().await;
        let before = projects.len();
        projects.retain(|p| p.id != id);
        projects.len() != before
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str) -> Project {
        let now = chrono::Utc::now();
        Project {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            description: None,
            thumbnail_url: None,
            user_id: adcanvas_core::types::SINGLE_TENANT_USER_ID.into(),
            session_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn watchers_see_active_project_changes() {
        let store = ProjectStore::new();
        let mut rx = store.watch_current();
        let id = uuid::Uuid::new_v4();

        store.set_current_project(Some(id));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(id));
        assert_eq!(store.current_project(), Some(id));
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = ProjectStore::new();
        let mut p = project("Launch");
        store.upsert(p.clone()).await;
        p.name = "Launch v2".into();
        store.upsert(p.clone()).await;

        assert_eq!(store.projects().await.len(), 1);
        assert_eq!(store.get(p.id).await.unwrap().name, "Launch v2");
        assert!(store.remove(p.id).await);
        assert!(!store.remove(p.id).await);
    }
}
