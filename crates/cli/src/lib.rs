//! Library half of the `adcanvas-sync` binary: argument parsing and the
//! commands themselves, kept here so they can run against a fake backend.

pub mod command;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use adcanvas_client::api::ProjectPatch;
use adcanvas_client::{DrainOutcome, PersistenceApi};
use adcanvas_core::{EntityId, Project};
use adcanvas_sync::{PersistenceManager, Stores, SyncSettings};

pub use command::{Cli, Command};

/// What a hydrated project session holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationSummary {
    pub project_id: EntityId,
    pub messages_by_type: BTreeMap<&'static str, usize>,
    pub objects_by_kind: BTreeMap<&'static str, usize>,
}

impl HydrationSummary {
    pub async fn from_stores(project_id: EntityId, stores: &Stores) -> Self {
        let mut messages_by_type = BTreeMap::new();
        for message in stores.chat.messages().await {
            *messages_by_type.entry(message.kind.as_str()).or_insert(0) += 1;
        }
        let mut objects_by_kind = BTreeMap::new();
        for object in stores.canvas.objects().await {
            *objects_by_kind.entry(object.kind.as_str()).or_insert(0) += 1;
        }
        Self {
            project_id,
            messages_by_type,
            objects_by_kind,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages_by_type.values().sum()
    }

    pub fn object_count(&self) -> usize {
        self.objects_by_kind.values().sum()
    }
}

impl fmt::Display for HydrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "project {}", self.project_id)?;
        writeln!(f, "  messages: {}", self.message_count())?;
        for (kind, count) in &self.messages_by_type {
            writeln!(f, "    {kind}: {count}")?;
        }
        writeln!(f, "  canvas objects: {}", self.object_count())?;
        for (kind, count) in &self.objects_by_kind {
            writeln!(f, "    {kind}: {count}")?;
        }
        Ok(())
    }
}

/// Fetch all projects, most recently updated first.
pub async fn list_projects(api: &PersistenceApi) -> anyhow::Result<Vec<Project>> {
    let mut projects = api.list_projects().await?;
    projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(projects)
}

/// Open a session on `project_id`, hydrate it and tear it down again.
pub async fn hydrate(
    api: Arc<PersistenceApi>,
    settings: &SyncSettings,
    project_id: EntityId,
) -> anyhow::Result<HydrationSummary> {
    let stores = Stores::new();
    let manager = PersistenceManager::new(api, stores.clone(), settings.persistence_config(Some(project_id)));

    let result = manager.initialize().await;
    let summary = HydrationSummary::from_stores(project_id, &stores).await;
    manager.dispose().await;

    result?;
    Ok(summary)
}

/// Rename `project_id` through the manager's offline queue.
pub async fn rename(
    api: Arc<PersistenceApi>,
    settings: &SyncSettings,
    project_id: EntityId,
    name: String,
) -> anyhow::Result<Project> {
    let stores = Stores::new();
    let manager = PersistenceManager::new(api, stores.clone(), settings.persistence_config(Some(project_id)));

    let patch = ProjectPatch {
        name: Some(name),
        ..ProjectPatch::default()
    };
    let outcome = manager.queue_project_update(patch).await;
    manager.dispose().await;

    match outcome? {
        DrainOutcome::Drained => {}
        DrainOutcome::Stalled { error, .. } => return Err(error.into()),
        DrainOutcome::Deferred => anyhow::bail!("rename was deferred behind another update"),
    }
    stores
        .project
        .get(project_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("project {project_id} missing after update"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use adcanvas_client::mock::MockBackend;
    use adcanvas_client::{ClientError, Method, RetryPolicy};
    use adcanvas_core::{CanvasObjectType, MessageRole, MessageType};
    use assert_matches::assert_matches;

    use super::*;

    fn api(backend: &Arc<MockBackend>) -> Arc<PersistenceApi> {
        Arc::new(PersistenceApi::new(backend.clone(), RetryPolicy::none()))
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_summarises_project() {
        let backend = Arc::new(MockBackend::new());
        let project = backend.seed_project("Launch").await;
        backend
            .seed_message(project.id, MessageRole::User, "brief", MessageType::Text, vec![])
            .await;
        backend
            .seed_message(project.id, MessageRole::Assistant, "ad", MessageType::AgentOutput, vec![])
            .await;
        backend
            .seed_object(project.id, CanvasObjectType::Image, 0.0, 0.0, 100.0, 100.0)
            .await;

        let summary = hydrate(api(&backend), &SyncSettings::default(), project.id)
            .await
            .unwrap();

        assert_eq!(summary.message_count(), 2);
        assert_eq!(summary.messages_by_type.get("agent_output"), Some(&1));
        assert_eq!(summary.object_count(), 1);
        assert!(summary.to_string().contains("canvas objects: 1"));
        assert!(backend.writes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_reports_api_failure() {
        let backend = Arc::new(MockBackend::new());
        let project = backend.seed_project("Launch").await;
        backend.fail_requests(Method::GET, "/chat", 500).await;

        let err = hydrate(api(&backend), &SyncSettings::default(), project.id)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Hydration failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn rename_goes_through_queue() {
        let backend = Arc::new(MockBackend::new());
        let project = backend.seed_project("Launch").await;

        let renamed = rename(api(&backend), &SyncSettings::default(), project.id, "Relaunch".into())
            .await
            .unwrap();

        assert_eq!(renamed.name, "Relaunch");
        assert_eq!(backend.requests_to(Method::PATCH, &project.id.to_string()).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rename_surfaces_stalled_update() {
        let backend = Arc::new(MockBackend::new());
        let project = backend.seed_project("Launch").await;
        backend.fail_requests(Method::PATCH, "/api/projects", 404).await;

        let err = rename(api(&backend), &SyncSettings::default(), project.id, "Relaunch".into())
            .await
            .unwrap_err();

        assert_matches!(err.downcast_ref::<ClientError>(), Some(ClientError::Api { status: 404, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn projects_are_listed_newest_first() {
        let backend = Arc::new(MockBackend::new());
        let older = backend.seed_project("Older").await;
        let newer = backend.seed_project("Newer").await;

        let projects = list_projects(&api(&backend)).await.unwrap();

        let ids: Vec<_> = projects.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
