//! Persistence session for one project.
//!
//! [`PersistenceManager`] owns the chat and canvas middlewares, the chat
//! cache and the offline queue for project metadata. It is constructed
//! explicitly per session and torn down with [`PersistenceManager::dispose`].
//!
//! Lifecycle:
//!
//! 1. `new` spawns both middleware workers, write-through off.
//! 2. `initialize` marks the project active, fetches chat history and
//!    canvas objects in parallel, and only when both fetches succeed
//!    replaces the stores and turns write-through on.
//! 3. `update_config` with a different project disables write-through,
//!    resets both middlewares for the new project and initializes again.
//! 4. `dispose` flushes pending writes and stops the workers.

use std::sync::Arc;
use std::time::Duration;

use adcanvas_client::api::ProjectPatch;
use adcanvas_client::{DrainOutcome, OfflineQueue, PersistenceApi};
use adcanvas_core::EntityId;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheConfig, ChatCache};
use crate::error::PersistenceError;
use crate::events::{Resource, SyncEvent, EVENT_CHANNEL_CAPACITY};
use crate::hydration;
use crate::middleware::{
    CanvasTarget, ChatTarget, Fence, Middleware, MiddlewareConfig, CANVAS_DEBOUNCE, CHAT_DEBOUNCE,
};
use crate::store::Stores;

/// Configuration of a persistence session.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceConfig {
    pub project_id: Option<EntityId>,
    pub enabled: bool,
    pub chat_debounce: Duration,
    pub canvas_debounce: Duration,
    /// Read once at construction.
    pub cache: CacheConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            enabled: true,
            chat_debounce: CHAT_DEBOUNCE,
            canvas_debounce: CANVAS_DEBOUNCE,
            cache: CacheConfig::default(),
        }
    }
}

impl PersistenceConfig {
    pub fn for_project(project_id: EntityId) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }

    fn chat_middleware(&self, enabled: bool) -> MiddlewareConfig {
        MiddlewareConfig {
            project_id: self.project_id,
            debounce: self.chat_debounce,
            enabled,
        }
    }

    fn canvas_middleware(&self, enabled: bool) -> MiddlewareConfig {
        MiddlewareConfig {
            project_id: self.project_id,
            debounce: self.canvas_debounce,
            enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initialized,
}

struct ManagerInner {
    config: PersistenceConfig,
    state: ManagerState,
    disposed: bool,
}

pub struct PersistenceManager {
    api: Arc<PersistenceApi>,
    stores: Stores,
    cache: ChatCache,
    queue: OfflineQueue,
    events: broadcast::Sender<SyncEvent>,
    chat: Middleware,
    canvas: Middleware,
    /// Parent of both workers' tokens.
    cancel: CancellationToken,
    inner: Mutex<ManagerInner>,
}

impl PersistenceManager {
    /// Create a session and spawn its middleware workers.
    ///
    /// Must be called from within a tokio runtime. Nothing is written
    /// until [`initialize`](Self::initialize) succeeds.
    pub fn new(api: Arc<PersistenceApi>, stores: Stores, config: PersistenceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let cache = ChatCache::new(Arc::clone(&api), config.cache.clone());
        let fence = Fence::new(stores.project.watch_current());

        let chat = Middleware::spawn(
            ChatTarget::new(Arc::clone(&stores.chat), Arc::clone(&api)).with_cache(cache.clone()),
            stores.chat.subscribe(),
            config.chat_middleware(false),
            fence.clone(),
            events.clone(),
            cancel.child_token(),
        );
        let canvas = Middleware::spawn(
            CanvasTarget::new(Arc::clone(&stores.canvas), Arc::clone(&api)),
            stores.canvas.subscribe(),
            config.canvas_middleware(false),
            fence,
            events.clone(),
            cancel.child_token(),
        );

        Self {
            api,
            stores,
            cache,
            queue: OfflineQueue::new(),
            events,
            chat,
            canvas,
            cancel,
            inner: Mutex::new(ManagerInner {
                config,
                state: ManagerState::Uninitialized,
                disposed: false,
            }),
        }
    }

    /// Subscribe to hydration and write events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn cache(&self) -> &ChatCache {
        &self.cache
    }

    pub fn api(&self) -> &Arc<PersistenceApi> {
        &self.api
    }

    pub async fn state(&self) -> ManagerState {
        self.inner.lock().await.state
    }

    pub async fn is_initialized(&self) -> bool {
        self.state().await == ManagerState::Initialized
    }

    pub async fn config(&self) -> PersistenceConfig {
        self.inner.lock().await.config.clone()
    }

    /// Hydrate the configured project and turn write-through on.
    ///
    /// On any fetch failure the local stores are left as they were,
    /// write-through stays off and the manager is uninitialized.
    pub async fn initialize(&self) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        self.initialize_locked(&mut inner).await
    }

    /// Apply a new configuration. A different project id re-runs the
    /// whole initialization for that project; anything else is patched
    /// into the running middlewares.
    pub async fn update_config(&self, config: PersistenceConfig) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        if inner.disposed {
            return Err(PersistenceError::WorkerGone);
        }

        if config.project_id != inner.config.project_id {
            tracing::info!(
                from = ?inner.config.project_id,
                to = ?config.project_id,
                "Switching persistence project",
            );
            self.disable_locked(&mut inner).await?;
            self.stores.project.set_current_project(config.project_id);
            self.chat.reconfigure(config.chat_middleware(false)).await?;
            self.canvas.reconfigure(config.canvas_middleware(false)).await?;
            inner.config = config;

            if inner.config.enabled && inner.config.project_id.is_some() {
                return self.initialize_locked(&mut inner).await;
            }
            return Ok(());
        }

        let write_through = config.enabled && inner.state == ManagerState::Initialized;
        self.chat.reconfigure(config.chat_middleware(write_through)).await?;
        self.canvas.reconfigure(config.canvas_middleware(write_through)).await?;
        if !config.enabled {
            inner.state = ManagerState::Uninitialized;
        }
        inner.config = config;
        Ok(())
    }

    /// Turn write-through off. Local data is kept and writes already in
    /// flight complete.
    pub async fn disable(&self) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().await;
        self.disable_locked(&mut inner).await
    }

    /// Write everything pending now and wait for it to land.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        tokio::try_join!(self.chat.flush(), self.canvas.flush())?;
        Ok(())
    }

    /// Entities whose last write failed, plus stalled metadata updates.
    pub async fn unsaved_changes(&self) -> Result<usize, PersistenceError> {
        let (chat, canvas) = tokio::try_join!(self.chat.status(), self.canvas.status())?;
        Ok(chat.unsaved + canvas.unsaved + self.queue.len().await)
    }

    /// Queue a metadata update of the current project. Updates are sent
    /// strictly in order; a failed update holds back later ones until the
    /// next call.
    pub async fn queue_project_update(&self, patch: ProjectPatch) -> Result<DrainOutcome, PersistenceError> {
        let project_id = self
            .inner
            .lock()
            .await
            .config
            .project_id
            .ok_or(PersistenceError::NoProject)?;

        let api = Arc::clone(&self.api);
        let projects = Arc::clone(&self.stores.project);
        let events = self.events.clone();
        let outcome = self
            .queue
            .add(move || {
                let api = Arc::clone(&api);
                let projects = Arc::clone(&projects);
                let events = events.clone();
                let patch = patch.clone();
                async move {
                    let project = api.update_project(project_id, &patch).await?;
                    projects.upsert(project).await;
                    let _ = events.send(SyncEvent::WriteSucceeded {
                        project_id,
                        resource: Resource::Project,
                        entity_id: project_id,
                    });
                    Ok(())
                }
            })
            .await;

        if let DrainOutcome::Stalled { error, .. } = &outcome {
            let _ = self.events.send(SyncEvent::WriteFailed {
                project_id,
                resource: Resource::Project,
                entity_id: project_id,
                error: error.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Flush, then stop both workers. The manager is unusable afterwards.
    pub async fn dispose(&self) {
        let mut inner = self.inner.lock().await;
        if inner.disposed {
            return;
        }
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "Flush during dispose failed");
        }
        self.chat.shutdown().await;
        self.canvas.shutdown().await;
        self.cancel.cancel();
        inner.state = ManagerState::Uninitialized;
        inner.disposed = true;
        tracing::info!(project_id = ?inner.config.project_id, "Persistence session disposed");
    }

    // ---- private helpers ----

    async fn initialize_locked(&self, inner: &mut ManagerInner) -> Result<(), PersistenceError> {
        if inner.disposed {
            return Err(PersistenceError::WorkerGone);
        }
        let project_id = inner.config.project_id.ok_or(PersistenceError::NoProject)?;
        if !inner.config.enabled {
            return Err(PersistenceError::Disabled);
        }

        // Hydration must land before write-through is on.
        self.disable_locked(inner).await?;
        self.stores.project.set_current_project(Some(project_id));

        let fetched = tokio::try_join!(
            hydration::fetch_chat_messages(&self.cache, project_id),
            hydration::fetch_canvas_objects(&self.api, project_id),
        );
        let (messages, objects) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(
                    project_id = %project_id,
                    error = %e,
                    "Hydration failed, write-through stays off",
                );
                let _ = self.events.send(SyncEvent::HydrationFailed {
                    project_id,
                    error: e.to_string(),
                });
                return Err(PersistenceError::Hydration(e));
            }
        };

        let (message_count, object_count) = (messages.len(), objects.len());
        self.stores.chat.replace_all(messages).await;
        self.stores.canvas.replace_all(objects).await;

        self.chat.enable().await?;
        self.canvas.enable().await?;
        inner.state = ManagerState::Initialized;

        tracing::info!(
            project_id = %project_id,
            messages = message_count,
            objects = object_count,
            "Persistence initialized",
        );
        let _ = self.events.send(SyncEvent::HydrationCompleted {
            project_id,
            messages: message_count,
            objects: object_count,
        });
        Ok(())
    }

    async fn disable_locked(&self, inner: &mut ManagerInner) -> Result<(), PersistenceError> {
        self.chat.disable().await?;
        self.canvas.disable().await?;
        if inner.state == ManagerState::Initialized {
            tracing::info!(project_id = ?inner.config.project_id, "Persistence disabled");
        }
        inner.state = ManagerState::Uninitialized;
        Ok(())
    }
}

impl Drop for PersistenceManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
