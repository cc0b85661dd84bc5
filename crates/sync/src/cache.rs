//! Read-through cache of chat history, keyed by project.
//!
//! [`ChatCache`] is the one place chat history is fetched from the
//! server. It follows stale-while-revalidate rules:
//!
//! - readers get the cached list (or an empty one while loading) and a
//!   `watch` receiver that sees every update;
//! - loads within the dedup interval of the last fetch reuse its result,
//!   and concurrent fetches of one key share a single request;
//! - local mutations bump the entry's generation, so a fetch started
//!   before the mutation never overwrites it;
//! - invalidation marks the entry stale and refetches in the background
//!   when anyone is subscribed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use adcanvas_client::api::{chat_path, NewChatMessage};
use adcanvas_client::{ClientError, PersistenceApi};
use adcanvas_core::{ChatMessage, EntityId};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::hydration::messages_from_rows;

/// Default window in which repeated loads reuse the last fetch.
pub const DEFAULT_DEDUP_INTERVAL: Duration = Duration::from_secs(2);

pub type Messages = Arc<Vec<ChatMessage>>;

type SharedFetch = Shared<BoxFuture<'static, Result<Messages, ClientError>>>;

/// Revalidation behaviour of a [`ChatCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub dedup_interval: Duration,
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dedup_interval: DEFAULT_DEDUP_INTERVAL,
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
        }
    }
}

struct InFlightFetch {
    seq: u64,
    generation: u64,
    fetch: SharedFetch,
}

struct Entry {
    data: Option<Messages>,
    /// When the current data was fetched; `None` once invalidated.
    fetched_at: Option<Instant>,
    generation: u64,
    applied_seq: u64,
    in_flight: Option<InFlightFetch>,
    tx: watch::Sender<Messages>,
}

impl Entry {
    fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            data: None,
            fetched_at: None,
            generation: 0,
            applied_seq: 0,
            in_flight: None,
            tx,
        }
    }

    fn publish(&mut self, messages: Messages) {
        self.data = Some(Arc::clone(&messages));
        self.tx.send_replace(messages);
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<EntityId, Entry>,
    next_seq: u64,
}

struct CacheInner {
    api: Arc<PersistenceApi>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Serve fresh cached data if there is any.
    Load,
    /// Always go to the server (or join a fetch of the current generation).
    Revalidate,
}

/// Shared chat history cache. Clones share state.
#[derive(Clone)]
pub struct ChatCache {
    inner: Arc<CacheInner>,
}

impl ChatCache {
    pub fn new(api: Arc<PersistenceApi>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                api,
                config,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The cache key of a project's chat history.
    pub fn key(project_id: EntityId) -> String {
        chat_path(project_id)
    }

    /// Cached messages, or an empty list if nothing has loaded yet.
    pub async fn peek(&self, project_id: EntityId) -> Messages {
        let state = self.inner.state.lock().await;
        state
            .entries
            .get(&project_id)
            .and_then(|entry| entry.data.clone())
            .unwrap_or_default()
    }

    /// Receive every update of a project's cached messages. Starts with
    /// an empty list until the first load completes.
    pub async fn subscribe(&self, project_id: EntityId) -> watch::Receiver<Messages> {
        let mut state = self.inner.state.lock().await;
        state.entries.entry(project_id).or_insert_with(Entry::new).tx.subscribe()
    }

    /// Cached messages if fetched within the dedup interval, otherwise a
    /// fetch (shared with any fetch already running).
    pub async fn load(&self, project_id: EntityId) -> Result<Messages, ClientError> {
        self.fetch(project_id, FetchMode::Load).await
    }

    /// Fetch from the server regardless of cached data.
    pub async fn revalidate(&self, project_id: EntityId) -> Result<Messages, ClientError> {
        self.fetch(project_id, FetchMode::Revalidate).await
    }

    /// Apply a local change to the cached list and publish it.
    pub async fn mutate<F>(&self, project_id: EntityId, f: F)
    where
        F: FnOnce(&mut Vec<ChatMessage>),
    {
        let mut state = self.inner.state.lock().await;
        let entry = state.entries.entry(project_id).or_insert_with(Entry::new);
        let mut messages = entry.data.as_deref().cloned().unwrap_or_default();
        f(&mut messages);
        entry.generation += 1;
        entry.publish(Arc::new(messages));
    }

    /// Mark a project's entry stale. Subscribed entries are refetched in
    /// the background.
    pub async fn invalidate(&self, project_id: EntityId) {
        let subscribed = {
            let mut state = self.inner.state.lock().await;
            let Some(entry) = state.entries.get_mut(&project_id) else {
                return;
            };
            entry.generation += 1;
            entry.fetched_at = None;
            entry.tx.receiver_count() > 0
        };

        if subscribed {
            let cache = self.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.revalidate(project_id).await {
                    tracing::warn!(project_id = %project_id, error = %e, "Background chat revalidation failed");
                }
            });
        }
    }

    /// The client regained focus.
    pub async fn on_focus(&self) {
        if self.inner.config.revalidate_on_focus {
            self.revalidate_subscribed("focus").await;
        }
    }

    /// The client regained connectivity.
    pub async fn on_reconnect(&self) {
        if self.inner.config.revalidate_on_reconnect {
            self.revalidate_subscribed("reconnect").await;
        }
    }

    /// Optimistically append `message`, write it, then pull the server's
    /// list. If the write fails the cache is rolled back by refetching,
    /// or by removing the message if the refetch fails too.
    pub async fn send_message(&self, project_id: EntityId, message: ChatMessage) -> Result<(), ClientError> {
        let id = message.id;
        let body = NewChatMessage::from(&message);
        self.mutate(project_id, |messages| messages.push(message)).await;

        let result = self.inner.api.create_message(project_id, &body).await;
        self.end_write(project_id).await;

        match result {
            Ok(_) => {
                if let Err(e) = self.revalidate(project_id).await {
                    tracing::warn!(project_id = %project_id, error = %e, "Revalidation after send failed");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    project_id = %project_id,
                    message_id = %id,
                    error = %e,
                    "Chat send failed, rolling back",
                );
                if self.revalidate(project_id).await.is_err() {
                    self.mutate(project_id, |messages| messages.retain(|m| m.id != id))
                        .await;
                }
                Err(e)
            }
        }
    }

    // ---- private helpers ----

    /// Start a new generation once a write has settled, so fetches that
    /// read the server while it was in flight are neither joined nor
    /// published.
    async fn end_write(&self, project_id: EntityId) {
        let mut state = self.inner.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&project_id) {
            entry.generation += 1;
            entry.fetched_at = None;
        }
    }

    async fn revalidate_subscribed(&self, trigger: &'static str) {
        let keys: Vec<EntityId> = {
            let state = self.inner.state.lock().await;
            state
                .entries
                .iter()
                .filter(|(_, entry)| entry.tx.receiver_count() > 0)
                .map(|(key, _)| *key)
                .collect()
        };
        tracing::debug!(trigger, count = keys.len(), "Revalidating chat cache");

        let results = futures::future::join_all(keys.iter().map(|key| self.load(*key))).await;
        for (key, result) in keys.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(project_id = %key, trigger, error = %e, "Chat revalidation failed");
            }
        }
    }

    async fn fetch(&self, project_id: EntityId, mode: FetchMode) -> Result<Messages, ClientError> {
        let fetch = {
            let mut state = self.inner.state.lock().await;
            let seq = state.next_seq + 1;
            let entry = state.entries.entry(project_id).or_insert_with(Entry::new);

            if mode == FetchMode::Load {
                if let (Some(data), Some(fetched_at)) = (&entry.data, entry.fetched_at) {
                    if fetched_at.elapsed() < self.inner.config.dedup_interval {
                        return Ok(Arc::clone(data));
                    }
                }
            }

            let joinable = entry
                .in_flight
                .as_ref()
                .filter(|in_flight| in_flight.generation == entry.generation)
                .map(|in_flight| in_flight.fetch.clone());

            match joinable {
                Some(fetch) => fetch,
                None => {
                    let fetch = self.start_fetch(project_id, seq, entry.generation);
                    entry.in_flight = Some(InFlightFetch {
                        seq,
                        generation: entry.generation,
                        fetch: fetch.clone(),
                    });
                    state.next_seq = seq;
                    fetch
                }
            }
        };
        fetch.await
    }

    fn start_fetch(&self, project_id: EntityId, seq: u64, generation: u64) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        async move {
            tracing::debug!(project_id = %project_id, seq, "Fetching chat history");
            let result = inner
                .api
                .list_messages(project_id)
                .await
                .map(|rows| Arc::new(messages_from_rows(rows)));

            let mut state = inner.state.lock().await;
            if let Some(entry) = state.entries.get_mut(&project_id) {
                if entry.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
                    entry.in_flight = None;
                }
                if let Ok(messages) = &result {
                    // Discard results overtaken by a local change or a
                    // newer fetch.
                    if entry.generation == generation && seq > entry.applied_seq {
                        entry.applied_seq = seq;
                        entry.fetched_at = Some(Instant::now());
                        entry.publish(Arc::clone(messages));
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
