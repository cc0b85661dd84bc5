//! Chat write-through target.
//!
//! Only messages passing [`ChatMessage::is_persistable`] are written, each
//! at most once: the chat endpoint has no update route, so a message the
//! server already holds is never sent again. After a batch lands the
//! project's entry in the [`ChatCache`] is invalidated.

use std::collections::HashSet;
use std::sync::Arc;

use adcanvas_client::api::NewChatMessage;
use adcanvas_client::{ClientError, PersistenceApi};
use adcanvas_core::{ChatMessage, EntityId};
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{Applied, Fence, SyncTarget};
use crate::cache::ChatCache;
use crate::events::{Resource, SyncEvent};
use crate::store::{ChatChange, ChatStore};

/// Outcome of writing one message.
#[derive(Debug)]
pub enum ChatWriteOutcome {
    Created { server_id: EntityId },
    Failed(ClientError),
    /// Not attempted: the project stopped being active.
    Skipped,
}

#[derive(Debug)]
pub struct ChatReport {
    pub outcomes: Vec<(EntityId, ChatWriteOutcome)>,
}

pub struct ChatTarget {
    store: Arc<ChatStore>,
    api: Arc<PersistenceApi>,
    cache: Option<ChatCache>,
    /// Local ids the server already holds.
    persisted: HashSet<EntityId>,
    /// Ids awaiting a write, in the order they were recorded.
    pending: Vec<EntityId>,
    unsaved: HashSet<EntityId>,
}

impl ChatTarget {
    pub fn new(store: Arc<ChatStore>, api: Arc<PersistenceApi>) -> Self {
        Self {
            store,
            api,
            cache: None,
            persisted: HashSet::new(),
            pending: Vec::new(),
            unsaved: HashSet::new(),
        }
    }

    /// Invalidate `cache` after each successful write.
    pub fn with_cache(mut self, cache: ChatCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn queue(&mut self, id: EntityId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }
}

impl SyncTarget for ChatTarget {
    type Change = ChatChange;
    type Batch = Vec<ChatMessage>;
    type Report = ChatReport;

    const RESOURCE: Resource = Resource::ChatMessage;

    fn record(&mut self, change: &ChatChange, enabled: bool) -> bool {
        match change {
            ChatChange::Added(message) | ChatChange::Updated(message) => {
                if !enabled || self.persisted.contains(&message.id) || !message.is_persistable() {
                    return false;
                }
                self.queue(message.id);
                true
            }
            ChatChange::Removed(id) => {
                self.pending.retain(|p| p != id);
                self.unsaved.remove(id);
                false
            }
            ChatChange::Replaced(ids) => {
                self.persisted = ids.iter().copied().collect();
                self.pending.clear();
                self.unsaved.clear();
                false
            }
            ChatChange::Cleared => {
                self.pending.clear();
                self.unsaved.clear();
                false
            }
        }
    }

    async fn resync(&mut self) -> bool {
        for message in self.store.messages().await {
            if message.is_persistable() && !self.persisted.contains(&message.id) {
                self.queue(message.id);
            }
        }
        !self.pending.is_empty()
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    async fn take_batch(&mut self, _project_id: EntityId) -> Option<Vec<ChatMessage>> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        let mut batch = Vec::with_capacity(pending.len());
        for id in pending {
            // Re-read the message so the batch carries its latest state.
            let Some(message) = self.store.get(id).await else {
                continue;
            };
            if message.is_persistable() && !self.persisted.contains(&id) {
                batch.push(message);
            }
        }
        (!batch.is_empty()).then_some(batch)
    }

    fn write(&self, project_id: EntityId, batch: Vec<ChatMessage>, fence: Fence) -> BoxFuture<'static, ChatReport> {
        let api = Arc::clone(&self.api);
        async move {
            let mut outcomes = Vec::with_capacity(batch.len());
            for message in batch {
                if !fence.is_active(project_id) {
                    outcomes.push((message.id, ChatWriteOutcome::Skipped));
                    continue;
                }
                let outcome = match api.create_message(project_id, &NewChatMessage::from(&message)).await {
                    Ok(row) => {
                        tracing::debug!(
                            project_id = %project_id,
                            message_id = %message.id,
                            server_id = %row.id,
                            "Chat message persisted",
                        );
                        ChatWriteOutcome::Created { server_id: row.id }
                    }
                    Err(e) => {
                        tracing::error!(
                            project_id = %project_id,
                            message_id = %message.id,
                            error = %e,
                            "Failed to persist chat message",
                        );
                        ChatWriteOutcome::Failed(e)
                    }
                };
                outcomes.push((message.id, outcome));
            }
            ChatReport { outcomes }
        }
        .boxed()
    }

    async fn apply(&mut self, project_id: EntityId, report: ChatReport) -> Applied {
        let mut applied = Applied::default();
        let mut wrote_any = false;

        for (id, outcome) in report.outcomes {
            match outcome {
                ChatWriteOutcome::Created { .. } => {
                    wrote_any = true;
                    self.persisted.insert(id);
                    self.unsaved.remove(&id);
                    applied.events.push(SyncEvent::WriteSucceeded {
                        project_id,
                        resource: Resource::ChatMessage,
                        entity_id: id,
                    });
                }
                ChatWriteOutcome::Failed(error) => {
                    self.unsaved.insert(id);
                    applied.events.push(SyncEvent::WriteFailed {
                        project_id,
                        resource: Resource::ChatMessage,
                        entity_id: id,
                        error: error.to_string(),
                    });
                }
                ChatWriteOutcome::Skipped => self.queue(id),
            }
        }

        if wrote_any {
            if let Some(cache) = &self.cache {
                cache.invalidate(project_id).await;
            }
        }
        applied
    }

    fn reset(&mut self) {
        self.persisted.clear();
        self.pending.clear();
        self.unsaved.clear();
    }

    fn unsaved(&self) -> usize {
        self.unsaved.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use adcanvas_client::mock::MockBackend;
    use adcanvas_client::RetryPolicy;
    use adcanvas_core::{AdGenerationData, AdGenerationStage, MessageRole, MessageType};

    use super::*;

    fn target() -> ChatTarget {
        let api = PersistenceApi::new(Arc::new(MockBackend::new()), RetryPolicy::none());
        ChatTarget::new(Arc::new(ChatStore::new()), Arc::new(api))
    }

    #[test]
    fn only_persistable_messages_are_queued() {
        let mut target = target();
        let running = AdGenerationData::queued("job-1");
        let mut finished = AdGenerationData::queued("job-2");
        finished.advance(AdGenerationStage::Completed, 100).unwrap();

        let skipped = [
            ChatMessage::new(MessageRole::Assistant, MessageType::AdGeneration, "working"),
            ChatMessage::new(MessageRole::Assistant, MessageType::AgentProgress, "step 1"),
            ChatMessage::new(MessageRole::Assistant, MessageType::Error, "boom"),
            ChatMessage::new(MessageRole::Assistant, MessageType::AgentOutput, "draft").with_ad_data(running),
            ChatMessage::user_text("typing").temporary(),
        ];
        for message in &skipped {
            assert!(!target.record(&ChatChange::Added(message.clone()), true));
        }
        assert!(!target.has_pending());

        let output = ChatMessage::new(MessageRole::Assistant, MessageType::AgentOutput, "done").with_ad_data(finished);
        assert!(target.record(&ChatChange::Added(output), true));
        assert!(target.record(&ChatChange::Added(ChatMessage::user_text("hi")), true));
        assert_eq!(target.pending.len(), 2);
    }

    #[test]
    fn disabled_target_queues_nothing_but_learns_hydrated_ids() {
        let mut target = target();
        let hydrated = ChatMessage::user_text("from server");

        assert!(!target.record(&ChatChange::Added(ChatMessage::user_text("x")), false));
        assert!(!target.record(&ChatChange::Replaced(vec![hydrated.id]), false));

        assert!(!target.has_pending());
        assert!(!target.record(&ChatChange::Updated(hydrated), true));
    }

    #[test]
    fn repeated_updates_queue_once() {
        let mut target = target();
        let msg = ChatMessage::user_text("a");

        target.record(&ChatChange::Added(msg.clone()), true);
        target.record(&ChatChange::Updated(msg.clone()), true);
        target.record(&ChatChange::Updated(msg.clone()), true);

        assert_eq!(target.pending, vec![msg.id]);

        target.record(&ChatChange::Removed(msg.id), true);
        assert!(!target.has_pending());
    }

    #[tokio::test]
    async fn batch_reads_latest_message_state() {
        let mut target = target();
        let msg = ChatMessage::user_text("first");
        target.store.add_message(msg.clone()).await;
        target.record(&ChatChange::Added(msg.clone()), true);
        target.store.update_message(msg.id, |m| m.content = "edited".into()).await;

        let batch = target.take_batch(uuid::Uuid::new_v4()).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].content, "edited");
        assert!(!target.has_pending());
    }

    #[tokio::test]
    async fn failed_writes_are_tracked_until_a_later_success() {
        let mut target = target();
        let project = uuid::Uuid::new_v4();
        let id = uuid::Uuid::new_v4();

        let applied = target
            .apply(
                project,
                ChatReport {
                    outcomes: vec![(id, ChatWriteOutcome::Failed(ClientError::Network("down".into())))],
                },
            )
            .await;
        assert_eq!(target.unsaved(), 1);
        assert!(matches!(applied.events[0], SyncEvent::WriteFailed { entity_id, .. } if entity_id == id));

        target
            .apply(
                project,
                ChatReport {
                    outcomes: vec![(id, ChatWriteOutcome::Created { server_id: uuid::Uuid::new_v4() })],
                },
            )
            .await;
        assert_eq!(target.unsaved(), 0);
    }
}
