//! Canvas write-through target.
//!
//! Pending work is one operation per object: an upsert (written as a
//! `POST` for objects the server does not know yet, `PATCH` otherwise)
//! or a delete. Upserts read the object from the store when the batch is
//! taken, so any number of moves inside one debounce window cost a single
//! request carrying the final geometry.
//!
//! A successful `POST` returns the server's id for the object; the local
//! object is rewritten to it with [`CanvasStore::reconcile_id`].
//!
//! Objects that fail [`CanvasObject::validate`] are never sent. They are
//! reported as failed writes and stay unsaved until a later change makes
//! them valid.

use std::collections::HashSet;
use std::sync::Arc;

use adcanvas_client::api::CanvasObjectPayload;
use adcanvas_client::{ClientError, PersistenceApi};
use adcanvas_core::{CanvasObject, EntityId};
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{Applied, Fence, SyncTarget};
use crate::events::{Resource, SyncEvent};
use crate::store::{CanvasChange, CanvasStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Upsert,
    Delete,
}

/// One request of a canvas batch.
#[derive(Debug, Clone)]
pub enum CanvasWrite {
    Create(CanvasObject),
    Update(CanvasObject),
    Delete(EntityId),
    /// An upsert rejected locally before any request.
    Invalid { id: EntityId, reason: String },
}

impl CanvasWrite {
    fn id(&self) -> EntityId {
        match self {
            Self::Create(obj) | Self::Update(obj) => obj.id,
            Self::Delete(id) | Self::Invalid { id, .. } => *id,
        }
    }
}

#[derive(Debug)]
pub enum CanvasWriteOutcome {
    Created { local_id: EntityId, server_id: EntityId },
    Updated(EntityId),
    Deleted(EntityId),
    Failed { write: CanvasWrite, error: ClientError },
    Skipped(CanvasWrite),
}

#[derive(Debug)]
pub struct CanvasReport {
    pub outcomes: Vec<CanvasWriteOutcome>,
}

pub struct CanvasTarget {
    store: Arc<CanvasStore>,
    api: Arc<PersistenceApi>,
    /// Ids the server holds a row for.
    known: HashSet<EntityId>,
    pending: Vec<(EntityId, PendingOp)>,
    /// Local ids whose `POST` is in flight.
    creating: HashSet<EntityId>,
    /// Objects removed locally while their `POST` was in flight.
    deleted_while_creating: HashSet<EntityId>,
    unsaved: HashSet<EntityId>,
}

impl CanvasTarget {
    pub fn new(store: Arc<CanvasStore>, api: Arc<PersistenceApi>) -> Self {
        Self {
            store,
            api,
            known: HashSet::new(),
            pending: Vec::new(),
            creating: HashSet::new(),
            deleted_while_creating: HashSet::new(),
            unsaved: HashSet::new(),
        }
    }

    /// Queue `op` for `id`, replacing any earlier operation on it.
    fn queue(&mut self, id: EntityId, op: PendingOp) {
        self.pending.retain(|(pending, _)| *pending != id);
        self.pending.push((id, op));
    }

    fn rename_pending(&mut self, from: EntityId, to: EntityId) {
        for (id, _) in &mut self.pending {
            if *id == from {
                *id = to;
            }
        }
    }

    fn succeeded(&mut self, project_id: EntityId, id: EntityId, applied: &mut Applied) {
        self.unsaved.remove(&id);
        applied.events.push(SyncEvent::WriteSucceeded {
            project_id,
            resource: Resource::CanvasObject,
            entity_id: id,
        });
    }
}

impl SyncTarget for CanvasTarget {
    type Change = CanvasChange;
    type Batch = Vec<CanvasWrite>;
    type Report = CanvasReport;

    const RESOURCE: Resource = Resource::CanvasObject;

    fn record(&mut self, change: &CanvasChange, enabled: bool) -> bool {
        match change {
            CanvasChange::Added(obj) | CanvasChange::Updated(obj) => {
                if !enabled {
                    return false;
                }
                self.queue(obj.id, PendingOp::Upsert);
                true
            }
            CanvasChange::Removed(id) => {
                if !enabled {
                    return false;
                }
                self.pending.retain(|(pending, _)| pending != id);
                if self.known.contains(id) {
                    self.queue(*id, PendingOp::Delete);
                    true
                } else {
                    if self.creating.contains(id) {
                        self.deleted_while_creating.insert(*id);
                    }
                    // Never reached the server: nothing to delete.
                    self.unsaved.remove(id);
                    false
                }
            }
            CanvasChange::IdReconciled { from, to } => {
                self.rename_pending(*from, *to);
                false
            }
            CanvasChange::Replaced(ids) => {
                self.known = ids.iter().copied().collect();
                self.pending.clear();
                self.creating.clear();
                self.deleted_while_creating.clear();
                self.unsaved.clear();
                false
            }
            CanvasChange::Cleared => {
                self.pending.clear();
                false
            }
        }
    }

    async fn resync(&mut self) -> bool {
        for obj in self.store.objects().await {
            self.queue(obj.id, PendingOp::Upsert);
        }
        !self.pending.is_empty()
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    async fn take_batch(&mut self, _project_id: EntityId) -> Option<Vec<CanvasWrite>> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        let mut batch = Vec::with_capacity(pending.len());
        for (id, op) in pending {
            match op {
                PendingOp::Delete => batch.push(CanvasWrite::Delete(id)),
                PendingOp::Upsert => {
                    let Some(obj) = self.store.get(id).await else {
                        continue;
                    };
                    if let Err(e) = obj.validate() {
                        tracing::warn!(object_id = %id, error = %e, "Not persisting invalid canvas object");
                        batch.push(CanvasWrite::Invalid {
                            id,
                            reason: e.to_string(),
                        });
                    } else if self.known.contains(&obj.id) {
                        batch.push(CanvasWrite::Update(obj));
                    } else if self.creating.contains(&obj.id) {
                        // Wait for the create to land; it is then written
                        // as an update.
                        self.pending.push((id, op));
                    } else {
                        self.creating.insert(obj.id);
                        batch.push(CanvasWrite::Create(obj));
                    }
                }
            }
        }
        (!batch.is_empty()).then_some(batch)
    }

    fn write(&self, project_id: EntityId, batch: Vec<CanvasWrite>, fence: Fence) -> BoxFuture<'static, CanvasReport> {
        let api = Arc::clone(&self.api);
        async move {
            let mut outcomes = Vec::with_capacity(batch.len());
            for write in batch {
                if !fence.is_active(project_id) {
                    outcomes.push(CanvasWriteOutcome::Skipped(write));
                    continue;
                }
                let id = write.id();
                let result = match &write {
                    CanvasWrite::Create(obj) => api
                        .create_canvas_object(project_id, &CanvasObjectPayload::from(obj))
                        .await
                        .map(|row| CanvasWriteOutcome::Created {
                            local_id: id,
                            server_id: row.id,
                        }),
                    CanvasWrite::Update(obj) => api
                        .update_canvas_object(project_id, id, &CanvasObjectPayload::from(obj))
                        .await
                        .map(|()| CanvasWriteOutcome::Updated(id)),
                    CanvasWrite::Delete(_) => api
                        .delete_canvas_object(project_id, id)
                        .await
                        .map(|()| CanvasWriteOutcome::Deleted(id)),
                    CanvasWrite::Invalid { reason, .. } => Err(ClientError::InvalidRequest(reason.clone())),
                };
                let outcome = result.unwrap_or_else(|error| {
                    tracing::error!(
                        project_id = %project_id,
                        object_id = %id,
                        error = %error,
                        "Failed to persist canvas object",
                    );
                    CanvasWriteOutcome::Failed { write, error }
                });
                outcomes.push(outcome);
            }
            CanvasReport { outcomes }
        }
        .boxed()
    }

    async fn apply(&mut self, project_id: EntityId, report: CanvasReport) -> Applied {
        let mut applied = Applied::default();

        for outcome in report.outcomes {
            match outcome {
                CanvasWriteOutcome::Created { local_id, server_id } => {
                    self.creating.remove(&local_id);
                    self.known.insert(server_id);
                    self.unsaved.remove(&local_id);
                    if self.deleted_while_creating.remove(&local_id) {
                        tracing::debug!(
                            project_id = %project_id,
                            object_id = %server_id,
                            "Object removed during create, scheduling delete",
                        );
                        self.queue(server_id, PendingOp::Delete);
                        applied.reschedule = true;
                        continue;
                    }
                    self.rename_pending(local_id, server_id);
                    if local_id != server_id {
                        self.store.reconcile_id(local_id, server_id).await;
                    }
                    if self.has_pending() {
                        applied.reschedule = true;
                    }
                    self.succeeded(project_id, server_id, &mut applied);
                }
                CanvasWriteOutcome::Updated(id) => self.succeeded(project_id, id, &mut applied),
                CanvasWriteOutcome::Deleted(id) => {
                    self.known.remove(&id);
                    self.succeeded(project_id, id, &mut applied);
                }
                CanvasWriteOutcome::Failed { write, error } => {
                    let id = write.id();
                    if let CanvasWrite::Create(_) = write {
                        self.creating.remove(&id);
                        if self.deleted_while_creating.remove(&id) {
                            // Gone locally and never created remotely.
                            continue;
                        }
                    }
                    self.unsaved.insert(id);
                    applied.events.push(SyncEvent::WriteFailed {
                        project_id,
                        resource: Resource::CanvasObject,
                        entity_id: id,
                        error: error.to_string(),
                    });
                }
                CanvasWriteOutcome::Skipped(write) => {
                    let id = write.id();
                    match write {
                        CanvasWrite::Create(_) => {
                            self.creating.remove(&id);
                            self.queue(id, PendingOp::Upsert);
                        }
                        CanvasWrite::Update(_) | CanvasWrite::Invalid { .. } => self.queue(id, PendingOp::Upsert),
                        CanvasWrite::Delete(_) => self.queue(id, PendingOp::Delete),
                    }
                }
            }
        }
        applied
    }

    fn reset(&mut self) {
        self.known.clear();
        self.pending.clear();
        self.creating.clear();
        self.deleted_while_creating.clear();
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
    use adcanvas_core::CanvasObjectType;
    use assert_matches::assert_matches;

    use super::*;

    fn target() -> CanvasTarget {
        let api = PersistenceApi::new(Arc::new(MockBackend::new()), RetryPolicy::none());
        CanvasTarget::new(Arc::new(CanvasStore::new()), Arc::new(api))
    }

    fn shape(project_id: EntityId) -> CanvasObject {
        CanvasObject::new(project_id, CanvasObjectType::Shape, 0.0, 0.0, 10.0, 10.0)
    }

    #[tokio::test]
    async fn unknown_object_is_created_known_object_is_updated() {
        let mut target = target();
        let project = uuid::Uuid::new_v4();
        let fresh = shape(project);
        let hydrated = shape(project);
        target.store.add_object(fresh.clone()).await;
        target.store.add_object(hydrated.clone()).await;
        target.record(&CanvasChange::Replaced(vec![hydrated.id]), false);

        target.record(&CanvasChange::Added(fresh.clone()), true);
        target.record(&CanvasChange::Updated(hydrated.clone()), true);
        let batch = target.take_batch(project).await.unwrap();

        assert!(matches!(&batch[0], CanvasWrite::Create(obj) if obj.id == fresh.id));
        assert!(matches!(&batch[1], CanvasWrite::Update(obj) if obj.id == hydrated.id));
    }

    #[test]
    fn removing_a_never_persisted_object_queues_nothing() {
        let mut target = target();
        let obj = shape(uuid::Uuid::new_v4());

        assert!(target.record(&CanvasChange::Added(obj.clone()), true));
        assert!(!target.record(&CanvasChange::Removed(obj.id), true));

        assert!(!target.has_pending());
    }

    #[test]
    fn removing_a_known_object_queues_a_delete() {
        let mut target = target();
        let obj = shape(uuid::Uuid::new_v4());
        target.record(&CanvasChange::Replaced(vec![obj.id]), false);

        target.record(&CanvasChange::Updated(obj.clone()), true);
        assert!(target.record(&CanvasChange::Removed(obj.id), true));

        assert_eq!(target.pending, vec![(obj.id, PendingOp::Delete)]);
    }

    #[tokio::test]
    async fn create_result_reconciles_store_id() {
        let mut target = target();
        let project = uuid::Uuid::new_v4();
        let obj = shape(project);
        target.store.add_object(obj.clone()).await;
        target.record(&CanvasChange::Added(obj.clone()), true);
        target.take_batch(project).await.unwrap();
        let server_id = uuid::Uuid::new_v4();

        let applied = target
            .apply(
                project,
                CanvasReport {
                    outcomes: vec![CanvasWriteOutcome::Created {
                        local_id: obj.id,
                        server_id,
                    }],
                },
            )
            .await;

        assert!(!applied.reschedule);
        assert!(target.store.get(server_id).await.is_some());
        assert!(target.known.contains(&server_id));
        assert!(target.creating.is_empty());
    }

    #[tokio::test]
    async fn delete_during_create_schedules_server_delete() {
        let mut target = target();
        let project = uuid::Uuid::new_v4();
        let obj = shape(project);
        target.store.add_object(obj.clone()).await;
        target.record(&CanvasChange::Added(obj.clone()), true);
        target.take_batch(project).await.unwrap();

        target.store.remove_object(obj.id).await;
        assert!(!target.record(&CanvasChange::Removed(obj.id), true));
        let server_id = uuid::Uuid::new_v4();
        let applied = target
            .apply(
                project,
                CanvasReport {
                    outcomes: vec![CanvasWriteOutcome::Created {
                        local_id: obj.id,
                        server_id,
                    }],
                },
            )
            .await;

        assert!(applied.reschedule);
        assert_eq!(target.pending, vec![(server_id, PendingOp::Delete)]);
    }

    #[tokio::test]
    async fn invalid_object_fails_without_request() {
        let backend = Arc::new(MockBackend::new());
        let api = PersistenceApi::new(backend.clone(), RetryPolicy::none());
        let mut target = CanvasTarget::new(Arc::new(CanvasStore::new()), Arc::new(api));
        let project = uuid::Uuid::new_v4();
        let mut obj = shape(project);
        obj.move_to(f64::NAN, 20.0);
        target.store.add_object(obj.clone()).await;
        target.record(&CanvasChange::Added(obj.clone()), true);

        let batch = target.take_batch(project).await.unwrap();
        assert_matches!(&batch[..], [CanvasWrite::Invalid { id, .. }] if *id == obj.id);
        assert!(target.creating.is_empty());

        let (_tx, rx) = tokio::sync::watch::channel(Some(project));
        let report = target.write(project, batch, Fence::new(rx)).await;
        let applied = target.apply(project, report).await;

        assert!(backend.requests().await.is_empty());
        assert_eq!(target.unsaved(), 1);
        assert_matches!(
            &applied.events[..],
            [SyncEvent::WriteFailed { entity_id, .. }] if *entity_id == obj.id
        );
    }
}
