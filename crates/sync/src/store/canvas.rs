//! Canvas object store.
//!
//! Objects created locally carry a client-generated id until the server
//! assigns its own. [`CanvasStore::reconcile_id`] rewrites the object to
//! the server id and keeps the old id as an alias, so callers still
//! holding it keep addressing the same object.

use std::collections::HashMap;

use adcanvas_core::{CanvasObject, EntityId};
use tokio::sync::{broadcast, RwLock};

use super::CHANGE_CHANNEL_CAPACITY;

/// A mutation of the canvas store.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasChange {
    Added(CanvasObject),
    Updated(CanvasObject),
    Removed(EntityId),
    /// The whole collection was replaced; carries the ids now present.
    Replaced(Vec<EntityId>),
    /// A local id was swapped for the server-assigned one.
    IdReconciled { from: EntityId, to: EntityId },
    Cleared,
}

#[derive(Default)]
struct CanvasState {
    objects: Vec<CanvasObject>,
    /// Client id -> server id for reconciled objects.
    aliases: HashMap<EntityId, EntityId>,
}

impl CanvasState {
    fn resolve(&self, id: EntityId) -> EntityId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    fn position(&self, id: EntityId) -> Option<usize> {
        let id = self.resolve(id);
        self.objects.iter().position(|o| o.id == id)
    }
}

pub struct CanvasStore {
    state: RwLock<CanvasState>,
    tx: broadcast::Sender<CanvasChange>,
}

impl Default for CanvasStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasStore {
    pub fn new() -> Self {
        Self::with_capacity(CHANGE_CHANNEL_CAPACITY)
    }

    /// A store whose subscribers lag once `capacity` changes are unread.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            state: RwLock::new(CanvasState::default()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CanvasChange> {
        self.tx.subscribe()
    }

    /// Add an object, or replace the object with the same id.
    pub async fn add_object(&self, object: CanvasObject) {
        let mut state = self.state.write().await;
        match state.position(object.id) {
            Some(index) => {
                let mut object = object;
                object.id = state.objects[index].id;
                state.objects[index] = object.clone();
                let _ = self.tx.send(CanvasChange::Updated(object));
            }
            None => {
                state.objects.push(object.clone());
                let _ = self.tx.send(CanvasChange::Added(object));
            }
        }
    }

    /// Apply `f` to the object addressed by `id` (or its alias).
    pub async fn update_object<F>(&self, id: EntityId, f: F) -> bool
    where
        F: FnOnce(&mut CanvasObject),
    {
        let mut state = self.state.write().await;
        let Some(index) = state.position(id) else {
            return false;
        };
        let object = &mut state.objects[index];
        let current_id = object.id;
        f(object);
        object.id = current_id;
        let _ = self.tx.send(CanvasChange::Updated(object.clone()));
        true
    }

    pub async fn remove_object(&self, id: EntityId) -> bool {
        let mut state = self.state.write().await;
        let Some(index) = state.position(id) else {
            return false;
        };
        let removed = state.objects.remove(index);
        state.aliases.retain(|_, to| *to != removed.id);
        let _ = self.tx.send(CanvasChange::Removed(removed.id));
        true
    }

    /// Swap the id of object `from` for `to`. Returns `false` if `from` is
    /// not in the store.
    pub async fn reconcile_id(&self, from: EntityId, to: EntityId) -> bool {
        let mut state = self.state.write().await;
        let Some(object) = state.objects.iter_mut().find(|o| o.id == from) else {
            return false;
        };
        object.id = to;
        state.aliases.insert(from, to);
        let _ = self.tx.send(CanvasChange::IdReconciled { from, to });
        true
    }

    /// Replace the whole collection (hydration). Aliases are dropped.
    pub async fn replace_all(&self, objects: Vec<CanvasObject>) {
        let mut state = self.state.write().await;
        let ids = objects.iter().map(|o| o.id).collect();
        state.objects = objects;
        state.aliases.clear();
        let _ = self.tx.send(CanvasChange::Replaced(ids));
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.objects.clear();
        state.aliases.clear();
        let _ = self.tx.send(CanvasChange::Cleared);
    }

    /// The current id of the object addressed by `id`.
    pub async fn resolve(&self, id: EntityId) -> EntityId {
        self.state.read().await.resolve(id)
    }

    pub async fn objects(&self) -> Vec<CanvasObject> {
        self.state.read().await.objects.clone()
    }

    pub async fn get(&self, id: EntityId) -> Option<CanvasObject> {
        let state = self.state.read().await;
        state.position(id).map(|index| state.objects[index].clone())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.objects.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use adcanvas_core::CanvasObjectType;

    use super::*;

    fn shape() -> CanvasObject {
        CanvasObject::new(uuid::Uuid::new_v4(), CanvasObjectType::Shape, 0.0, 0.0, 10.0, 10.0)
    }

    #[tokio::test]
    async fn update_keeps_object_id() {
        let store = CanvasStore::new();
        let obj = shape();
        store.add_object(obj.clone()).await;

        assert!(
            store
                .update_object(obj.id, |o| {
                    o.move_to(5.0, 6.0);
                    o.id = uuid::Uuid::new_v4();
                })
                .await
        );

        let stored = store.get(obj.id).await.unwrap();
        assert_eq!(stored.id, obj.id);
        assert_eq!((stored.x, stored.y), (5.0, 6.0));
    }

    #[tokio::test]
    async fn reconciled_id_is_reachable_through_alias() {
        let store = CanvasStore::new();
        let obj = shape();
        store.add_object(obj.clone()).await;
        let mut rx = store.subscribe();
        let server_id = uuid::Uuid::new_v4();

        assert!(store.reconcile_id(obj.id, server_id).await);
        assert_eq!(
            rx.recv().await.unwrap(),
            CanvasChange::IdReconciled {
                from: obj.id,
                to: server_id
            }
        );

        assert_eq!(store.resolve(obj.id).await, server_id);
        assert!(store.update_object(obj.id, |o| o.resize(20.0, 20.0)).await);
        match rx.recv().await.unwrap() {
            CanvasChange::Updated(updated) => {
                assert_eq!(updated.id, server_id);
                assert_eq!(updated.width, 20.0);
            }
            other => panic!("unexpected change: {other:?}"),
        }

        assert!(store.remove_object(obj.id).await);
        assert_eq!(rx.recv().await.unwrap(), CanvasChange::Removed(server_id));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn reconcile_of_missing_object_fails() {
        let store = CanvasStore::new();
        assert!(!store.reconcile_id(uuid::Uuid::new_v4(), uuid::Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn replace_all_drops_aliases() {
        let store = CanvasStore::new();
        let obj = shape();
        store.add_object(obj.clone()).await;
        let server_id = uuid::Uuid::new_v4();
        store.reconcile_id(obj.id, server_id).await;

        store.replace_all(vec![]).await;

        assert_eq!(store.resolve(obj.id).await, obj.id);
        assert!(store.get(obj.id).await.is_none());
    }
}
