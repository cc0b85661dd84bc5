//! Events published by the persistence layer.
//!
//! Subscribe through [`PersistenceManager::subscribe`](crate::PersistenceManager::subscribe)
//! to drive save indicators or surface failures to the user.

use adcanvas_core::EntityId;
use serde::Serialize;

/// Broadcast channel capacity for sync events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which kind of entity a write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    ChatMessage,
    CanvasObject,
    Project,
}

/// A state change in the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Both stores were replaced with server state.
    HydrationCompleted {
        project_id: EntityId,
        messages: usize,
        objects: usize,
    },

    /// Hydration failed; write-through stays off.
    HydrationFailed { project_id: EntityId, error: String },

    /// An entity reached the server.
    WriteSucceeded {
        project_id: EntityId,
        resource: Resource,
        entity_id: EntityId,
    },

    /// A write failed after exhausting retries. The entity stays unsaved
    /// until a later write of it succeeds.
    WriteFailed {
        project_id: EntityId,
        resource: Resource,
        entity_id: EntityId,
        error: String,
    },

    /// A write finished after its project stopped being active and its
    /// result was discarded.
    StaleWriteDropped {
        project_id: EntityId,
        resource: Resource,
    },
}

impl SyncEvent {
    pub fn project_id(&self) -> EntityId {
        match self {
            Self::HydrationCompleted { project_id, .. }
            | Self::HydrationFailed { project_id, .. }
            | Self::WriteSucceeded { project_id, .. }
            | Self::WriteFailed { project_id, .. }
            | Self::StaleWriteDropped { project_id, .. } => *project_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = SyncEvent::StaleWriteDropped {
            project_id: uuid::Uuid::nil(),
            resource: Resource::CanvasObject,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stale_write_dropped");
        assert_eq!(json["resource"], "canvas_object");
    }
}
