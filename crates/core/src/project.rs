use serde::{Deserialize, Serialize};

use crate::types::{EntityId, Timestamp};

/// Root aggregate owning a chat history and a canvas.
///
/// Deleting a project cascades to its messages and objects in the
/// database; the client never cascades on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
