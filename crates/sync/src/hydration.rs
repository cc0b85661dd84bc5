//! Loading a project's server state into the local stores.
//!
//! Server rows are loosely typed; mapping is forgiving where a default
//! is obvious (missing arrays, rotation, props) and skips rows it cannot
//! interpret rather than failing the whole project.

use adcanvas_client::api::{CanvasObjectRow, ChatMessageRow};
use adcanvas_client::{ClientError, PersistenceApi};
use adcanvas_core::{CanvasObject, CanvasObjectType, ChatMessage, EntityId, MessageRole, MessageType, Timestamp};
use chrono::{DateTime, Utc};

use crate::cache::ChatCache;
use crate::store::{CanvasStore, ChatStore};

fn parse_timestamp(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Map a chat row to a local message. Rows with an unknown role are
/// dropped; an unknown or missing message type reads as text.
pub fn message_from_row(row: ChatMessageRow) -> Option<ChatMessage> {
    let role = match row.role.parse::<MessageRole>() {
        Ok(role) => role,
        Err(e) => {
            tracing::warn!(message_id = %row.id, error = %e, "Skipping chat row");
            return None;
        }
    };

    let kind = match row.message_type.as_deref() {
        None => MessageType::Text,
        Some(raw) => raw.parse::<MessageType>().unwrap_or_else(|e| {
            tracing::warn!(message_id = %row.id, error = %e, "Treating chat row as text");
            MessageType::Text
        }),
    };

    let timestamp = parse_timestamp(&row.created_at).unwrap_or_else(|| {
        tracing::warn!(
            message_id = %row.id,
            created_at = %row.created_at,
            "Unparseable created_at, using current time",
        );
        Utc::now()
    });

    Some(ChatMessage {
        id: row.id,
        role,
        kind,
        content: row.content,
        timestamp,
        ad_data: None,
        image_urls: row.image_urls.unwrap_or_default(),
        is_temporary: false,
    })
}

/// Map chat rows to messages ordered by creation time (stable for ties).
pub fn messages_from_rows(rows: Vec<ChatMessageRow>) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = rows.into_iter().filter_map(message_from_row).collect();
    messages.sort_by_key(|m| m.timestamp);
    messages
}

/// Map a canvas row to a local object owned by `project_id`.
pub fn object_from_row(project_id: EntityId, row: CanvasObjectRow) -> Option<CanvasObject> {
    let kind = match row.kind.parse::<CanvasObjectType>() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::warn!(object_id = %row.id, error = %e, "Skipping canvas row");
            return None;
        }
    };

    let props = match row.props {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    Some(CanvasObject {
        id: row.id,
        project_id,
        kind,
        x: row.x,
        y: row.y,
        width: row.width,
        height: row.height,
        rotation: row.rotation.unwrap_or(0.0),
        src: row.src,
        props,
        updated_at: row.updated_at.as_deref().and_then(parse_timestamp),
    })
}

/// Map canvas rows to objects ordered by update time. Objects without a
/// timestamp sort first.
pub fn objects_from_rows(project_id: EntityId, rows: Vec<CanvasObjectRow>) -> Vec<CanvasObject> {
    let mut objects: Vec<CanvasObject> = rows
        .into_iter()
        .filter_map(|row| object_from_row(project_id, row))
        .collect();
    objects.sort_by_key(|o| o.updated_at);
    objects
}

/// Fetch a project's chat history through the cache, bypassing dedup.
pub async fn fetch_chat_messages(cache: &ChatCache, project_id: EntityId) -> Result<Vec<ChatMessage>, ClientError> {
    let messages = cache.revalidate(project_id).await?;
    Ok(messages.as_ref().clone())
}

pub async fn fetch_canvas_objects(
    api: &PersistenceApi,
    project_id: EntityId,
) -> Result<Vec<CanvasObject>, ClientError> {
    let rows = api.list_canvas_objects(project_id).await?;
    Ok(objects_from_rows(project_id, rows))
}

/// Fetch and replace the chat store. The store is untouched on error.
pub async fn hydrate_chat(cache: &ChatCache, store: &ChatStore, project_id: EntityId) -> Result<usize, ClientError> {
    let messages = fetch_chat_messages(cache, project_id).await?;
    let count = messages.len();
    store.replace_all(messages).await;
    tracing::info!(project_id = %project_id, count, "Chat hydrated");
    Ok(count)
}

/// Fetch and replace the canvas store. The store is untouched on error.
pub async fn hydrate_canvas(
    api: &PersistenceApi,
    store: &CanvasStore,
    project_id: EntityId,
) -> Result<usize, ClientError> {
    let objects = fetch_canvas_objects(api, project_id).await?;
    let count = objects.len();
    store.replace_all(objects).await;
    tracing::info!(project_id = %project_id, count, "Canvas hydrated");
    Ok(count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
