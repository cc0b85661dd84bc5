//! Typed wrappers for the project, chat and canvas REST endpoints.
//!
//! Row types mirror the JSON the server sends (snake_case, loosely
//! typed); mapping them into local store shapes happens in the sync
//! layer. All calls go through [`api_call`] and therefore share its
//! retry behaviour.

use std::sync::Arc;
use std::time::Duration;

use adcanvas_core::{CanvasObject, CanvasObjectType, ChatMessage, EntityId, MessageRole, MessageType, Project};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::retry::{api_call, RetryPolicy};
use crate::transport::{ApiRequest, HttpTransport, Transport};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A chat message row as returned by `GET/POST /api/projects/{id}/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageRow {
    pub id: EntityId,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub image_urls: Option<Vec<String>>,
    pub created_at: String,
}

/// Body of `POST /api/projects/{id}/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub image_urls: Vec<String>,
    pub message_type: MessageType,
}

impl From<&ChatMessage> for NewChatMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            image_urls: msg.image_urls.clone(),
            message_type: msg.kind,
        }
    }
}

/// A canvas object row as returned by `GET/POST /api/projects/{id}/canvas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObjectRow {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub props: Option<serde_json::Value>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Body of canvas object `POST` and `PATCH` requests. Always carries the
/// full object state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObjectPayload {
    #[serde(rename = "type")]
    pub kind: CanvasObjectType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub src: Option<String>,
    pub props: serde_json::Map<String, serde_json::Value>,
}

impl From<&CanvasObject> for CanvasObjectPayload {
    fn from(obj: &CanvasObject) -> Self {
        Self {
            kind: obj.kind,
            x: obj.x,
            y: obj.y,
            width: obj.width,
            height: obj.height,
            rotation: obj.rotation,
            src: obj.src.clone(),
            props: obj.props.clone(),
        }
    }
}

/// Body of `POST /api/projects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `PATCH /api/projects/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    messages: Vec<ChatMessageRow>,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: ChatMessageRow,
}

#[derive(Deserialize)]
struct ObjectsEnvelope {
    objects: Vec<CanvasObjectRow>,
}

#[derive(Deserialize)]
struct ObjectEnvelope {
    object: CanvasObjectRow,
}

#[derive(Deserialize)]
struct ProjectsEnvelope {
    projects: Vec<Project>,
}

#[derive(Deserialize)]
struct ProjectEnvelope {
    project: Project,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub fn projects_path() -> String {
    "/api/projects".to_string()
}

pub fn project_path(project_id: EntityId) -> String {
    format!("/api/projects/{project_id}")
}

/// Also the cache key for a project's chat history.
pub fn chat_path(project_id: EntityId) -> String {
    format!("/api/projects/{project_id}/chat")
}

pub fn canvas_path(project_id: EntityId) -> String {
    format!("/api/projects/{project_id}/canvas")
}

pub fn canvas_object_path(project_id: EntityId, object_id: EntityId) -> String {
    format!("/api/projects/{project_id}/canvas/objects/{object_id}")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Typed client for the persistence endpoints.
///
/// Cheap to share behind an `Arc`; the transport is shared by all
/// callers.
pub struct PersistenceApi {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl PersistenceApi {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Build an HTTP-backed client from configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(transport), config.retry))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    // ---- chat ----

    /// All messages of a project, oldest first.
    pub async fn list_messages(&self, project_id: EntityId) -> Result<Vec<ChatMessageRow>, ClientError> {
        let envelope: MessagesEnvelope = self.call(ApiRequest::get(chat_path(project_id))).await?;
        Ok(envelope.messages)
    }

    pub async fn create_message(
        &self,
        project_id: EntityId,
        message: &NewChatMessage,
    ) -> Result<ChatMessageRow, ClientError> {
        let envelope: MessageEnvelope = self
            .call(ApiRequest::post(chat_path(project_id), message)?)
            .await?;
        Ok(envelope.message)
    }

    // ---- canvas ----

    /// All canvas objects of a project, least recently updated first.
    pub async fn list_canvas_objects(
        &self,
        project_id: EntityId,
    ) -> Result<Vec<CanvasObjectRow>, ClientError> {
        let envelope: ObjectsEnvelope = self.call(ApiRequest::get(canvas_path(project_id))).await?;
        Ok(envelope.objects)
    }

    pub async fn create_canvas_object(
        &self,
        project_id: EntityId,
        object: &CanvasObjectPayload,
    ) -> Result<CanvasObjectRow, ClientError> {
        let envelope: ObjectEnvelope = self
            .call(ApiRequest::post(canvas_path(project_id), object)?)
            .await?;
        Ok(envelope.object)
    }

    pub async fn update_canvas_object(
        &self,
        project_id: EntityId,
        object_id: EntityId,
        object: &CanvasObjectPayload,
    ) -> Result<(), ClientError> {
        let request = ApiRequest::patch(canvas_object_path(project_id, object_id), object)?;
        self.call_discarding(request).await
    }

    pub async fn delete_canvas_object(
        &self,
        project_id: EntityId,
        object_id: EntityId,
    ) -> Result<(), ClientError> {
        self.call_discarding(ApiRequest::delete(canvas_object_path(project_id, object_id)))
            .await
    }

    // ---- projects ----

    pub async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        let envelope: ProjectsEnvelope = self.call(ApiRequest::get(projects_path())).await?;
        Ok(envelope.projects)
    }

    pub async fn get_project(&self, project_id: EntityId) -> Result<Project, ClientError> {
        let envelope: ProjectEnvelope = self.call(ApiRequest::get(project_path(project_id))).await?;
        Ok(envelope.project)
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ClientError> {
        let envelope: ProjectEnvelope = self
            .call(ApiRequest::post(projects_path(), project)?)
            .await?;
        Ok(envelope.project)
    }

    pub async fn update_project(
        &self,
        project_id: EntityId,
        patch: &ProjectPatch,
    ) -> Result<Project, ClientError> {
        let envelope: ProjectEnvelope = self
            .call(ApiRequest::patch(project_path(project_id), patch)?)
            .await?;
        Ok(envelope.project)
    }

    pub async fn delete_project(&self, project_id: EntityId) -> Result<(), ClientError> {
        self.call_discarding(ApiRequest::delete(project_path(project_id)))
            .await
    }

    // ---- private helpers ----

    /// Perform the request and decode the JSON body.
    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let response = api_call(self.transport.as_ref(), &self.retry, &request).await?;
        response.json()
    }

    /// Perform the request, ignoring whatever body comes back.
    async fn call_discarding(&self, request: ApiRequest) -> Result<(), ClientError> {
        api_call(self.transport.as_ref(), &self.retry, &request).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use reqwest::Method;

    fn api_with(backend: &Arc<MockBackend>) -> PersistenceApi {
        PersistenceApi::new(backend.clone(), RetryPolicy::default())
    }

    #[test]
    fn new_chat_message_body_matches_endpoint_shape() {
        let msg = ChatMessage::user_text("hello");
        let body = serde_json::to_value(NewChatMessage::from(&msg)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "role": "user",
                "content": "hello",
                "image_urls": [],
                "message_type": "text",
            })
        );
    }

    #[test]
    fn canvas_payload_uses_type_key() {
        let obj = CanvasObject::image(uuid::Uuid::new_v4(), "https://cdn.example/a.png", 64.0, 32.0);
        let body = serde_json::to_value(CanvasObjectPayload::from(&obj)).unwrap();
        assert_eq!(body["type"], "image");
        assert_eq!(body["src"], "https://cdn.example/a.png");
        assert_eq!(body["width"], 64.0);
        assert!(body.get("id").is_none());
    }

    #[test]
    fn project_patch_omits_unset_fields() {
        let patch = ProjectPatch {
            name: Some("Spring campaign".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({"name": "Spring campaign"})
        );
    }

    #[test]
    fn paths_follow_rest_layout() {
        let project = uuid::Uuid::nil();
        let object = uuid::Uuid::from_u128(42);
        assert_eq!(chat_path(project), format!("/api/projects/{project}/chat"));
        assert_eq!(
            canvas_object_path(project, object),
            format!("/api/projects/{project}/canvas/objects/{object}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_message_posts_to_chat_endpoint() {
        let backend = Arc::new(MockBackend::new());
        let api = api_with(&backend);
        let project = uuid::Uuid::new_v4();

        let row = api
            .create_message(project, &NewChatMessage::from(&ChatMessage::user_text("hi")))
            .await
            .unwrap();

        assert_eq!(row.content, "hi");
        assert_eq!(row.message_type.as_deref(), Some("text"));
        let requests = backend.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].path, chat_path(project));
    }

    #[tokio::test(start_paused = true)]
    async fn list_messages_retries_server_errors() {
        let backend = Arc::new(MockBackend::new());
        let project = uuid::Uuid::new_v4();
        backend
            .seed_message(project, MessageRole::User, "stored", MessageType::Text, vec![])
            .await;
        backend.fail_next(2, 503).await;

        let rows = api_with(&backend).list_messages(project).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(backend.requests().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_object_update_is_terminal() {
        let backend = Arc::new(MockBackend::new());
        let project = uuid::Uuid::new_v4();
        let obj = CanvasObject::text(project, "Hello", 0.0, 0.0);

        let err = api_with(&backend)
            .update_canvas_object(project, obj.id, &CanvasObjectPayload::from(&obj))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(backend.requests().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn project_crud_round_trip() {
        let backend = Arc::new(MockBackend::new());
        let api = api_with(&backend);

        let created = api
            .create_project(&NewProject {
                name: "Launch".into(),
                description: Some("Q3 launch ads".into()),
            })
            .await
            .unwrap();
        assert_eq!(created.user_id, adcanvas_core::types::SINGLE_TENANT_USER_ID);

        let renamed = api
            .update_project(
                created.id,
                &ProjectPatch {
                    name: Some("Launch v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Launch v2");
        assert_eq!(renamed.description.as_deref(), Some("Q3 launch ads"));

        assert_eq!(api.list_projects().await.unwrap().len(), 1);
        api.delete_project(created.id).await.unwrap();
        assert_eq!(api.get_project(created.id).await.unwrap_err().status(), Some(404));
    }
}
