//! In-memory backend implementing the persistence REST endpoints.
//!
//! [`MockBackend`] is a [`Transport`] that answers requests from in-memory
//! tables instead of the network. It records every request it sees and
//! can be told to fail upcoming requests with a given status, which is
//! how the retry, hydration and middleware tests drive failure paths.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use adcanvas_core::types::SINGLE_TENANT_USER_ID;
use adcanvas_core::{CanvasObjectType, EntityId, MessageRole, MessageType, Project, Timestamp};
use chrono::{SecondsFormat, TimeZone, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;

use crate::api::{CanvasObjectPayload, CanvasObjectRow, ChatMessageRow, NewChatMessage, NewProject, ProjectPatch};
use crate::error::ClientError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// A request as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// When the request arrived (tokio clock, so paused-time tests can
    /// assert on spacing).
    pub at: tokio::time::Instant,
}

/// Scripted failure for upcoming requests.
struct FailureRule {
    method: Option<Method>,
    path_contains: Option<String>,
    status: u16,
    /// `None` fails forever.
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, request: &ApiRequest) -> bool {
        self.method.as_ref().map_or(true, |m| *m == request.method)
            && self
                .path_contains
                .as_deref()
                .map_or(true, |p| request.path.contains(p))
    }
}

#[derive(Default)]
struct BackendState {
    projects: Vec<Project>,
    messages: HashMap<EntityId, Vec<ChatMessageRow>>,
    objects: HashMap<EntityId, Vec<CanvasObjectRow>>,
    requests: Vec<RecordedRequest>,
    failures: VecDeque<FailureRule>,
    /// Milliseconds since the backend epoch; bumped for every write so
    /// timestamps are strictly increasing.
    clock_ms: i64,
}

impl BackendState {
    fn tick(&mut self) -> Timestamp {
        self.clock_ms += 1;
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
        epoch + chrono::Duration::milliseconds(self.clock_ms)
    }

    fn take_failure(&mut self, request: &ApiRequest) -> Option<u16> {
        let index = self.failures.iter().position(|rule| rule.matches(request))?;
        let rule = &mut self.failures[index];
        let status = rule.status;
        let exhausted = match &mut rule.remaining {
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.failures.remove(index);
        }
        Some(status)
    }
}

fn rfc3339(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ok(status: u16, body: serde_json::Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}

fn error(status: u16, message: &str) -> ApiResponse {
    ApiResponse::new(status, json!({ "error": message }).to_string())
}

fn parse_body<T: DeserializeOwned>(request: &ApiRequest) -> Result<T, ApiResponse> {
    let body = request
        .body
        .clone()
        .ok_or_else(|| error(400, "Missing request body"))?;
    serde_json::from_value(body).map_err(|e| error(400, &format!("Invalid body: {e}")))
}

/// In-memory stand-in for the application API.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
    latency: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency` (on the tokio clock).
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    // ---- seeding ----

    pub async fn seed_project(&self, name: &str) -> Project {
        let mut state = self.state.lock().await;
        let now = state.tick();
        let project = Project {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            thumbnail_url: None,
            user_id: SINGLE_TENANT_USER_ID.to_string(),
            session_id: None,
            created_at: now,
            updated_at: now,
        };
        state.projects.push(project.clone());
        project
    }

    pub async fn seed_message(
        &self,
        project_id: EntityId,
        role: MessageRole,
        content: &str,
        message_type: MessageType,
        image_urls: Vec<String>,
    ) -> ChatMessageRow {
        let mut state = self.state.lock().await;
        let created_at = rfc3339(state.tick());
        let row = ChatMessageRow {
            id: uuid::Uuid::new_v4(),
            role: role.as_str().to_string(),
            content: content.to_string(),
            message_type: Some(message_type.as_str().to_string()),
            image_urls: Some(image_urls),
            created_at,
        };
        state.messages.entry(project_id).or_default().push(row.clone());
        row
    }

    /// Insert a raw row exactly as given (for malformed-data tests).
    pub async fn seed_message_row(&self, project_id: EntityId, row: ChatMessageRow) {
        let mut state = self.state.lock().await;
        state.messages.entry(project_id).or_default().push(row);
    }

    pub async fn seed_object(
        &self,
        project_id: EntityId,
        kind: CanvasObjectType,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> CanvasObjectRow {
        let mut state = self.state.lock().await;
        let updated_at = rfc3339(state.tick());
        let row = CanvasObjectRow {
            id: uuid::Uuid::new_v4(),
            kind: kind.as_str().to_string(),
            x,
            y,
            width,
            height,
            rotation: Some(0.0),
            src: (kind == CanvasObjectType::Image).then(|| "https://cdn.example/seed.png".to_string()),
            props: Some(json!({})),
            updated_at: Some(updated_at),
        };
        state.objects.entry(project_id).or_default().push(row.clone());
        row
    }

    // ---- failure injection ----

    /// Fail the next `times` requests, whatever they are, with `status`.
    pub async fn fail_next(&self, times: usize, status: u16) {
        if times == 0 {
            return;
        }
        self.state.lock().await.failures.push_back(FailureRule {
            method: None,
            path_contains: None,
            status,
            remaining: Some(times),
        });
    }

    /// Fail every `method` request whose path contains `path_contains`
    /// until [`clear_failures`](Self::clear_failures) is called.
    pub async fn fail_requests(&self, method: Method, path_contains: &str, status: u16) {
        self.state.lock().await.failures.push_back(FailureRule {
            method: Some(method),
            path_contains: Some(path_contains.to_string()),
            status,
            remaining: None,
        });
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    // ---- inspection ----

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Recorded requests with the given method whose path ends with
    /// `path_suffix`.
    pub async fn requests_to(&self, method: Method, path_suffix: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.method == method && r.path.ends_with(path_suffix))
            .cloned()
            .collect()
    }

    /// Writes only (anything but `GET`).
    pub async fn writes(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.method != Method::GET)
            .cloned()
            .collect()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    pub async fn messages(&self, project_id: EntityId) -> Vec<ChatMessageRow> {
        self.state
            .lock()
            .await
            .messages
            .get(&project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn objects(&self, project_id: EntityId) -> Vec<CanvasObjectRow> {
        self.state
            .lock()
            .await
            .objects
            .get(&project_id)
            .cloned()
            .unwrap_or_default()
    }

    // ---- routing ----

    fn route(state: &mut BackendState, request: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        let method = &request.method;

        let Some(rest) = segments.strip_prefix(&["api", "projects"]) else {
            return error(404, "Not found");
        };

        match rest {
            [] if *method == Method::GET => ok(200, json!({ "projects": state.projects })),
            [] if *method == Method::POST => Self::create_project(state, request),
            [id] => match id.parse::<EntityId>() {
                Ok(id) => Self::project_route(state, request, id),
                Err(_) => error(400, "Invalid project id"),
            },
            [id, collection, tail @ ..] => {
                let Ok(project_id) = id.parse::<EntityId>() else {
                    return error(400, "Invalid project id");
                };
                match (*collection, tail) {
                    ("chat", []) => Self::chat_route(state, request, project_id),
                    ("canvas", []) => Self::canvas_route(state, request, project_id),
                    ("canvas", ["objects", object_id]) => match object_id.parse::<EntityId>() {
                        Ok(object_id) => Self::object_route(state, request, project_id, object_id),
                        Err(_) => error(400, "Invalid object id"),
                    },
                    _ => error(404, "Not found"),
                }
            }
            _ => error(405, &format!("Method {method} not allowed")),
        }
    }

    fn create_project(state: &mut BackendState, request: &ApiRequest) -> ApiResponse {
        let body: NewProject = match parse_body(request) {
            Ok(body) => body,
            Err(response) => return response,
        };
        if body.name.trim().is_empty() {
            return error(400, "Project name is required");
        }
        let now = state.tick();
        let project = Project {
            id: uuid::Uuid::new_v4(),
            name: body.name,
            description: body.description,
            thumbnail_url: None,
            user_id: SINGLE_TENANT_USER_ID.to_string(),
            session_id: None,
            created_at: now,
            updated_at: now,
        };
        state.projects.push(project.clone());
        ok(201, json!({ "project": project }))
    }

    fn project_route(state: &mut BackendState, request: &ApiRequest, id: EntityId) -> ApiResponse {
        let Some(index) = state.projects.iter().position(|p| p.id == id) else {
            return error(404, "Project not found");
        };
        match request.method {
            Method::GET => ok(200, json!({ "project": state.projects[index] })),
            Method::PATCH => {
                let patch: ProjectPatch = match parse_body(request) {
                    Ok(patch) => patch,
                    Err(response) => return response,
                };
                let now = state.tick();
                let project = &mut state.projects[index];
                if let Some(name) = patch.name {
                    project.name = name;
                }
                if let Some(description) = patch.description {
                    project.description = Some(description);
                }
                if let Some(thumbnail_url) = patch.thumbnail_url {
                    project.thumbnail_url = Some(thumbnail_url);
                }
                project.updated_at = now;
                ok(200, json!({ "project": project }))
            }
            Method::DELETE => {
                state.projects.remove(index);
                state.messages.remove(&id);
                state.objects.remove(&id);
                ok(200, json!({ "success": true }))
            }
            _ => error(405, "Method not allowed"),
        }
    }

    fn chat_route(state: &mut BackendState, request: &ApiRequest, project_id: EntityId) -> ApiResponse {
        match request.method {
            Method::GET => {
                let mut messages = state.messages.get(&project_id).cloned().unwrap_or_default();
                messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                ok(200, json!({ "messages": messages }))
            }
            Method::POST => {
                let body: NewChatMessage = match parse_body(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                let created_at = rfc3339(state.tick());
                let row = ChatMessageRow {
                    id: uuid::Uuid::new_v4(),
                    role: body.role.as_str().to_string(),
                    content: body.content,
                    message_type: Some(body.message_type.as_str().to_string()),
                    image_urls: Some(body.image_urls),
                    created_at,
                };
                state.messages.entry(project_id).or_default().push(row.clone());
                ok(201, json!({ "message": row }))
            }
            _ => error(405, "Method not allowed"),
        }
    }

    fn canvas_route(state: &mut BackendState, request: &ApiRequest, project_id: EntityId) -> ApiResponse {
        match request.method {
            Method::GET => {
                let mut objects = state.objects.get(&project_id).cloned().unwrap_or_default();
                objects.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
                ok(200, json!({ "objects": objects }))
            }
            Method::POST => {
                let body: CanvasObjectPayload = match parse_body(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                let updated_at = rfc3339(state.tick());
                let row = CanvasObjectRow {
                    id: uuid::Uuid::new_v4(),
                    kind: body.kind.as_str().to_string(),
                    x: body.x,
                    y: body.y,
                    width: body.width,
                    height: body.height,
                    rotation: Some(body.rotation),
                    src: body.src,
                    props: Some(serde_json::Value::Object(body.props)),
                    updated_at: Some(updated_at),
                };
                state.objects.entry(project_id).or_default().push(row.clone());
                ok(201, json!({ "object": row }))
            }
            _ => error(405, "Method not allowed"),
        }
    }

    fn object_route(
        state: &mut BackendState,
        request: &ApiRequest,
        project_id: EntityId,
        object_id: EntityId,
    ) -> ApiResponse {
        let now = state.tick();
        let objects = state.objects.entry(project_id).or_default();
        let Some(index) = objects.iter().position(|o| o.id == object_id) else {
            return error(404, "Canvas object not found");
        };
        match request.method {
            Method::PATCH => {
                let body: CanvasObjectPayload = match parse_body(request) {
                    Ok(body) => body,
                    Err(response) => return response,
                };
                let row = &mut objects[index];
                row.kind = body.kind.as_str().to_string();
                row.x = body.x;
                row.y = body.y;
                row.width = body.width;
                row.height = body.height;
                row.rotation = Some(body.rotation);
                row.src = body.src;
                row.props = Some(serde_json::Value::Object(body.props));
                row.updated_at = Some(rfc3339(now));
                ok(200, json!({ "object": row }))
            }
            Method::DELETE => {
                objects.remove(index);
                ok(200, json!({ "success": true }))
            }
            _ => error(405, "Method not allowed"),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockBackend {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        state.requests.push(RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            body: request.body.clone(),
            at: tokio::time::Instant::now(),
        });

        if let Some(status) = state.take_failure(request) {
            return Ok(error(status, "Injected failure"));
        }

        Ok(Self::route(&mut state, request))
    }
}
