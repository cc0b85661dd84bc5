//! Chat messages exchanged between the user and the ad agent.
//!
//! Only a subset of messages is durable. [`ChatMessage::is_persistable`]
//! is the single rule deciding which messages may ever reach the server;
//! progress updates, in-flight generations and temporary messages stay
//! local and disappear on reload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ad_generation::AdGenerationData;
use crate::error::CoreError;
use crate::types::{EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message type
// ---------------------------------------------------------------------------

/// Kind of chat message. Stored server-side in the `message_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain conversational text.
    Text,
    /// An ad-generation job that is still running.
    AdGeneration,
    /// Intermediate agent status line.
    AgentProgress,
    /// Final agent result, usually with generated images.
    AgentOutput,
    /// An error surfaced to the user.
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        Self::Text,
        Self::AdGeneration,
        Self::AgentProgress,
        Self::AgentOutput,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::AdGeneration => "ad_generation",
            Self::AgentProgress => "agent_progress",
            Self::AgentOutput => "agent_output",
            Self::Error => "error",
        }
    }
}

impl FromStr for MessageType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownMessageType(s.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message as held in the local chat store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: EntityId,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_data: Option<AdGenerationData>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Marks UI-only messages (typing indicators, local notices).
    #[serde(default)]
    pub is_temporary: bool,
}

impl ChatMessage {
    /// Create a message stamped with a fresh id and the current time.
    pub fn new(role: MessageRole, kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            kind,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            ad_data: None,
            image_urls: Vec::new(),
            is_temporary: false,
        }
    }

    pub fn user_text(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageType::Text, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageType::Text, content)
    }

    pub fn with_images(mut self, image_urls: Vec<String>) -> Self {
        self.image_urls = image_urls;
        self
    }

    pub fn with_ad_data(mut self, ad_data: AdGenerationData) -> Self {
        self.ad_data = Some(ad_data);
        self
    }

    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }

    /// An agent output is complete once its job (if any) has finished
    /// successfully.
    pub fn is_completed(&self) -> bool {
        self.ad_data.as_ref().map_or(true, AdGenerationData::is_completed)
    }

    /// Whether this message may be written to the server.
    ///
    /// Plain text and completed agent output survive a reload; in-flight
    /// generations, progress lines, errors and temporary messages never
    /// leave the client.
    pub fn is_persistable(&self) -> bool {
        if self.is_temporary {
            return false;
        }
        match self.kind {
            MessageType::Text => true,
            MessageType::AgentOutput => self.is_completed(),
            MessageType::AdGeneration | MessageType::AgentProgress | MessageType::Error => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
