//! Domain model for the ad-creation playground.
//!
//! Chat messages, canvas objects and projects as the client holds them
//! locally, plus the rule deciding which chat messages are durable.

pub mod ad_generation;
pub mod canvas;
pub mod chat;
pub mod error;
pub mod project;
pub mod types;

pub use ad_generation::{AdGenerationData, AdGenerationStage};
pub use canvas::{CanvasObject, CanvasObjectType};
pub use chat::{ChatMessage, MessageRole, MessageType};
pub use error::CoreError;
pub use project::Project;
pub use types::{EntityId, Timestamp};
