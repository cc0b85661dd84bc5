//! Local in-memory stores.
//!
//! Each store owns its collection behind a tokio `RwLock` and broadcasts
//! a change record for every mutation. Changes are sent while the write
//! lock is held, so subscribers observe them in mutation order.

pub mod canvas;
pub mod chat;
pub mod project;

use std::sync::Arc;

pub use canvas::{CanvasChange, CanvasStore};
pub use chat::{ChatChange, ChatStore};
pub use project::ProjectStore;

/// Broadcast channel capacity for store changes.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// The stores of one client session, shared by the UI and the
/// persistence layer.
#[derive(Clone, Default)]
pub struct Stores {
    pub chat: Arc<ChatStore>,
    pub canvas: Arc<CanvasStore>,
    pub project: Arc<ProjectStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }
}
