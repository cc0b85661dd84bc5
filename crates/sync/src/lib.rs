//! Client-side persistence synchronisation for the ad-creation playground.
//!
//! Local stores hold chat messages, canvas objects and projects. Once a
//! project session is initialised, the chat and canvas middlewares watch
//! those stores and write qualifying mutations back to the server after a
//! debounce window. [`PersistenceManager`] owns the middlewares and makes
//! sure a project is hydrated from the server before any write-through
//! happens. [`ChatCache`] is the single read path for chat history.

pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod hydration;
pub mod manager;
pub mod middleware;
pub mod store;

pub use cache::{CacheConfig, ChatCache};
pub use config::SyncSettings;
pub use debounce::{Debouncer, Phase};
pub use error::PersistenceError;
pub use events::{Resource, SyncEvent};
pub use manager::{ManagerState, PersistenceConfig, PersistenceManager};
pub use middleware::{Fence, Middleware, MiddlewareConfig, MiddlewareStatus};
pub use store::{CanvasChange, CanvasStore, ChatChange, ChatStore, ProjectStore, Stores};
