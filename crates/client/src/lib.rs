//! REST client for the playground's persistence endpoints.
//!
//! Every read and write of chat and canvas data goes through
//! [`retry::api_call`], which performs the request over a [`Transport`]
//! and retries transient failures with exponential backoff. On top of
//! that, [`PersistenceApi`] offers typed wrappers for each endpoint and
//! [`OfflineQueue`] runs queued writes strictly one after another.

pub mod api;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod queue;
pub mod retry;
pub mod transport;

pub use api::PersistenceApi;
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use queue::{DrainOutcome, OfflineQueue};
pub use retry::{api_call, with_retry, RetryPolicy};
pub use reqwest::Method;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
