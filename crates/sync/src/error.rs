use adcanvas_client::ClientError;

/// Errors returned by the persistence manager and middleware handles.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("No project is configured for this persistence session")]
    NoProject,

    #[error("Persistence is disabled for this session")]
    Disabled,

    /// Hydration failed; local stores were left untouched.
    #[error("Hydration failed: {0}")]
    Hydration(#[source] ClientError),

    /// The middleware worker task is no longer running.
    #[error("Persistence worker has shut down")]
    WorkerGone,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
