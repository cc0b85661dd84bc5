#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown message type: '{0}'")]
    UnknownMessageType(String),

    #[error("Unknown message role: '{0}'")]
    UnknownRole(String),

    #[error("Unknown canvas object type: '{0}'")]
    UnknownObjectType(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
