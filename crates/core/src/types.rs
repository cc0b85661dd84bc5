/// Projects, chat messages and canvas objects are keyed by UUIDs.
pub type EntityId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The application runs single-tenant; every project belongs to this user.
pub const SINGLE_TENANT_USER_ID: &str = "00000000-0000-0000-0000-000000000001";
