use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One row per active login. The row id stays stable across refreshes;
/// `session_id`, the stored hash and the expiry are replaced in place on
/// every rotation, and the outgoing `session_id` is kept one rotation deep
/// in `previous_session_id` so a replayed credential can be recognized as
/// theft instead of silently missing the lookup.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub previous_session_id: Option<Uuid>,
    /// Argon2 digest of the current refresh token. The raw token is never
    /// stored; a stolen database does not yield usable credentials.
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Device metadata captured at login, diagnostic only.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
