use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::{Session, SessionMetadata};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence contract for refresh sessions. The lifecycle manager needs
/// exactly these access patterns and nothing else.
#[async_trait::async_trait]
pub trait SessionStore {
    async fn create_session(
        &self,
        user_id: &Uuid,
        session_id: &Uuid,
        refresh_token_hash: &str,
        expires_at: DateTime<Utc>,
        metadata: &SessionMetadata,
    ) -> Result<Session, AppError>;

    /// Finds the active, unexpired session whose current *or* immediately
    /// previous session id matches. The previous-id match is what routes a
    /// replayed, already-rotated credential into the hash comparison where
    /// theft detection fires, instead of a silent miss.
    async fn find_active_session(&self, user_id: &Uuid, session_id: &Uuid) -> Result<Option<Session>, AppError>;

    /// Replaces the row's session id, stored hash and expiry in one atomic
    /// update conditioned on the current session id. Returns false when a
    /// concurrent rotation already replaced the row.
    async fn rotate_session(
        &self,
        row_id: &Uuid,
        expected_session_id: &Uuid,
        new_session_id: &Uuid,
        new_refresh_token_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn delete_session(&self, row_id: &Uuid) -> Result<(), AppError>;

    /// Best-effort deletion by (user, session id) pair, used by logout where
    /// the row id is not known. Matches the previous session id too so a
    /// logout right after a rotation still lands.
    async fn delete_sessions_for(&self, user_id: &Uuid, session_id: &Uuid) -> Result<(), AppError>;
}

#[async_trait::async_trait]
impl SessionStore for PostgresRepository {
    async fn create_session(
        &self,
        user_id: &Uuid,
        session_id: &Uuid,
        refresh_token_hash: &str,
        expires_at: DateTime<Utc>,
        metadata: &SessionMetadata,
    ) -> Result<Session, AppError> {
        // Opportunistic cleanup; expired rows for this user can never
        // authorize a rotation again.
        sqlx::query("DELETE FROM user_session WHERE user_id = $1 AND expires_at <= now()")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO user_session
                (user_id, session_id, refresh_token_hash, expires_at, device_info, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, session_id, previous_session_id, refresh_token_hash,
                      expires_at, is_active, device_info, ip_address, user_agent,
                      created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(refresh_token_hash)
        .bind(expires_at)
        .bind(&metadata.device_info)
        .bind(&metadata.ip_address)
        .bind(&metadata.user_agent)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn find_active_session(&self, user_id: &Uuid, session_id: &Uuid) -> Result<Option<Session>, AppError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, session_id, previous_session_id, refresh_token_hash,
                   expires_at, is_active, device_info, ip_address, user_agent,
                   created_at, updated_at
            FROM user_session
            WHERE user_id = $1
              AND (session_id = $2 OR previous_session_id = $2)
              AND is_active
              AND expires_at > now()
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn rotate_session(
        &self,
        row_id: &Uuid,
        expected_session_id: &Uuid,
        new_session_id: &Uuid,
        new_refresh_token_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // Compare-and-swap on the current session id: of two concurrent
        // rotations with the same credential, exactly one update matches.
        let result = sqlx::query(
            r#"
            UPDATE user_session
            SET previous_session_id = session_id,
                session_id = $1,
                refresh_token_hash = $2,
                expires_at = $3,
                updated_at = now()
            WHERE id = $4
              AND session_id = $5
            "#,
        )
        .bind(new_session_id)
        .bind(new_refresh_token_hash)
        .bind(new_expires_at)
        .bind(row_id)
        .bind(expected_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_session(&self, row_id: &Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM user_session WHERE id = $1").bind(row_id).execute(&self.pool).await?;

        Ok(())
    }

    async fn delete_sessions_for(&self, user_id: &Uuid, session_id: &Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            DELETE FROM user_session
            WHERE user_id = $1
              AND (session_id = $2 OR previous_session_id = $2)
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
