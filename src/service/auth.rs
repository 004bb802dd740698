use crate::database::session::SessionStore;
use crate::database::user::UserStore;
use crate::error::app_error::AppError;
use crate::models::session::SessionMetadata;
use crate::models::user::User;
use crate::service::hash::{dummy_verify, hash_secret, verify_secret};
use crate::service::tokens::TokenCodec;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// The credential pair handed to the caller when a session is established
/// or rotated. The raw refresh token exists only here and in the client;
/// the store keeps its hash.
#[derive(Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Orchestrates the session lifecycle: login, refresh rotation, logout and
/// identity lookup. Generic over the stores so tests can substitute an
/// in-memory double.
pub struct AuthService<'a, R> {
    pub repo: &'a R,
    pub tokens: &'a TokenCodec,
}

impl<'a, R> AuthService<'a, R>
where
    R: UserStore + SessionStore + Sync,
{
    pub fn new(repo: &'a R, tokens: &'a TokenCodec) -> Self {
        Self { repo, tokens }
    }

    /// Creates an account. Duplicate email or username is a conflict; the
    /// password leaves this function only as an Argon2 digest.
    pub async fn signup(&self, email: &str, username: &str, password: &str) -> Result<User, AppError> {
        if self.repo.user_exists_by_email_or_username(email, username).await? {
            warn!(email = %email, "signup attempt with existing email or username");
            return Err(AppError::UserAlreadyExists(email.to_string()));
        }

        let password_hash = hash_secret(password)?;
        let user = self.repo.create_user(email, username, &password_hash).await?;
        info!(user_id = %user.id, "user created");

        Ok(user)
    }

    /// Anonymous → Authenticated. Bad email and bad password are reported
    /// identically; unknown accounts still pay for one hash verification so
    /// response timing does not betray them.
    pub async fn login(&self, email: &str, password: &str, metadata: &SessionMetadata) -> Result<(User, IssuedTokens), AppError> {
        let Some(user) = self.repo.find_user_by_email(email).await? else {
            dummy_verify(password);
            warn!(email = %email, "login attempt for unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !verify_secret(password, &user.password_hash) {
            warn!(user_id = %user.id, "login attempt with wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let session_id = Uuid::new_v4();
        let access_token = self.tokens.issue_access(&user)?;
        let refresh_token = self.tokens.issue_refresh(user.id, session_id)?;

        let refresh_hash = hash_secret(&refresh_token)?;
        let expires_at = Utc::now() + self.tokens.refresh_ttl();
        self.repo.create_session(&user.id, &session_id, &refresh_hash, expires_at, metadata).await?;

        info!(user_id = %user.id, "login succeeded");
        Ok((
            user,
            IssuedTokens {
                access_token,
                refresh_token,
            },
        ))
    }

    /// Rotated(n) → Rotated(n+1). The presented refresh token is single-use:
    /// a hash mismatch on a located session means the credential was already
    /// rotated (or never ours), so the whole session is revoked on the spot
    /// rather than just rejecting the call.
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<(User, IssuedTokens), AppError> {
        let claims = self.tokens.verify_refresh(raw_refresh_token)?;

        let Some(session) = self.repo.find_active_session(&claims.sub, &claims.sid).await? else {
            warn!(user_id = %claims.sub, "refresh attempt with no matching active session");
            return Err(AppError::SessionNotFound);
        };

        if !verify_secret(raw_refresh_token, &session.refresh_token_hash) {
            // Theft detection: fail closed and kill the session.
            self.repo.delete_session(&session.id).await?;
            warn!(user_id = %claims.sub, session_row = %session.id, "refresh token reuse detected, session revoked");
            return Err(AppError::InvalidRefreshToken);
        }

        let Some(user) = self.repo.find_user_by_id(&session.user_id).await? else {
            return Err(AppError::UserNotFound);
        };

        let new_session_id = Uuid::new_v4();
        let access_token = self.tokens.issue_access(&user)?;
        let refresh_token = self.tokens.issue_refresh(user.id, new_session_id)?;
        let new_hash = hash_secret(&refresh_token)?;
        let new_expires_at = Utc::now() + self.tokens.refresh_ttl();

        let rotated = self
            .repo
            .rotate_session(&session.id, &session.session_id, &new_session_id, &new_hash, new_expires_at)
            .await?;
        if !rotated {
            // A concurrent rotation won the compare-and-swap; this caller
            // holds a stale credential.
            warn!(user_id = %user.id, session_row = %session.id, "refresh lost rotation race");
            return Err(AppError::SessionNotFound);
        }

        info!(user_id = %user.id, "refresh rotation succeeded");
        Ok((
            user,
            IssuedTokens {
                access_token,
                refresh_token,
            },
        ))
    }

    /// Any state → Revoked. Idempotent and infallible outward: a missing,
    /// malformed or already-revoked credential still logs the caller out.
    pub async fn logout(&self, raw_refresh_token: Option<&str>) {
        let Some(raw) = raw_refresh_token else {
            return;
        };
        let Ok(claims) = self.tokens.verify_refresh(raw) else {
            return;
        };

        match self.repo.delete_sessions_for(&claims.sub, &claims.sid).await {
            Ok(()) => info!(user_id = %claims.sub, "session deleted on logout"),
            Err(err) => warn!(user_id = %claims.sub, error = ?err, "session deletion failed on logout"),
        }
    }

    /// Identity lookup for a verified access-token subject. A valid token
    /// whose user has vanished is handled, not assumed impossible.
    pub async fn current_user(&self, user_id: &Uuid) -> Result<User, AppError> {
        self.repo.find_user_by_id(user_id).await?.ok_or(AppError::UserNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::test_utils::MockRepository;

    fn codec() -> TokenCodec {
        TokenCodec::from_config(&TokenConfig {
            access_secret: "access-test-secret".to_string(),
            refresh_secret: "refresh-test-secret".to_string(),
            ..TokenConfig::default()
        })
        .expect("valid codec")
    }

    async fn signed_up(repo: &MockRepository, tokens: &TokenCodec) -> User {
        AuthService::new(repo, tokens)
            .signup("alice@example.com", "alice", "hunter22")
            .await
            .expect("signup")
    }

    #[tokio::test]
    async fn login_issues_both_tokens_and_one_session_row() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let (user, issued) = service
            .login("alice@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect("login");

        assert_eq!(user.email, "alice@example.com");
        assert!(tokens.verify_access(&issued.access_token).is_ok());
        assert!(tokens.verify_refresh(&issued.refresh_token).is_ok());

        let sessions = repo.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_active);
        // Hash secrecy: the stored value is a digest, not the token.
        assert_ne!(sessions[0].refresh_token_hash, issued.refresh_token);
        assert!(sessions[0].refresh_token_hash.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn login_with_wrong_password_creates_no_session() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let err = service
            .login("alice@example.com", "wrong-password", &SessionMetadata::default())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidCredentials));
        assert!(repo.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_fail_identically() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let unknown = service
            .login("nobody@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect_err("must fail");
        let wrong = service
            .login("alice@example.com", "wrong", &SessionMetadata::default())
            .await
            .expect_err("must fail");

        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_email() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let err = service.signup("alice@example.com", "alice2", "hunter22").await.expect_err("conflict");
        assert!(matches!(err, AppError::UserAlreadyExists(_)));
    }

    #[tokio::test]
    async fn refresh_rotates_session_id_and_hash() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let (_, issued) = service
            .login("alice@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect("login");
        let before = repo.sessions().await[0].clone();

        let (_, rotated) = service.refresh(&issued.refresh_token).await.expect("refresh");
        let after = repo.sessions().await[0].clone();

        assert_eq!(before.id, after.id, "same row replaced in place");
        assert_ne!(before.session_id, after.session_id);
        assert_eq!(after.previous_session_id, Some(before.session_id));
        assert_ne!(before.refresh_token_hash, after.refresh_token_hash);
        assert!(tokens.verify_refresh(&rotated.refresh_token).is_ok());
    }

    #[tokio::test]
    async fn replayed_refresh_token_fails_and_revokes_the_session() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let (_, original) = service
            .login("alice@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect("login");

        let (_, rotated) = service.refresh(&original.refresh_token).await.expect("first use succeeds");

        // Second use of the original credential is theft.
        let err = service.refresh(&original.refresh_token).await.expect_err("replay must fail");
        assert!(matches!(err, AppError::InvalidRefreshToken));
        assert!(repo.sessions().await.is_empty(), "session row deleted");

        // The legitimately rotated credential is dead too: the whole
        // session was revoked, not just the one call.
        let err = service.refresh(&rotated.refresh_token).await.expect_err("session is gone");
        assert!(matches!(err, AppError::SessionNotFound));
    }

    #[tokio::test]
    async fn expired_session_row_rejects_rotation() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let (_, issued) = service
            .login("alice@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect("login");

        repo.expire_all_sessions().await;

        let err = service.refresh(&issued.refresh_token).await.expect_err("expired row");
        assert!(matches!(err, AppError::SessionNotFound));
    }

    #[tokio::test]
    async fn garbage_refresh_token_is_rejected() {
        let repo = MockRepository::default();
        let tokens = codec();
        let service = AuthService::new(&repo, &tokens);

        let err = service.refresh("not-a-jwt").await.expect_err("must fail");
        assert!(matches!(err, AppError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn concurrent_rotation_yields_exactly_one_success() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let (_, issued) = service
            .login("alice@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect("login");

        let (first, second) = tokio::join!(service.refresh(&issued.refresh_token), service.refresh(&issued.refresh_token));

        let successes = [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1, "exactly one concurrent rotation may win");
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let repo = MockRepository::default();
        let tokens = codec();
        signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let (_, issued) = service
            .login("alice@example.com", "hunter22", &SessionMetadata::default())
            .await
            .expect("login");

        // No credential, malformed credential, valid credential, then the
        // same credential again: all succeed.
        service.logout(None).await;
        service.logout(Some("garbage")).await;
        service.logout(Some(&issued.refresh_token)).await;
        assert!(repo.sessions().await.is_empty());
        service.logout(Some(&issued.refresh_token)).await;
    }

    #[tokio::test]
    async fn current_user_reports_vanished_user() {
        let repo = MockRepository::default();
        let tokens = codec();
        let user = signed_up(&repo, &tokens).await;
        let service = AuthService::new(&repo, &tokens);

        let token = tokens.issue_access(&user).expect("issue");
        let claims = tokens.verify_access(&token).expect("verify");

        assert_eq!(service.current_user(&claims.sub).await.expect("found").id, user.id);

        repo.remove_user(&user.id).await;
        let err = service.current_user(&claims.sub).await.expect_err("gone");
        assert!(matches!(err, AppError::UserNotFound));
    }
}
