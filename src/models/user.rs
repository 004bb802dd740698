use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Identity record as stored. The password hash never leaves the crate;
/// responses are built from [`UserResponse`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
}

/// Body returned by login and refresh. The refresh credential travels only
/// in its HttpOnly cookie, never in the body.
#[derive(Serialize, Debug, JsonSchema)]
pub struct SessionResponse {
    pub user: UserResponse,
    pub access_token: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct SignupRequest {
    #[validate(length(min = 3, max = 20, message = "Username must be between 3 and 20 characters"))]
    pub username: String,
    #[validate(email(message = "Please enter a valid email address"), length(max = 255))]
    pub email: String,
    #[validate(length(min = 4, max = 128, message = "Password must be between 4 and 128 characters"))]
    pub password: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Please enter a valid email address"), length(max = 255))]
    pub email: String,
    #[validate(length(min = 4, max = 128, message = "Password must be between 4 and 128 characters"))]
    pub password: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}
