use crate::auth::{ACCESS_COOKIE, AuthenticatedUser, REFRESH_COOKIE};
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::AuthRateLimit;
use crate::middleware::{ClientIp, DeviceInfo, UserAgent};
use crate::models::session::SessionMetadata;
use crate::models::user::{LoginRequest, SessionResponse, SignupRequest, UserResponse};
use crate::service::auth::{AuthService, IssuedTokens};
use crate::service::tokens::TokenCodec;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use sqlx::PgPool;
use validator::Validate;

fn set_token_cookies(cookies: &CookieJar<'_>, issued: &IssuedTokens, codec: &TokenCodec, secure: bool) {
    // The refresh credential is HttpOnly: client-side code never sees it.
    let refresh = Cookie::build((REFRESH_COOKIE, issued.refresh_token.clone()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(rocket::time::Duration::seconds(codec.refresh_ttl().num_seconds()))
        .build();

    // The access credential is deliberately readable so browser clients can
    // attach it as a bearer header.
    let access = Cookie::build((ACCESS_COOKIE, issued.access_token.clone()))
        .path("/")
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(rocket::time::Duration::seconds(codec.access_ttl().num_seconds()))
        .build();

    cookies.add(refresh);
    cookies.add(access);
}

fn clear_token_cookies(cookies: &CookieJar<'_>) {
    cookies.remove(Cookie::build(REFRESH_COOKIE).path("/").build());
    cookies.remove(Cookie::build(ACCESS_COOKIE).path("/").build());
}

/// Create an account.
#[openapi(tag = "Auth")]
#[post("/signup", data = "<payload>")]
pub async fn signup(
    pool: &State<PgPool>,
    codec: &State<TokenCodec>,
    _rate_limit: AuthRateLimit,
    payload: Json<SignupRequest>,
) -> Result<(Status, Json<UserResponse>), AppError> {
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService::new(&repo, codec.inner());
    let user = service.signup(&payload.email, &payload.username, &payload.password).await?;

    Ok((Status::Created, Json(UserResponse::from(&user))))
}

/// Log in with email and password; establishes a refresh session and sets
/// both token cookies.
#[openapi(tag = "Auth")]
#[post("/login", data = "<payload>")]
pub async fn login(
    pool: &State<PgPool>,
    codec: &State<TokenCodec>,
    config: &State<crate::Config>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    user_agent: UserAgent,
    device_info: DeviceInfo,
    _rate_limit: AuthRateLimit,
    payload: Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService::new(&repo, codec.inner());
    let metadata = SessionMetadata {
        device_info: device_info.0,
        ip_address: client_ip.0,
        user_agent: user_agent.0,
    };

    let (user, issued) = service.login(&payload.email, &payload.password, &metadata).await?;
    set_token_cookies(cookies, &issued, codec.inner(), config.tokens.cookie_secure);

    Ok(Json(SessionResponse {
        user: UserResponse::from(&user),
        access_token: issued.access_token,
    }))
}

/// Exchange the refresh cookie for a fresh token pair. The presented
/// credential is consumed: it will never be accepted again.
#[openapi(tag = "Auth")]
#[post("/refresh")]
pub async fn refresh(
    pool: &State<PgPool>,
    codec: &State<TokenCodec>,
    config: &State<crate::Config>,
    cookies: &CookieJar<'_>,
    _rate_limit: AuthRateLimit,
) -> Result<Json<SessionResponse>, AppError> {
    let Some(refresh_cookie) = cookies.get(REFRESH_COOKIE) else {
        clear_token_cookies(cookies);
        return Err(AppError::InvalidRefreshToken);
    };

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService::new(&repo, codec.inner());

    match service.refresh(refresh_cookie.value()).await {
        Ok((user, issued)) => {
            set_token_cookies(cookies, &issued, codec.inner(), config.tokens.cookie_secure);
            Ok(Json(SessionResponse {
                user: UserResponse::from(&user),
                access_token: issued.access_token,
            }))
        }
        Err(err) => {
            // Whatever went wrong, the client's credentials are dead.
            clear_token_cookies(cookies);
            Err(err)
        }
    }
}

/// Log out. Clears the token cookies and deletes the session row when the
/// refresh cookie is present and decodable; succeeds regardless.
#[openapi(tag = "Auth")]
#[post("/logout")]
pub async fn logout(pool: &State<PgPool>, codec: &State<TokenCodec>, cookies: &CookieJar<'_>) -> Status {
    let refresh_token = cookies.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    clear_token_cookies(cookies);

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService::new(&repo, codec.inner());
    service.logout(refresh_token.as_deref()).await;

    Status::Ok
}

/// Identity of the caller, straight from the verified access token.
#[openapi(tag = "Auth")]
#[get("/me")]
pub async fn me(pool: &State<PgPool>, codec: &State<TokenCodec>, current_user: AuthenticatedUser) -> Result<Json<UserResponse>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let service = AuthService::new(&repo, codec.inner());

    let user = service.current_user(&current_user.user_id).await?;

    Ok(Json(UserResponse::from(&user)))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![signup, login, refresh, logout, me]
}
