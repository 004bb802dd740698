use crate::error::app_error::AppError;
use crate::service::tokens::TokenCodec;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use serde::Serialize;
use uuid::Uuid;

/// Cookie carrying the access token for browser clients.
pub const ACCESS_COOKIE: &str = "a_token";
/// HttpOnly cookie carrying the refresh token; only the refresh and logout
/// flows ever read it.
pub const REFRESH_COOKIE: &str = "r_token";

/// Identity attached to a request once its access token verified. Produced
/// without any database access: protected routes do not pay a round trip.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
}

/// Pulls the bearer credential from the Authorization header, falling back
/// to the access-token cookie. The header wins when both are present.
pub(crate) fn extract_bearer<'r>(authorization: Option<&'r str>, cookie: Option<&'r str>) -> Option<&'r str> {
    if let Some(header) = authorization {
        return header.strip_prefix("Bearer ");
    }
    cookie
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some(codec) = req.rocket().state::<TokenCodec>() else {
            return Outcome::Error((Status::InternalServerError, AppError::Unauthorized));
        };

        let header = req.headers().get_one("Authorization");
        let cookie = req.cookies().get(ACCESS_COOKIE);
        let Some(token) = extract_bearer(header, cookie.as_ref().map(|c| c.value())) else {
            return Outcome::Error((Status::Unauthorized, AppError::Unauthorized));
        };

        match codec.verify_access(token) {
            Ok(claims) => {
                let user = AuthenticatedUser {
                    user_id: claims.sub,
                    email: claims.email,
                    username: claims.username,
                };
                req.local_cache(|| Some(user.clone()));
                Outcome::Success(user)
            }
            Err(_) => Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AuthenticatedUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        // Document the bearer-token authentication requirement
        let security_scheme = SecurityScheme {
            description: Some("Access token issued by POST /api/auth/login, sent as a Bearer token or the a_token cookie.".to_string()),
            data: SecuritySchemeData::Http {
                scheme: "bearer".to_string(),
                bearer_format: Some("JWT".to_string()),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("bearerAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("bearerAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - Authentication required".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}
