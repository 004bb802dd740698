use crate::middleware::rate_limit::RateLimitRetryAfter;
use rocket::http::{ContentType, Header, Status};
use rocket::response::Responder;
use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, Response, catch};

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub message: String,
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Unauthorized".to_string(),
    })
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Not found".to_string(),
    })
}

#[catch(409)]
pub fn conflict(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Conflict".to_string(),
    })
}

#[catch(422)]
pub fn unprocessable(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Malformed request body".to_string(),
    })
}

#[catch(500)]
pub fn internal_error(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Internal server error".to_string(),
    })
}

pub struct TooManyRequestsResponse {
    retry_after_secs: u64,
}

impl<'r> Responder<'r, 'static> for TooManyRequestsResponse {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let body = Json(Error {
            message: "Too many requests, retry later".to_string(),
        })
        .respond_to(req)?;

        Response::build_from(body)
            .status(Status::TooManyRequests)
            .header(ContentType::JSON)
            .header(Header::new("Retry-After", self.retry_after_secs.to_string()))
            .ok()
    }
}

#[catch(429)]
pub fn too_many_requests(req: &Request) -> TooManyRequestsResponse {
    let retry_after_secs = req
        .local_cache(|| None::<RateLimitRetryAfter>)
        .as_ref()
        .map(|r| r.0)
        .unwrap_or(60);

    TooManyRequestsResponse { retry_after_secs }
}
