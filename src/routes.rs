mod artifacts;
mod status;
mod tasks;
mod upload;

pub use artifacts::download_handler;
pub use status::status_handler;
pub use tasks::{
    compile_checker_handler, compile_handler, get_task_handler, interactive_handler,
    judge_handler, run_handler,
};
pub use upload::upload_handler;

use std::future::{Ready, ready};
use std::time::Instant;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{FromRequest, HttpRequest, HttpResponse, Responder, dev::Payload, get, web};
use serde::Serialize;

use crate::create_timestamp;

/// Wire schema for every error the API emits.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub status_code: u16,
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorBody {
        error: message.into(),
        status_code: 400,
    })
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody {
        error: message.into(),
        status_code: 404,
    })
}

pub fn internal_error(message: impl Into<String>) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorBody {
        error: message.into(),
        status_code: 500,
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = bad_request(format!("invalid request body: {err}"));
    InternalError::from_response(err, response).into()
}

/// Process-wide request context shared with every handler.
pub struct ServerContext {
    /// The shared auth token; `None` means the server is misconfigured and
    /// authenticated routes answer 500.
    pub token: Option<String>,
    pub started_at: Instant,
}

impl ServerContext {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            started_at: Instant::now(),
        }
    }
}

/// Extractor that rejects the request unless it carries the shared token
/// in the `X-Auth-Token` header or the `token` query parameter.
pub struct AuthGuard;

impl FromRequest for AuthGuard {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(check_auth(req))
    }
}

fn check_auth(req: &HttpRequest) -> Result<AuthGuard, actix_web::Error> {
    let Some(context) = req.app_data::<web::Data<ServerContext>>() else {
        return Err(auth_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server context is not installed",
        ));
    };
    let Some(expected) = context.token.as_deref() else {
        return Err(auth_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server authentication token is not configured",
        ));
    };

    let header = req
        .headers()
        .get("X-Auth-Token")
        .and_then(|value| value.to_str().ok());
    let query = query_param(req.query_string(), "token");

    if header == Some(expected) || query.as_deref() == Some(expected) {
        Ok(AuthGuard)
    } else {
        Err(auth_error(
            StatusCode::UNAUTHORIZED,
            "invalid or missing authentication token",
        ))
    }
}

fn auth_error(status: StatusCode, message: &'static str) -> actix_web::Error {
    let response = HttpResponse::build(status).json(ErrorBody {
        error: message.to_string(),
        status_code: status.as_u16(),
    });
    InternalError::from_response(message, response).into()
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// The only unauthenticated route.
#[get("/health")]
pub async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": create_timestamp(),
    }))
}
