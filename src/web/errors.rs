//! Maps the crate's internal `Error` into an HTTP response, per the status
//! code table in §6/§7.

use errors::*;

use actix_web::{HttpResponse, ResponseError};
use std::fmt;

/// Wraps `errors::Error` so it can implement the foreign `ResponseError`
/// trait (Rust's orphan rule blocks implementing it on `Error` directly
/// since neither type is local to this module).
#[derive(Debug)]
pub struct WebError(pub Error);

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Error> for WebError {
    fn from(e: Error) -> Self {
        WebError(e)
    }
}

impl ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        match self.0.kind() {
            ErrorKind::InvalidRequest(detail) => {
                HttpResponse::BadRequest().json(body("invalid_request", detail))
            }
            ErrorKind::JobNotFound(job_id) => {
                HttpResponse::NotFound().json(body("job_not_found", &format!("job {} not found", job_id)))
            }
            ErrorKind::ResultNotReady(job_id) => HttpResponse::Conflict().json(body(
                "result_not_ready",
                &format!("job {} has not completed yet", job_id),
            )),
            ErrorKind::UnknownModelVersion(name) => {
                HttpResponse::BadRequest().json(body("invalid_request", &format!("unknown model `{}`", name)))
            }
            ErrorKind::Database(_) => HttpResponse::ServiceUnavailable().json(body("db_unavailable", &self.0.to_string())),
            ErrorKind::DatabaseConnectionPool(_) => {
                HttpResponse::ServiceUnavailable().json(body("db_unavailable", &self.0.to_string()))
            }
            ErrorKind::Queue(_) => {
                HttpResponse::ServiceUnavailable().json(body("queue_unavailable", &self.0.to_string()))
            }
            _ => HttpResponse::InternalServerError().json(body("internal_error", &self.0.to_string())),
        }
    }
}

fn body(kind: &str, detail: &str) -> serde_json::Value {
    serde_json::json!({ "error": kind, "detail": detail })
}
