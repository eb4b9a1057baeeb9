//! Request-scoped logging context, mirroring the teacher's three-stage
//! `log_initializer` / `request_id` / `request_response_logger` middleware
//! stack. The actix-web 4 service trait makes standalone middleware types
//! heavier than the teacher's old `actix_web::middleware::Middleware` impls
//! for little benefit here, so the stack is wired up with `App::wrap_fn`
//! closures in `web::mod` and this module holds the logic they share.

use time_helpers;

use slog::Logger;
use uuid::Uuid;

/// A fresh per-request id, attached to the request's logger and to the
/// response via the teacher's convention of an `X-Request-Id` header.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Builds the request-scoped logger: the application's base logger plus the
/// request id and HTTP method/path, so every log line inside a handler is
/// already attributed without extra plumbing.
pub fn request_logger(base_log: &Logger, request_id: &str, method: &str, path: &str) -> Logger {
    base_log.new(o!("request_id" => request_id.to_owned(),
        "method" => method.to_owned(), "path" => path.to_owned()))
}

/// Logs the standard start/finish pair around a request, the same shape as
/// `time_helpers::log_timed` uses for mediators.
pub fn log_request_start(log: &Logger) {
    info!(log, "Request started");
}

pub fn log_request_finish(log: &Logger, status: u16, elapsed_ns: u64) {
    info!(log, "Request finished"; "status" => status, "elapsed" => time_helpers::unit_str(elapsed_ns));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_id_is_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
