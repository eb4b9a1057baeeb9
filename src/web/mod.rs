//! The Submission Service's HTTP surface (§4.1, §6): an actix-web app
//! wiring routes to the handlers in `web::handlers`, with request-scoped
//! logging from `web::middleware` and error mapping from `web::errors`.
//!
//! Mirrors the teacher's `WebServer` struct and `run()` entry point, ported
//! from the old actor-based actix-web 0.5 API to actix-web 4's
//! async/await `App`/`HttpServer`.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod state;

use config::Config;
use errors::*;
use predictor::PredictorFactory;
use queue::Queue;
use web::state::AppState;

use actix_web::{middleware as actix_middleware, web as actix_web_web, App, HttpServer};
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use r2d2::Pool;
use slog::Logger;
use std::sync::Arc;

pub struct WebServer {
    pub log:               Logger,
    pub pool:               Pool<ConnectionManager<PgConnection>>,
    pub queue:              Queue,
    pub predictor_factory:  Box<dyn PredictorFactory>,
    pub config:             Config,
    pub port:               String,
}

impl WebServer {
    pub async fn run(self) -> Result<()> {
        let host = format!("0.0.0.0:{}", self.port);
        info!(self.log, "Web server starting"; "host" => &host);

        let state = AppState {
            pool:              self.pool,
            queue:             self.queue,
            predictor_factory: Arc::new(self.predictor_factory),
            config:            self.config,
            log:               self.log.clone(),
        };

        HttpServer::new(move || {
            App::new()
                .app_data(actix_web_web::Data::new(state.clone()))
                .wrap(actix_middleware::Logger::default())
                .route("/v1/jobs", actix_web_web::post().to(handlers::submit_job))
                .route("/v1/jobs/{id}", actix_web_web::get().to(handlers::get_job_status))
                .route(
                    "/v1/jobs/{id}/result",
                    actix_web_web::get().to(handlers::get_job_result),
                )
                .route("/v1/ops/metrics", actix_web_web::get().to(handlers::get_metrics))
                .route("/v1/ops/dlq", actix_web_web::get().to(handlers::get_dlq))
                .route("/v1/ops/health", actix_web_web::get().to(handlers::get_health))
        })
        .bind(host)
        .chain_err(|| "error binding web server")?
        .run()
        .await
        .chain_err(|| "web server exited with an error")
    }
}
