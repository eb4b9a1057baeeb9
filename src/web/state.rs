//! Shared state handed to every actix-web handler: DB pool, BQS client,
//! Predictor factory, and a base logger each request layers its own
//! context onto (§6).

use config::Config;
use predictor::PredictorFactory;
use queue::Queue;

use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use r2d2::Pool;
use slog::Logger;

#[derive(Clone)]
pub struct AppState {
    pub pool:               Pool<ConnectionManager<PgConnection>>,
    pub queue:               Queue,
    pub predictor_factory:  std::sync::Arc<Box<dyn PredictorFactory>>,
    pub config:              Config,
    pub log:                 Logger,
}
