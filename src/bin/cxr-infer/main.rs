extern crate cxr_infer;
#[macro_use]
extern crate slog;

use cxr_infer::config::Config;
use cxr_infer::errors::*;
use cxr_infer::mediators::{inference_worker, job_submitter, metrics_aggregator, recovery_sweeper};
use cxr_infer::predictor::PredictorFactoryLive;
use cxr_infer::queue::Queue;
use cxr_infer::supervisor::{self, Supervisor};
use cxr_infer::web::WebServer;

use clap::{Parser, Subcommand};
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use r2d2::Pool;
use slog::{Drain, Logger};
use std::env;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[derive(Parser)]
#[command(name = "cxr-infer", version, about = "Chest X-ray inference job dispatch and execution system")]
struct Cli {
    /// Quiets all output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the Submission Service's HTTP API.
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: String,
    },
    /// Runs a single worker process (normally spawned by `supervisor`, not invoked directly).
    Worker {
        #[arg(long)]
        once: bool,
    },
    /// Runs the Worker Pool supervisor: spawns workers, restarts the dead, sweeps for recovery.
    Supervisor,
    /// Applies pending database migrations.
    Migrate,
    /// Runs the Recovery Sweeper a single time.
    Sweep,
    /// Prints the current `/v1/ops/metrics` payload to stdout.
    Metrics,
}

fn main() {
    let cli = Cli::parse();
    let log = build_log(cli.quiet);

    let result = match cli.command {
        Command::Serve { port } => run_serve(&log, port),
        Command::Worker { once } => run_worker(&log, once),
        Command::Supervisor => run_supervisor(&log),
        Command::Migrate => run_migrate(&log),
        Command::Sweep => run_sweep(&log),
        Command::Metrics => run_metrics(&log),
    };

    if let Err(ref e) = result {
        print_error(&log, e);
        std::process::exit(1);
    }
}

fn build_log(quiet: bool) -> Logger {
    if quiet {
        return Logger::root(slog::Discard, o!());
    }
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let async_drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(async_drain, o!())
}

fn print_error(log: &Logger, e: &Error) {
    for (i, cause) in cxr_infer::errors::error_strings(e).iter().enumerate() {
        error!(log, "{}", cause; "depth" => i);
    }
}

fn pool(config: &Config) -> Result<Pool<ConnectionManager<PgConnection>>> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
    Pool::builder().build(manager).map_err(Error::from)
}

fn run_serve(log: &Logger, port: String) -> Result<()> {
    let config = Config::from_env();
    let pool = pool(&config)?;
    let queue = Queue::new(&config.redis_url, config.worker_count + 2)?;

    let predictor_factory = Box::new(PredictorFactoryLive {
        binary_path: env::var("PREDICTOR_BINARY_PATH").unwrap_or_else(|_| "cxr-predictor".to_owned()),
    });

    let server = WebServer {
        log: log.clone(),
        pool,
        queue,
        predictor_factory,
        config,
        port,
    };

    let runtime = actix_rt::System::new();
    runtime.block_on(server.run())
}

fn run_worker(log: &Logger, once: bool) -> Result<()> {
    let config = Config::from_env();
    let pool = pool(&config)?;
    let queue = Queue::new(&config.redis_url, 2)?;

    let predictor_factory = Box::new(PredictorFactoryLive {
        binary_path: env::var("PREDICTOR_BINARY_PATH").unwrap_or_else(|_| "cxr-predictor".to_owned()),
    });

    let mut mediator = inference_worker::Mediator {
        pool,
        queue,
        predictor_factory,
        config,
        run_once: once,
    };
    mediator.run(log)?;
    Ok(())
}

fn run_supervisor(log: &Logger) -> Result<()> {
    let config = Config::from_env();
    let pool = pool(&config)?;
    let queue = Queue::new(&config.redis_url, config.worker_count + 2)?;
    let shutdown = Supervisor::install_signal_handler()?;

    let mut sup = Supervisor {
        pool,
        queue,
        config,
        worker_binary: supervisor::current_binary_path()?,
        shutdown,
    };
    sup.run(log)
}

fn run_migrate(log: &Logger) -> Result<()> {
    let config = Config::from_env();
    let mut conn = PgConnection::establish(&config.database_url).chain_err(|| "error connecting to database")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::from(format!("error running migrations: {}", e)))?;
    info!(log, "Applied migrations"; "count" => applied.len());
    Ok(())
}

fn run_sweep(log: &Logger) -> Result<()> {
    let config = Config::from_env();
    let pool = pool(&config)?;
    let queue = Queue::new(&config.redis_url, 2)?;
    let mut conn = pool.get().map_err(Error::from)?;

    let mut mediator = recovery_sweeper::Mediator {
        conn:   &mut conn,
        queue,
        config,
    };
    mediator.run(log)?;
    Ok(())
}

fn run_metrics(log: &Logger) -> Result<()> {
    let config = Config::from_env();
    let pool = pool(&config)?;
    let queue = Queue::new(&config.redis_url, 2)?;
    let mut conn = pool.get().map_err(Error::from)?;

    let mut mediator = metrics_aggregator::Mediator {
        conn: &mut conn,
        queue,
    };
    let metrics = mediator.run(log)?;
    println!("{}", serde_json::to_string_pretty(&metrics_json(&metrics)).unwrap());
    Ok(())
}

fn metrics_json(m: &metrics_aggregator::Metrics) -> serde_json::Value {
    serde_json::json!({
        "rps": m.rps,
        "failure_rate": m.failure_rate,
        "p50_ms": m.p50_ms,
        "p95_ms": m.p95_ms,
        "p99_ms": m.p99_ms,
        "dlq_depth": m.dlq_depth,
    })
}
