//! The Worker Pool's supervisor process (§2, §4.5): spawns `WORKER_COUNT`
//! worker child processes, restarts any that die, and runs the Recovery
//! Sweeper on a fixed period. This is the one place in the crate that talks
//! to `std::process` directly — everything else in the Worker Pool runs
//! inside a spawned `cxr-infer worker` process.

use config::Config;
use errors::*;
use mediators::recovery_sweeper;
use queue::Queue;

use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use r2d2::Pool;
use slog::Logger;
use std::env;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Supervisor {
    pub pool:           Pool<ConnectionManager<PgConnection>>,
    pub queue:          Queue,
    pub config:         Config,
    pub worker_binary:  String,
    pub shutdown:       Arc<AtomicBool>,
}

impl Supervisor {
    /// Installs a SIGTERM handler that flips `shutdown` and returns the
    /// flag so callers can construct a `Supervisor` with it.
    pub fn install_signal_handler() -> Result<Arc<AtomicBool>> {
        let shutdown = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
            .chain_err(|| "error registering SIGTERM handler")?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
            .chain_err(|| "error registering SIGINT handler")?;
        Ok(shutdown)
    }

    pub fn run(&mut self, log: &Logger) -> Result<()> {
        let mut children: Vec<Child> = (0..self.config.worker_count)
            .map(|i| self.spawn_worker(log, i))
            .collect::<Result<Vec<_>>>()?;

        let mut last_tick = Instant::now();
        let mut last_recovery = Instant::now();

        while !self.shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(200));

            if last_tick.elapsed() >= self.config.supervisor_tick {
                self.restart_dead_workers(log, &mut children)?;
                last_tick = Instant::now();
            }

            if last_recovery.elapsed() >= self.config.recovery_period {
                if let Err(e) = self.run_recovery_sweep(log) {
                    error!(log, "Recovery sweep failed"; "error" => format!("{}", e));
                }
                last_recovery = Instant::now();
            }
        }

        info!(log, "Shutting down, terminating workers"; "num_workers" => children.len());
        for child in &mut children {
            let _ = child.kill();
        }
        for child in &mut children {
            let _ = child.wait();
        }
        Ok(())
    }

    fn spawn_worker(&self, log: &Logger, index: u32) -> Result<Child> {
        info!(log, "Spawning worker"; "index" => index);
        Command::new(&self.worker_binary)
            .arg("worker")
            .env("CXR_INFER_WORKER_INDEX", index.to_string())
            .spawn()
            .chain_err(|| format!("failed to spawn worker process {}", index))
    }

    fn restart_dead_workers(&self, log: &Logger, children: &mut [Child]) -> Result<()> {
        for (index, child) in children.iter_mut().enumerate() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(log, "Worker exited, restarting"; "index" => index, "status" => format!("{}", status));
                    *child = self.spawn_worker(log, index as u32)?;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(log, "Error polling worker status"; "index" => index, "error" => format!("{}", e));
                }
            }
        }
        Ok(())
    }

    fn run_recovery_sweep(&self, log: &Logger) -> Result<()> {
        let mut conn = self.pool.get().map_err(Error::from)?;
        let mut mediator = recovery_sweeper::Mediator {
            conn:   &mut conn,
            queue:  self.queue.clone(),
            config: self.config.clone(),
        };
        mediator.run(log)?;
        Ok(())
    }
}

/// Resolves the binary to re-exec for worker processes: defaults to the
/// currently running executable so `cxr-infer supervisor` and `cxr-infer
/// worker` ship in the same binary.
pub fn current_binary_path() -> Result<String> {
    env::current_exe()
        .chain_err(|| "error resolving current executable path")?
        .to_str()
        .map(|s| s.to_owned())
        .ok_or_else(|| Error::from("current executable path is not valid UTF-8"))
}
