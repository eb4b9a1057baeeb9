//! Reconciles DJS state with BQS state (§4.5). Runs periodically inside the
//! Supervisor, not inside individual workers, since it's a DB-wide scan
//! rather than per-job work.

use config::Config;
use errors::*;
use model::JobStatus;
use queue::Queue;
use schema;
use time_helpers;

use chrono::Utc;
use diesel;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::Logger;

pub struct Mediator<'a> {
    pub conn:   &'a mut PgConnection,
    pub queue:  Queue,
    pub config: Config,
}

pub struct RunResult {
    pub num_stuck_in_progress: i64,
    pub num_stuck_queued:      i64,
    pub num_moved_to_dlq:      i64,
}

impl<'a> Mediator<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        let (num_stuck_in_progress, num_moved_to_dlq) = self.sweep_stuck_in_progress(log)?;
        let num_stuck_queued = self.sweep_stuck_queued(log)?;

        let res = RunResult {
            num_stuck_in_progress,
            num_stuck_queued,
            num_moved_to_dlq,
        };
        info!(log, "Recovery sweep complete";
            "num_stuck_in_progress" => res.num_stuck_in_progress,
            "num_stuck_queued" => res.num_stuck_queued,
            "num_moved_to_dlq" => res.num_moved_to_dlq);
        Ok(res)
    }

    /// `status=IN_PROGRESS AND updated_at < now - STUCK_IN_PROGRESS_S`.
    /// Counts as a retry attempt so a worker that always dies mid-batch
    /// still converges to the DLQ instead of looping forever.
    fn sweep_stuck_in_progress(&mut self, log: &Logger) -> Result<(i64, i64)> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_in_progress)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let ids: Vec<i64> = schema::inference_job::table
            .filter(schema::inference_job::status.eq(JobStatus::InProgress.as_str()))
            .filter(schema::inference_job::updated_at.lt(threshold))
            .select(schema::inference_job::id)
            .load(self.conn)
            .chain_err(|| "error selecting stuck IN_PROGRESS jobs")?;

        let mut num_moved_to_dlq = 0;
        for id in &ids {
            let count = self.queue.increment_retry(*id, self.config.retry_ttl)?;

            if count <= self.config.max_retries {
                diesel::update(schema::inference_job::table.filter(schema::inference_job::id.eq(*id)))
                    .set((
                        schema::inference_job::status.eq(JobStatus::Queued.as_str()),
                        schema::inference_job::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(self.conn)
                    .chain_err(|| "error resetting stuck job to QUEUED")?;
                self.queue.enqueue(*id)?;
            } else {
                diesel::update(schema::inference_job::table.filter(schema::inference_job::id.eq(*id)))
                    .set((
                        schema::inference_job::status.eq(JobStatus::Failed.as_str()),
                        schema::inference_job::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(self.conn)
                    .chain_err(|| "error failing exhausted stuck job")?;
                self.queue.push_dlq(*id)?;
                self.queue.clear_retry(*id)?;
                num_moved_to_dlq += 1;
            }
        }

        warn_if_any(log, "stuck IN_PROGRESS", ids.len());
        Ok((ids.len() as i64, num_moved_to_dlq))
    }

    /// `status=QUEUED AND created_at < now - STUCK_QUEUED_S`. No retry bump:
    /// the job has never actually been attempted, only lost in transit.
    fn sweep_stuck_queued(&mut self, log: &Logger) -> Result<i64> {
        let threshold = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_queued)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let ids: Vec<i64> = schema::inference_job::table
            .filter(schema::inference_job::status.eq(JobStatus::Queued.as_str()))
            .filter(schema::inference_job::created_at.lt(threshold))
            .select(schema::inference_job::id)
            .load(self.conn)
            .chain_err(|| "error selecting stuck QUEUED jobs")?;

        for id in &ids {
            self.queue.enqueue(*id)?;
        }

        warn_if_any(log, "stuck QUEUED", ids.len());
        Ok(ids.len() as i64)
    }
}

fn warn_if_any(log: &Logger, what: &str, count: usize) {
    if count > 0 {
        warn!(log, "Recovered jobs"; "kind" => what, "count" => count);
    }
}
