//! The Worker Pool's per-process main loop (§4.3): block for one job,
//! round out a micro-batch, promote the batch to IN_PROGRESS, preprocess
//! and predict, persist results, and route failures to the retry/DLQ
//! mediator (§4.4).
//!
//! Unlike the teacher's `job_worker`, which fans a single process out over
//! a thread pool, each worker here is already one OS process among the N
//! the Supervisor manages (§4.5/`supervisor`), and the Predictor itself is
//! documented as single-threaded per process (§2) — so this mediator's run
//! loop stays on one thread.

use config::Config;
use errors::*;
use model::insertable;
use model::JobStatus;
use predictor::{Predictor, PredictorFactory, Scores};
use preprocess::{self, Tensor};
use queue::Queue;
use schema;
use time_helpers;

use diesel;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use r2d2::Pool;
use slog::Logger;
use std::time::{Duration, Instant};

pub struct Mediator {
    pub pool:               Pool<ConnectionManager<PgConnection>>,
    pub queue:              Queue,
    pub predictor_factory:  Box<dyn PredictorFactory>,
    pub config:             Config,

    /// Run exactly one batch and return, instead of looping forever. Used
    /// by tests and by `cxr-infer worker --once`.
    pub run_once: bool,
}

pub struct RunResult {
    pub num_jobs:      i64,
    pub num_succeeded: i64,
    pub num_failed:    i64,
}

impl Mediator {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        let mut predictor = self.predictor_factory.create();
        let mut res = RunResult {
            num_jobs:      0,
            num_succeeded: 0,
            num_failed:    0,
        };

        loop {
            let ids = self.collect_batch(log)?;
            if ids.is_empty() {
                if self.run_once {
                    break;
                }
                continue;
            }

            res.num_jobs += ids.len() as i64;
            let (succeeded, failed) = self.work_batch(log, &mut *predictor, ids)?;
            res.num_succeeded += succeeded;
            res.num_failed += failed;

            if self.run_once {
                break;
            }
        }

        info!(log, "Worker finished";
            "num_jobs" => res.num_jobs, "num_succeeded" => res.num_succeeded, "num_failed" => res.num_failed);
        Ok(res)
    }

    /// Blocks for the first job, then rounds the batch out with
    /// non-blocking pops for up to `BATCH_WINDOW_MS`, capped at
    /// `MAX_BATCH_SIZE` (§4.3 step 1-2).
    fn collect_batch(&self, log: &Logger) -> Result<Vec<i64>> {
        let first = match self.queue.dequeue_blocking(self.config.brpop_timeout)? {
            Some(id) => id,
            None => return Ok(vec![]),
        };

        let mut ids = vec![first];
        let deadline = Instant::now() + self.config.batch_window;

        while ids.len() < self.config.max_batch_size && Instant::now() < deadline {
            match self.queue.dequeue_nonblocking()? {
                Some(id) => ids.push(id),
                None => break,
            }
        }

        info!(log, "Collected batch"; "batch_size" => ids.len());
        Ok(ids)
    }

    /// Steps 3-6 of §4.3: promote to IN_PROGRESS, preprocess + predict each
    /// item, persist results, and hand failures to the retry mediator.
    fn work_batch(&self, log: &Logger, predictor: &mut dyn Predictor, ids: Vec<i64>) -> Result<(i64, i64)> {
        let mut conn = self.pool.get().map_err(Error::from)?;

        self.promote_to_in_progress(log, &mut conn, &ids)?;

        let mut tensors = Vec::with_capacity(ids.len());
        let mut ok_ids = Vec::with_capacity(ids.len());
        let mut failed_ids = Vec::new();

        for id in &ids {
            match self.fetch_and_preprocess(*id) {
                Ok(tensor) => {
                    tensors.push(tensor);
                    ok_ids.push(*id);
                }
                Err(e) => {
                    warn!(log, "Preprocess failed"; "job_id" => id, "error" => format!("{}", e));
                    failed_ids.push(*id);
                }
            }
        }

        if !tensors.is_empty() {
            let batch = Tensor::stack(tensors);
            let deadline = Instant::now() + self.config.inference_timeout * ok_ids.len() as u32;

            match predictor.predict(log, &batch, deadline) {
                Ok(all_scores) => {
                    for (id, scores) in ok_ids.iter().zip(all_scores.into_iter()) {
                        if let Err(e) = self.persist_result(&mut conn, *id, &scores) {
                            warn!(log, "Failed to persist result"; "job_id" => id, "error" => format!("{}", e));
                            failed_ids.push(*id);
                        }
                    }
                }
                Err(e) => {
                    warn!(log, "Predictor failed for batch"; "batch_size" => ok_ids.len(), "error" => format!("{}", e));
                    failed_ids.extend(ok_ids);
                }
            }
        }

        let num_succeeded = ids.len() as i64 - failed_ids.len() as i64;
        for id in &failed_ids {
            self.handle_failure(log, *id)?;
        }

        Ok((num_succeeded, failed_ids.len() as i64))
    }

    fn promote_to_in_progress(&self, log: &Logger, conn: &mut PgConnection, ids: &[i64]) -> Result<()> {
        time_helpers::log_timed(&log.new(o!("step" => "promote_to_in_progress")), |_log| {
            diesel::update(schema::inference_job::table.filter(schema::inference_job::id.eq_any(ids)))
                .set((
                    schema::inference_job::status.eq(JobStatus::InProgress.as_str()),
                    schema::inference_job::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .chain_err(|| "error promoting batch to IN_PROGRESS")
        })?;
        Ok(())
    }

    fn fetch_and_preprocess(&self, job_id: i64) -> Result<Tensor> {
        let image_bytes = self
            .queue
            .fetch_image(job_id)?
            .ok_or_else(|| ErrorKind::ImageMissing(job_id))?;
        preprocess::preprocess_one(job_id, &image_bytes)
    }

    fn persist_result(&self, conn: &mut PgConnection, job_id: i64, scores: &Scores) -> Result<()> {
        conn.transaction::<_, Error, _>(|conn| {
            diesel::insert_into(schema::inference_result::table)
                .values(&insertable::JobResult {
                    job_id,
                    output: scores.to_json(),
                    top_label: scores.top_label().to_owned(),
                    created_at: ::chrono::Utc::now(),
                })
                .execute(conn)
                .chain_err(|| "error inserting result")?;

            diesel::update(schema::inference_job::table.filter(schema::inference_job::id.eq(job_id)))
                .set((
                    schema::inference_job::status.eq(JobStatus::Completed.as_str()),
                    schema::inference_job::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .chain_err(|| "error marking job COMPLETED")?;

            Ok(())
        })?;
        self.queue.clear_retry(job_id)?;
        Ok(())
    }

    /// §4.4: bump the retry counter; requeue under `MAX_RETRIES`, else fail
    /// the job and push it to the DLQ.
    fn handle_failure(&self, log: &Logger, job_id: i64) -> Result<()> {
        let count = self.queue.increment_retry(job_id, self.config.retry_ttl)?;

        if count <= self.config.max_retries {
            info!(log, "Requeueing failed job"; "job_id" => job_id, "attempt" => count);
            self.queue.enqueue(job_id)?;
            return Ok(());
        }

        warn!(log, "Job exhausted retries, moving to DLQ"; "job_id" => job_id, "attempt" => count);
        let mut conn = self.pool.get().map_err(Error::from)?;
        diesel::update(schema::inference_job::table.filter(schema::inference_job::id.eq(job_id)))
            .set((
                schema::inference_job::status.eq(JobStatus::Failed.as_str()),
                schema::inference_job::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .chain_err(|| "error marking job FAILED")?;

        self.queue.push_dlq(job_id)?;
        self.queue.clear_retry(job_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_result_accumulates() {
        let res = RunResult {
            num_jobs:      3,
            num_succeeded: 2,
            num_failed:    1,
        };
        assert_eq!(3, res.num_jobs);
        assert_eq!(res.num_succeeded + res.num_failed, res.num_jobs);
    }
}
