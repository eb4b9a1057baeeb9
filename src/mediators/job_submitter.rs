//! The Submission Service's write path and read paths (§4.1): `Submit`,
//! `GetStatus`, `GetResult`. Kept as a mediator in its own right (rather
//! than inline HTTP handlers) so it can be exercised without standing up
//! actix — the same shape as the teacher's account/podcast mediators.

use errors::*;
use model::{self, insertable, JobResult, JobStatus};
use predictor::Scores;
use queue::Queue;
use schema;
use time_helpers;

use diesel;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use r2d2::PooledConnection;
use sha2::{Digest, Sha256};
use slog::Logger;
use std::time::Duration;

pub struct Submitter {
    pub conn:      PooledConnection<ConnectionManager<PgConnection>>,
    pub queue:     Queue,
    pub image_ttl: Duration,
}

pub struct SubmitResult {
    pub job_id: i64,
    pub cached: bool,
}

impl Submitter {
    /// `Submit(image_bytes, model_name) -> (job_id, cached)` (§4.1).
    pub fn submit(&mut self, log: &Logger, image_bytes: &[u8], model_name: &str) -> Result<SubmitResult> {
        time_helpers::log_timed(&log.new(o!("step" => "submit")), |log| {
            self.submit_inner(log, image_bytes, model_name)
        })
    }

    fn submit_inner(&mut self, log: &Logger, image_bytes: &[u8], model_name: &str) -> Result<SubmitResult> {
        if image_bytes.is_empty() {
            return Err(ErrorKind::InvalidRequest("image payload is empty".into()).into());
        }

        let sha256_hex = sha256_hex(image_bytes);

        if let Some(job_id) = self.queue.cache_lookup(&sha256_hex)? {
            if model::Job::find(&mut self.conn, job_id)?.is_some() {
                info!(log, "Submission deduplicated"; "job_id" => job_id, "sha256" => &sha256_hex);
                return Ok(SubmitResult { job_id, cached: true });
            }
        }

        let model_version = model::ModelVersion::find_by_name(&mut self.conn, model_name)?;

        let job: model::Job = diesel::insert_into(schema::inference_job::table)
            .values(&insertable::Job {
                status:           JobStatus::Queued.as_str().to_owned(),
                input_sha256:     sha256_hex.clone(),
                model_version_id: model_version.id,
            })
            .get_result(&mut self.conn)
            .chain_err(|| "error inserting job")?;

        self.queue.store_image(job.id, image_bytes, self.image_ttl)?;
        self.queue.enqueue(job.id)?;
        self.queue.cache_store(&sha256_hex, job.id, self.image_ttl)?;

        info!(log, "Submission accepted"; "job_id" => job.id, "sha256" => &sha256_hex);
        Ok(SubmitResult {
            job_id: job.id,
            cached: false,
        })
    }

    /// `GetStatus(job_id)` — direct DJS read.
    pub fn get_status(&mut self, job_id: i64) -> Result<JobStatus> {
        let job = model::Job::find(&mut self.conn, job_id)?
            .ok_or_else(|| ErrorKind::JobNotFound(job_id))?;
        Ok(job.status())
    }

    /// `GetResult(job_id)` — errors with `ResultNotReady` unless the job has
    /// reached COMPLETED (§4.1, §6 `409` on the HTTP surface).
    pub fn get_result(&mut self, job_id: i64) -> Result<(JobResult, Scores)> {
        let job = model::Job::find(&mut self.conn, job_id)?
            .ok_or_else(|| ErrorKind::JobNotFound(job_id))?;

        if job.status() != JobStatus::Completed {
            return Err(ErrorKind::ResultNotReady(job_id).into());
        }

        let result = JobResult::find(&mut self.conn, job_id)?
            .ok_or_else(|| ErrorKind::ResultNotReady(job_id))?;
        let scores = result.scores()?;
        Ok((result, scores))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_is_stable() {
        let a = sha256_hex(b"hello world");
        let b = sha256_hex(b"hello world");
        assert_eq!(a, b);
        assert_eq!(64, a.len());
    }

    #[test]
    fn test_sha256_hex_differs_for_different_input() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }
}
