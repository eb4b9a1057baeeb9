//! Client for the Blob & Queue Store (BQS, §3): the ephemeral Redis-
//! compatible store holding the pending-job list, the dead-letter list, the
//! fingerprint cache, image payloads, and retry counters.
//!
//! A thin wrapper over a pooled `redis::Connection`, kept deliberately
//! synchronous/blocking to match the worker pool's thread-per-process model
//! (§4.3) rather than reaching for an async Redis client.

use errors::*;

use std::time::Duration;

use r2d2::Pool;
use redis::{Client, Commands};

const QUEUE_KEY: &str = "queue:inference";
const DLQ_KEY: &str = "dlq:failed_jobs";

fn cache_key(sha256_hex: &str) -> String {
    format!("cache:sha256:{}", sha256_hex)
}

fn image_key(job_id: i64) -> String {
    format!("image:{}", job_id)
}

fn retry_key(job_id: i64) -> String {
    format!("retry:{}", job_id)
}

#[derive(Clone)]
pub struct Queue {
    pool: Pool<Client>,
}

impl Queue {
    pub fn new(redis_url: &str, max_size: u32) -> Result<Queue> {
        let client = Client::open(redis_url)?;
        let pool = Pool::builder().max_size(max_size).build(client)?;
        Ok(Queue { pool })
    }

    /// `LPUSH queue:inference job_id`.
    pub fn enqueue(&self, job_id: i64) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.lpush(QUEUE_KEY, job_id)?;
        Ok(())
    }

    /// `BRPOP queue:inference timeout`. Returns `None` on timeout rather
    /// than an error so callers can loop without special-casing it.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<i64>> {
        let mut conn = self.pool.get()?;
        let reply: Option<(String, i64)> = conn.brpop(QUEUE_KEY, timeout.as_secs_f64())?;
        Ok(reply.map(|(_, job_id)| job_id))
    }

    /// Non-blocking `RPOP queue:inference`, used to round out a micro-batch
    /// once the first item has already arrived (§4.3).
    pub fn dequeue_nonblocking(&self) -> Result<Option<i64>> {
        let mut conn = self.pool.get()?;
        let job_id: Option<i64> = conn.rpop(QUEUE_KEY, None)?;
        Ok(job_id)
    }

    /// `LPUSH dlq:failed_jobs job_id`.
    pub fn push_dlq(&self, job_id: i64) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.lpush(DLQ_KEY, job_id)?;
        Ok(())
    }

    /// `LRANGE dlq:failed_jobs 0 -1`, for the `GET /v1/ops/dlq` endpoint.
    pub fn dlq_contents(&self) -> Result<Vec<i64>> {
        let mut conn = self.pool.get()?;
        let ids: Vec<i64> = conn.lrange(DLQ_KEY, 0, -1)?;
        Ok(ids)
    }

    pub fn dlq_depth(&self) -> Result<u64> {
        let mut conn = self.pool.get()?;
        let depth: u64 = conn.llen(DLQ_KEY)?;
        Ok(depth)
    }

    /// `GET cache:sha256:{hex}` — resolves a content fingerprint to a job id
    /// if one has been submitted in the last `IMAGE_TTL_S` window.
    pub fn cache_lookup(&self, sha256_hex: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.get()?;
        let job_id: Option<i64> = conn.get(cache_key(sha256_hex))?;
        Ok(job_id)
    }

    /// `SET cache:sha256:{hex} job_id EX ttl`.
    pub fn cache_store(&self, sha256_hex: &str, job_id: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.set_ex(cache_key(sha256_hex), job_id, ttl.as_secs())?;
        Ok(())
    }

    /// `SET image:{job_id} bytes EX ttl`.
    pub fn store_image(&self, job_id: i64, image_bytes: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.set_ex(image_key(job_id), image_bytes, ttl.as_secs())?;
        Ok(())
    }

    /// `GET image:{job_id}`. A `None` here is exactly the "image missing"
    /// case that routes a job through the retry path (§4.4).
    pub fn fetch_image(&self, job_id: i64) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get()?;
        let bytes: Option<Vec<u8>> = conn.get(image_key(job_id))?;
        Ok(bytes)
    }

    /// `INCR retry:{job_id}` (refreshing TTL), returning the post-increment
    /// count so the caller can compare it against `MAX_RETRIES`.
    pub fn increment_retry(&self, job_id: i64, ttl: Duration) -> Result<u32> {
        let mut conn = self.pool.get()?;
        let key = retry_key(job_id);
        let count: u32 = conn.incr(&key, 1)?;
        conn.expire(&key, ttl.as_secs() as i64)?;
        Ok(count)
    }

    /// `DEL retry:{job_id}`, once a job either succeeds or is moved to the DLQ.
    pub fn clear_retry(&self, job_id: i64) -> Result<()> {
        let mut conn = self.pool.get()?;
        conn.del(retry_key(job_id))?;
        Ok(())
    }

    /// `GET queue:inference` queue depth, for health/metrics.
    pub fn queue_depth(&self) -> Result<u64> {
        let mut conn = self.pool.get()?;
        let depth: u64 = conn.llen(QUEUE_KEY)?;
        Ok(depth)
    }

    /// A cheap round trip used by `GET /v1/ops/health`.
    pub fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get()?;
        let _: String = redis::cmd("PING").query(&mut *conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_helpers() {
        assert_eq!("cache:sha256:abc", cache_key("abc"));
        assert_eq!("image:42", image_key(42));
        assert_eq!("retry:42", retry_key(42));
    }
}
