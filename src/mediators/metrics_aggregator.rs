//! Computes the `GET /v1/ops/metrics` payload (§4.6, §6): throughput,
//! failure rate, latency percentiles, and DLQ depth over a trailing window.
//!
//! Percentile computation is a pure function over a `Vec<f64>` so it can be
//! unit tested without a database.

use errors::*;
use queue::Queue;
use schema;
use time_helpers;

use chrono::{Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::Logger;

/// Width of the trailing window metrics are computed over.
pub const WINDOW_SECONDS: i64 = 300;

pub struct Mediator<'a> {
    pub conn:  &'a mut PgConnection,
    pub queue: Queue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Metrics {
    pub rps:          f64,
    pub failure_rate: f64,
    pub p50_ms:       f64,
    pub p95_ms:       f64,
    pub p99_ms:       f64,
    pub dlq_depth:    u64,
}

impl<'a> Mediator<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<Metrics> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |_log| self.run_inner())
    }

    fn run_inner(&mut self) -> Result<Metrics> {
        let window_start = Utc::now() - Duration::seconds(WINDOW_SECONDS);

        let completed: i64 = schema::inference_job::table
            .filter(schema::inference_job::status.eq("COMPLETED"))
            .filter(schema::inference_job::updated_at.ge(window_start))
            .count()
            .first(self.conn)
            .chain_err(|| "error counting completed jobs")?;

        let failed: i64 = schema::inference_job::table
            .filter(schema::inference_job::status.eq("FAILED"))
            .filter(schema::inference_job::updated_at.ge(window_start))
            .count()
            .first(self.conn)
            .chain_err(|| "error counting failed jobs")?;

        let total = completed + failed;
        let failure_rate = if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        };

        let submitted: i64 = schema::inference_job::table
            .filter(schema::inference_job::created_at.ge(window_start))
            .count()
            .first(self.conn)
            .chain_err(|| "error counting submitted jobs")?;
        let rps = submitted as f64 / WINDOW_SECONDS as f64;

        let latencies_ms: Vec<f64> = schema::inference_job::table
            .inner_join(schema::inference_result::table)
            .filter(schema::inference_job::updated_at.ge(window_start))
            .select((schema::inference_job::created_at, schema::inference_result::created_at))
            .load::<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>(self.conn)
            .chain_err(|| "error loading completion latencies")?
            .into_iter()
            .map(|(created_at, completed_at)| {
                (completed_at - created_at).num_milliseconds() as f64
            })
            .collect();

        let dlq_depth = self.queue.dlq_depth()?;

        Ok(Metrics {
            rps,
            failure_rate,
            p50_ms: percentile(&latencies_ms, 0.50),
            p95_ms: percentile(&latencies_ms, 0.95),
            p99_ms: percentile(&latencies_ms, 0.99),
            dlq_depth,
        })
    }
}

/// Nearest-rank percentile over an unsorted sample. Returns `0.0` for an
/// empty sample rather than `NaN`, since an idle window is a legitimate
/// state for a freshly deployed system.
pub fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_empty() {
        assert_eq!(0.0, percentile(&[], 0.95));
    }

    #[test]
    fn test_percentile_single_value() {
        assert_eq!(10.0, percentile(&[10.0], 0.50));
        assert_eq!(10.0, percentile(&[10.0], 0.99));
    }

    #[test]
    fn test_percentile_p50_of_sorted_range() {
        let samples: Vec<f64> = (1..=101).map(|n| n as f64).collect();
        assert_eq!(51.0, percentile(&samples, 0.50));
    }

    #[test]
    fn test_percentile_unsorted_input() {
        let samples = vec![30.0, 10.0, 20.0];
        assert_eq!(20.0, percentile(&samples, 0.50));
    }
}
