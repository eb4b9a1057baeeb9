//! The application's data layer containing models that will be queried from
//! and inserted into the database.
//!
//! Simple helper functions are allowed, but they should be kept extremely
//! simple, with preference for any and all domain logic to be offloaded to a
//! mediator.
//!
//! Insertable models are found in the `insertable` module. These are distinct
//! from queryable models so that we can take advantage of default values
//! provided by the database (the best example being ID sequences).

use errors::*;
use predictor::Scores;
use schema;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

/// The job state machine's states (§4.2). Stored in the database as text
/// rather than a native enum so that an operator can read it directly with
/// `psql` without a type lookup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(*self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl ::std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unrecognized job status `{}`", other).into()),
        }
    }
}

#[derive(Clone, Debug, Queryable)]
pub struct ModelVersion {
    pub id:           i64,
    pub name:         String,
    pub weights_path: String,
    pub created_at:   DateTime<Utc>,
}

impl ModelVersion {
    /// Looks a model version up by name, which is how the submission path
    /// resolves the `model_name` parameter on `POST /v1/jobs`.
    pub fn find_by_name(conn: &mut PgConnection, name: &str) -> Result<Self> {
        schema::model_version::table
            .filter(schema::model_version::name.eq(name))
            .first(conn)
            .optional()?
            .ok_or_else(|| ErrorKind::UnknownModelVersion(name.to_owned()).into())
    }
}

#[derive(Clone, Debug, Queryable)]
pub struct Job {
    pub id:               i64,
    pub status:           String,
    pub input_sha256:     String,
    pub model_version_id: i64,
    pub created_at:       DateTime<Utc>,
    pub updated_at:       DateTime<Utc>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        // The column is written exclusively by this crate's own state machine, so a
        // parse failure here would mean on-disk corruption, not user input.
        self.status
            .parse()
            .expect("inference_job.status held a value outside the state machine")
    }

    pub fn find(conn: &mut PgConnection, id: i64) -> Result<Option<Self>> {
        Ok(schema::inference_job::table
            .filter(schema::inference_job::id.eq(id))
            .first(conn)
            .optional()?)
    }
}

#[derive(Clone, Debug, Queryable)]
pub struct JobResult {
    pub job_id:     i64,
    pub output:     serde_json::Value,
    pub top_label:  String,
    pub created_at: DateTime<Utc>,
}

impl JobResult {
    pub fn find(conn: &mut PgConnection, job_id: i64) -> Result<Option<Self>> {
        Ok(schema::inference_result::table
            .filter(schema::inference_result::job_id.eq(job_id))
            .first(conn)
            .optional()?)
    }

    pub fn scores(&self) -> Result<Scores> {
        Scores::from_json(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use model::*;

    #[test]
    fn test_job_status_round_trip() {
        for status in &[
            JobStatus::Queued,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn test_job_status_is_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_status_rejects_unknown() {
        assert!("BOGUS".parse::<JobStatus>().is_err());
    }
}

pub mod insertable {
    use schema::{inference_job, inference_result, model_version};

    use chrono::{DateTime, Utc};

    #[derive(Insertable)]
    #[diesel(table_name = model_version)]
    pub struct ModelVersion {
        pub name:         String,
        pub weights_path: String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = inference_job)]
    pub struct Job {
        pub status:           String,
        pub input_sha256:     String,
        pub model_version_id: i64,
    }

    #[derive(Insertable)]
    #[diesel(table_name = inference_result)]
    pub struct JobResult {
        pub job_id:     i64,
        pub output:     serde_json::Value,
        pub top_label:  String,
        pub created_at: DateTime<Utc>,
    }
}
