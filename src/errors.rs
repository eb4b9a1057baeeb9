// Define an errors module and use a glob import as recommended by:
//
//     http://brson.github.io/2016/11/30/starting-with-error-chain
//

// Create the Error, ErrorKind, ResultExt, and Result types
error_chain!{
    // Automatic conversions between this error chain and other error types not defined by the
    // `error_chain!`. The description and cause will forward to the description and cause of the
    // original error.
    foreign_links {
        Database(::diesel::result::Error);
        DatabaseConnectionPool(::r2d2::Error);
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Image(::image::ImageError);
        Queue(::redis::RedisError);
    }

    errors {
        /// Submission payload was missing, empty, or not a decodable image.
        InvalidRequest(detail: String) {
            description("invalid submission request")
            display("invalid submission request: {}", detail)
        }

        /// `image:{job_id}` had already expired out of the BQS by the time a worker looked for it.
        ImageMissing(job_id: i64) {
            description("image missing from blob store")
            display("image missing from blob store for job {}", job_id)
        }

        /// Decode/resize/normalize failed for one item in a batch.
        PreprocessFailed(job_id: i64) {
            description("image preprocessing failed")
            display("image preprocessing failed for job {}", job_id)
        }

        /// The predictor did not return within its deadline.
        InferenceTimeout(batch_size: usize) {
            description("predictor deadline exceeded")
            display("predictor deadline exceeded for a batch of {}", batch_size)
        }

        /// The predictor returned an error for the batch.
        InferenceError(detail: String) {
            description("predictor error")
            display("predictor error: {}", detail)
        }

        /// A job exhausted MAX_RETRIES and was moved to FAILED + DLQ.
        RetriesExhausted(job_id: i64) {
            description("retries exhausted")
            display("job {} exhausted its retry budget", job_id)
        }

        /// A named model version isn't present in the catalog.
        UnknownModelVersion(name: String) {
            description("unknown model version")
            display("no model version registered under name `{}`", name)
        }

        JobNotFound(job_id: i64) {
            description("job not found")
            display("job {} not found", job_id)
        }

        /// `GetResult` was called before the job reached COMPLETED.
        ResultNotReady(job_id: i64) {
            description("result not ready")
            display("job {} has not completed yet", job_id)
        }
    }
}

// Collect error strings together so that we can build a good error message to
// send up. It's worth nothing that the original error is actually at the end of
// the iterator, but since it's the most relevant, we reverse the list.
//
// The chain isn't a double-ended iterator (meaning we can't use `rev`), so we
// have to collect it to a Vec first before reversing it.
pub fn error_strings(error: &Error) -> Vec<String> {
    error
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .iter()
        .cloned()
        .rev()
        .collect()
}
