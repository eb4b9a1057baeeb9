//! The inference backend boundary (§4.2, §9 Design Notes).
//!
//! A `Predictor` is a black box that takes a preprocessed batch tensor and
//! returns per-item pathology scores. This module only defines the
//! interface and the fixed-shape output record; the forward pass itself is
//! out of scope for this crate and is expected to live behind whatever
//! process or library the deployment wires up (see `PredictorFactoryLive`).
//!
//! Mirrors the `HttpRequesterFactory`/`HttpRequester` split so that workers
//! can be tested against `PredictorFactoryPassThrough` without a real model
//! on hand.

use errors::*;
use preprocess::Tensor;

use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use slog::Logger;

/// Stable, fixed ordering for the 18 pathology labels this system scores.
/// A `Vec<(String, f32)>` (the "dynamic JSON output map" the upstream system
/// used) would let label sets drift between model versions silently; an
/// array of known width and order catches that at compile time instead.
pub const LABELS: [&str; 18] = [
    "Atelectasis",
    "Cardiomegaly",
    "Consolidation",
    "Edema",
    "Effusion",
    "Emphysema",
    "Fibrosis",
    "Fracture",
    "Hernia",
    "Infiltration",
    "Lung Lesion",
    "Lung Opacity",
    "Mass",
    "No Finding",
    "Nodule",
    "Pleural Thickening",
    "Pneumonia",
    "Pneumothorax",
];

/// One job's scores across the fixed label set, in `LABELS` order.
#[derive(Clone, Debug, PartialEq)]
pub struct Scores {
    pub values: [f32; 18],
}

impl Scores {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::from("inference output is not a JSON object"))?;

        let mut values = [0f32; 18];
        for (i, label) in LABELS.iter().enumerate() {
            values[i] = obj
                .get(*label)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| Error::from(format!("inference output missing label `{}`", label)))?
                as f32;
        }
        Ok(Scores { values })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::with_capacity(LABELS.len());
        for (label, value) in LABELS.iter().zip(self.values.iter()) {
            obj.insert((*label).to_owned(), serde_json::json!(*value));
        }
        serde_json::Value::Object(obj)
    }

    /// The highest-scoring label, used as `inference_result.top_label` so
    /// operators can filter/aggregate without unpacking the full JSON blob.
    pub fn top_label(&self) -> &'static str {
        let mut best_idx = 0;
        for (i, v) in self.values.iter().enumerate() {
            if *v > self.values[best_idx] {
                best_idx = i;
            }
        }
        LABELS[best_idx]
    }
}

//
// PredictorFactory trait + implementations
//

pub trait PredictorFactory: Send {
    // This is here because it's difficult to make a trait cloneable.
    fn clone_box(&self) -> Box<dyn PredictorFactory>;

    fn create(&self) -> Box<dyn Predictor>;
}

#[derive(Clone, Debug)]
pub struct PredictorFactoryLive {
    pub binary_path: String,
}

impl PredictorFactory for PredictorFactoryLive {
    fn clone_box(&self) -> Box<dyn PredictorFactory> {
        Box::new(Self {
            binary_path: self.binary_path.clone(),
        })
    }

    fn create(&self) -> Box<dyn Predictor> {
        Box::new(PredictorLive {
            binary_path: self.binary_path.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct PredictorFactoryPassThrough {
    pub scores: Scores,
}

impl PredictorFactory for PredictorFactoryPassThrough {
    fn clone_box(&self) -> Box<dyn PredictorFactory> {
        Box::new(Self {
            scores: self.scores.clone(),
        })
    }

    fn create(&self) -> Box<dyn Predictor> {
        Box::new(PredictorPassThrough {
            scores: self.scores.clone(),
        })
    }
}

//
// Predictor trait + implementations
//

pub trait Predictor {
    /// Runs a forward pass over `tensor` and returns one `Scores` per item
    /// in the batch, in the same order. Must respect `deadline`: an
    /// implementation that can't produce output in time should return
    /// `ErrorKind::InferenceTimeout` rather than block past it (§4.3).
    fn predict(&mut self, log: &Logger, tensor: &Tensor, deadline: Instant) -> Result<Vec<Scores>>;
}

/// Shells out to an external inference binary that reads a tensor on stdin
/// and writes one JSON object per item (one per line) on stdout. The actual
/// model lives behind that binary; this crate's job is batching, timeout
/// enforcement, and persistence around it.
#[derive(Debug)]
pub struct PredictorLive {
    pub binary_path: String,
}

impl Predictor for PredictorLive {
    fn predict(&mut self, log: &Logger, tensor: &Tensor, deadline: Instant) -> Result<Vec<Scores>> {
        let batch_size = tensor.batch_size;
        info!(log, "Running inference"; "batch_size" => batch_size);

        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return Err(ErrorKind::InferenceTimeout(batch_size).into());
        }

        let input = tensor.to_bytes();
        let binary_path = self.binary_path.clone();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let result = run_predictor_process(&binary_path, &input);
            // The receiver may already be gone if we timed out; that's fine.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(stdout)) => parse_predictor_output(&stdout, batch_size),
            Ok(Err(e)) => Err(e),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ErrorKind::InferenceTimeout(batch_size).into()),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ErrorKind::InferenceError("predictor process thread panicked".into()).into())
            }
        }
    }
}

fn run_predictor_process(binary_path: &str, input: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut child = Command::new(binary_path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .chain_err(|| format!("failed to spawn predictor binary `{}`", binary_path))?;

    child
        .stdin
        .take()
        .ok_or_else(|| Error::from("predictor child has no stdin"))?
        .write_all(input)
        .chain_err(|| "failed to write tensor to predictor stdin")?;

    let output = child
        .wait_with_output()
        .chain_err(|| "failed waiting on predictor process")?;

    if !output.status.success() {
        return Err(ErrorKind::InferenceError(format!(
            "predictor process exited with {}",
            output.status
        ))
        .into());
    }

    Ok(output.stdout)
}

fn parse_predictor_output(stdout: &[u8], batch_size: usize) -> Result<Vec<Scores>> {
    let text = String::from_utf8_lossy(stdout);
    let mut scores = Vec::with_capacity(batch_size);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let value: serde_json::Value = serde_json::from_str(line)?;
        scores.push(Scores::from_json(&value)?);
    }

    if scores.len() != batch_size {
        return Err(ErrorKind::InferenceError(format!(
            "predictor returned {} results for a batch of {}",
            scores.len(),
            batch_size
        ))
        .into());
    }

    Ok(scores)
}

#[derive(Clone, Debug)]
pub struct PredictorPassThrough {
    pub scores: Scores,
}

impl Predictor for PredictorPassThrough {
    fn predict(&mut self, _log: &Logger, tensor: &Tensor, _deadline: Instant) -> Result<Vec<Scores>> {
        Ok(vec![self.scores.clone(); tensor.batch_size])
    }
}

#[cfg(test)]
mod tests {
    use predictor::*;

    fn sample_scores() -> Scores {
        let mut values = [0f32; 18];
        values[13] = 0.9; // "No Finding"
        Scores { values }
    }

    #[test]
    fn test_scores_json_round_trip() {
        let scores = sample_scores();
        let json = scores.to_json();
        let parsed = Scores::from_json(&json).unwrap();
        assert_eq!(scores, parsed);
    }

    #[test]
    fn test_scores_top_label() {
        assert_eq!("No Finding", sample_scores().top_label());
    }

    #[test]
    fn test_scores_from_json_rejects_missing_label() {
        let json = serde_json::json!({"Atelectasis": 0.1});
        assert!(Scores::from_json(&json).is_err());
    }
}
