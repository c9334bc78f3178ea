//! Scalar sinks for training and validation metrics
//!
//! Metric names arrive bare (`lddt_ca`, `loss`); the phase carries the
//! `train`/`val` namespace and each sink decides how to combine the two.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// Phase a batch of scalars belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Scalars produced by training steps
    Train,

    /// Scalars produced by validation
    Val,
}

impl Phase {
    /// Namespace prefix used when metric names are flattened
    pub fn prefix(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val => "val",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Destination for named scalars produced during a run
pub trait MetricsSink: Send {
    /// Record one batch of scalars for a phase at a global step
    fn record(&mut self, phase: Phase, step: u64, scalars: &BTreeMap<String, f64>) -> Result<()>;
}

/// Sink that emits scalars through the tracing subscriber
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Create a tracing-backed sink
    pub fn new() -> Self {
        Self
    }
}

impl MetricsSink for TracingSink {
    fn record(&mut self, phase: Phase, step: u64, scalars: &BTreeMap<String, f64>) -> Result<()> {
        let formatted: Vec<String> = scalars
            .iter()
            .map(|(name, value)| format!("{}/{}={:.6}", phase.prefix(), name, value))
            .collect();
        info!(step, "{}", formatted.join(" "));
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    phase: Phase,
    step: u64,
    metrics: &'a BTreeMap<String, f64>,
}

/// Sink appending one JSON object per record to a file
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating the file when missing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonlSink {
    fn record(&mut self, phase: Phase, step: u64, scalars: &BTreeMap<String, f64>) -> Result<()> {
        let record = JsonlRecord {
            phase,
            step,
            metrics: scalars,
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One recorded batch of scalars
#[derive(Debug, Clone)]
pub struct MetricRecord {
    /// Phase the scalars were recorded under
    pub phase: Phase,

    /// Global step at recording time
    pub step: u64,

    /// Bare metric names and their values
    pub scalars: BTreeMap<String, f64>,
}

/// Sink keeping every record in memory behind a shared handle
///
/// Cloning shares the underlying store, so a test can hand one handle to a
/// trainer and inspect the other afterwards.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<MetricRecord>>>,
}

impl RecordingSink {
    /// Create an empty recording sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, in record order
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().clone()
    }

    /// Values recorded under `name` in `phase`, in record order
    pub fn series(&self, phase: Phase, name: &str) -> Vec<f64> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.phase == phase)
            .filter_map(|r| r.scalars.get(name).copied())
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&mut self, phase: Phase, step: u64, scalars: &BTreeMap<String, f64>) -> Result<()> {
        self.records.lock().push(MetricRecord {
            phase,
            step,
            scalars: scalars.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalars(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn test_phase_prefixes() {
        assert_eq!(Phase::Train.prefix(), "train");
        assert_eq!(Phase::Val.prefix(), "val");
        assert_eq!(Phase::Val.to_string(), "val");
    }

    #[test]
    fn test_recording_sink_keeps_order_and_shares_storage() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();

        handle
            .record(Phase::Train, 1, &scalars(&[("loss", 2.0)]))
            .unwrap();
        handle
            .record(Phase::Val, 1, &scalars(&[("lddt_ca", 0.8)]))
            .unwrap();
        handle
            .record(Phase::Train, 2, &scalars(&[("loss", 1.5)]))
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].step, 1);
        assert_eq!(records[2].scalars["loss"], 1.5);

        assert_eq!(sink.series(Phase::Train, "loss"), vec![2.0, 1.5]);
        assert_eq!(sink.series(Phase::Val, "lddt_ca"), vec![0.8]);
        assert!(sink.series(Phase::Val, "loss").is_empty());
    }

    #[test]
    fn test_jsonl_sink_writes_parseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");

        {
            let mut sink = JsonlSink::create(&path).unwrap();
            sink.record(Phase::Train, 7, &scalars(&[("loss", 0.25)]))
                .unwrap();
            sink.record(Phase::Val, 7, &scalars(&[("lddt_ca", 0.9)]))
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["phase"], "train");
        assert_eq!(first["step"], 7);
        assert_eq!(first["metrics"]["loss"], 0.25);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["phase"], "val");
    }

    #[test]
    fn test_jsonl_sink_appends_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");

        {
            let mut sink = JsonlSink::create(&path).unwrap();
            sink.record(Phase::Train, 1, &scalars(&[("loss", 1.0)]))
                .unwrap();
        }
        {
            let mut sink = JsonlSink::create(&path).unwrap();
            sink.record(Phase::Train, 2, &scalars(&[("loss", 0.5)]))
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_tracing_sink_accepts_records() {
        let mut sink = TracingSink::new();
        sink.record(Phase::Train, 3, &scalars(&[("loss", 0.1)]))
            .unwrap();
    }
}
