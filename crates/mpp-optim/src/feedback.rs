use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use log::info;
use mpp_core::errors::ErrorInfo;
use mpp_core::{MarkId, MppError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable snapshot of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reporting {
    /// Zero-based iteration index.
    pub iteration: u64,
    /// Identifier of the selected kernel.
    pub kernel_id: usize,
    /// Name of the selected kernel.
    pub kernel: String,
    /// Whether a proposal was produced and evaluated.
    pub proposed: bool,
    /// Whether the proposal was accepted.
    pub accepted: bool,
    /// Whether the accepted state set a new best energy.
    pub new_best: bool,
    /// Temperature used for the acceptance decision.
    pub temperature: f64,
    /// Energy change of the proposal.
    pub delta: Option<f64>,
    /// Proposal ratio `q`.
    pub ratio: Option<f64>,
    /// Acceptance probability.
    pub acceptance_probability: Option<f64>,
    /// Current energy after the iteration.
    pub energy: f64,
    /// Best energy so far.
    pub best_energy: f64,
    /// Mark count after the iteration.
    pub mark_count: usize,
    /// Marks added, removed or changed by the proposal.
    pub changed: Vec<MarkId>,
    /// Why no proposal was evaluated.
    pub failure: Option<String>,
    /// Wall-clock time spent proposing and evaluating.
    pub execution_nanos: u64,
}

/// Lifecycle call made before the first iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBegin {
    /// Energy of the initial configuration.
    pub initial_energy: f64,
    /// Number of marks in the initial configuration.
    pub initial_marks: usize,
    /// Kernel names in identifier order.
    pub kernels: Vec<String>,
}

/// Lifecycle call made after the last iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEnd {
    /// Iterations executed.
    pub iterations: u64,
    /// Best energy reached.
    pub best_energy: f64,
    /// Energy of the final configuration.
    pub final_energy: f64,
    /// Failure that stopped the run, if any.
    pub failure: Option<String>,
}

/// Consumer of per-iteration records. Errors are logged by the loop and never
/// stop the run.
pub trait FeedbackReceiver: Send {
    /// Called once before the first iteration.
    fn report_begin(&mut self, _begin: &RunBegin) -> Result<(), MppError> {
        Ok(())
    }

    /// Called once per iteration.
    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError>;

    /// Called once after the last iteration.
    fn report_end(&mut self, _end: &RunEnd) -> Result<(), MppError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFeedback;

impl FeedbackReceiver for NullFeedback {
    fn report_iteration(&mut self, _record: &Reporting) -> Result<(), MppError> {
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingFeedback {
    /// Begin call, once received.
    pub begin: Option<RunBegin>,
    /// Records in iteration order.
    pub records: Vec<Reporting>,
    /// End call, once received.
    pub end: Option<RunEnd>,
}

impl RecordingFeedback {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of the recorded trajectory.
    pub fn trajectory_hash(&self) -> String {
        trajectory_hash(&self.records)
    }
}

impl FeedbackReceiver for RecordingFeedback {
    fn report_begin(&mut self, begin: &RunBegin) -> Result<(), MppError> {
        self.begin = Some(begin.clone());
        Ok(())
    }

    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn report_end(&mut self, end: &RunEnd) -> Result<(), MppError> {
        self.end = Some(end.clone());
        Ok(())
    }
}

/// SHA-256 over every record with timing removed, as lowercase hex.
pub fn trajectory_hash(records: &[Reporting]) -> String {
    let mut hasher = TrajectoryHasher::new();
    for record in records {
        hasher.update(record);
    }
    hasher.finish()
}

/// Incremental form of [`trajectory_hash`], usable as a receiver.
#[derive(Clone, Default)]
pub struct TrajectoryHasher {
    hasher: Sha256,
    records: u64,
}

impl TrajectoryHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record into the digest.
    pub fn update(&mut self, record: &Reporting) {
        let mut canonical = record.clone();
        canonical.execution_nanos = 0;
        // Plain data with string keys always serializes.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(&bytes);
        self.records += 1;
    }

    /// Records hashed so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Hex digest of everything seen so far.
    pub fn finish(&self) -> String {
        self.hasher
            .clone()
            .finalize()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect()
    }
}

impl fmt::Debug for TrajectoryHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrajectoryHasher")
            .field("records", &self.records)
            .field("digest", &self.finish())
            .finish()
    }
}

impl FeedbackReceiver for TrajectoryHasher {
    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError> {
        self.update(record);
        Ok(())
    }
}

/// Summary of a window of consecutive iterations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateWindow {
    /// First iteration of the window.
    pub first_iteration: u64,
    /// Iterations observed.
    pub iterations: u64,
    /// Iterations that produced a proposal.
    pub proposed: u64,
    /// Accepted proposals.
    pub accepted: u64,
    /// New best states found.
    pub new_best: u64,
    /// Energy after the last observed iteration.
    pub energy: f64,
    /// Best energy after the last observed iteration.
    pub best_energy: f64,
    /// Temperature of the last observed iteration.
    pub temperature: f64,
    /// Mark count after the last observed iteration.
    pub mark_count: usize,
}

impl AggregateWindow {
    /// Folds one record into the window.
    pub fn observe(&mut self, record: &Reporting) {
        if self.iterations == 0 {
            self.first_iteration = record.iteration;
        }
        self.iterations += 1;
        self.proposed += u64::from(record.proposed);
        self.accepted += u64::from(record.accepted);
        self.new_best += u64::from(record.new_best);
        self.energy = record.energy;
        self.best_energy = record.best_energy;
        self.temperature = record.temperature;
        self.mark_count = record.mark_count;
    }

    /// Accepted over proposed, zero when nothing was proposed.
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Consumer of aggregated windows.
pub trait AggregateReceiver: Send {
    /// Called once per completed window and once for the trailing partial window.
    fn report_aggregate(&mut self, window: &AggregateWindow) -> Result<(), MppError>;
}

/// Collects records into windows of `period` iterations and forwards each
/// window to an [`AggregateReceiver`].
#[derive(Debug, Clone)]
pub struct PeriodicFeedback<A> {
    period: u64,
    window: AggregateWindow,
    inner: A,
}

impl<A: AggregateReceiver> PeriodicFeedback<A> {
    /// Wraps `inner`; a zero period is treated as one.
    pub fn new(period: u64, inner: A) -> Self {
        Self {
            period: period.max(1),
            window: AggregateWindow::default(),
            inner,
        }
    }

    /// The wrapped receiver.
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: AggregateReceiver> FeedbackReceiver for PeriodicFeedback<A> {
    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError> {
        self.window.observe(record);
        if self.window.iterations >= self.period {
            let window = std::mem::take(&mut self.window);
            self.inner.report_aggregate(&window)?;
        }
        Ok(())
    }

    fn report_end(&mut self, _end: &RunEnd) -> Result<(), MppError> {
        if self.window.iterations > 0 {
            let window = std::mem::take(&mut self.window);
            self.inner.report_aggregate(&window)?;
        }
        Ok(())
    }
}

/// Logs each aggregate window at `info` level.
#[derive(Debug, Clone, Default)]
pub struct LogFeedback {
    label: String,
}

impl LogFeedback {
    /// Creates a logger whose lines are prefixed with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl AggregateReceiver for LogFeedback {
    fn report_aggregate(&mut self, window: &AggregateWindow) -> Result<(), MppError> {
        info!(
            "{} iter {}..{} energy {:.4} best {:.4} marks {} T {:.4e} accept {:.1}% new-best {}",
            self.label,
            window.first_iteration,
            window.first_iteration + window.iterations,
            window.energy,
            window.best_energy,
            window.mark_count,
            window.temperature,
            100.0 * window.acceptance_rate(),
            window.new_best,
        );
        Ok(())
    }
}

/// Header of the per-iteration CSV.
pub const CSV_HEADER: [&str; 11] = [
    "iteration",
    "kernel",
    "proposed",
    "accepted",
    "new_best",
    "temperature",
    "delta",
    "energy",
    "best_energy",
    "marks",
    "failure",
];

/// Writes one CSV row per iteration.
pub struct CsvFeedback {
    path: PathBuf,
    writer: Option<csv::Writer<BufWriter<File>>>,
}

impl CsvFeedback {
    /// Creates the receiver; the file is created at `report_begin`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, code: &str, err: std::io::Error) -> MppError {
        MppError::Feedback(
            ErrorInfo::new(code, err.to_string()).with_context("path", self.path.display().to_string()),
        )
    }

    fn csv_error(&self, code: &str, err: csv::Error) -> MppError {
        MppError::Feedback(
            ErrorInfo::new(code, "CSV feedback failure")
                .with_context("path", self.path.display().to_string())
                .with_hint(err.to_string()),
        )
    }
}

impl fmt::Debug for CsvFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvFeedback")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl FeedbackReceiver for CsvFeedback {
    fn report_begin(&mut self, _begin: &RunBegin) -> Result<(), MppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| self.io_error("csv-mkdir", err))?;
        }
        let file = File::create(&self.path).map_err(|err| self.io_error("csv-create", err))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer
            .write_record(CSV_HEADER)
            .map_err(|err| self.csv_error("csv-write", err))?;
        self.writer = Some(writer);
        Ok(())
    }

    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(MppError::Feedback(
                ErrorInfo::new("csv-not-open", "iteration reported before run began")
                    .with_context("path", self.path.display().to_string()),
            ));
        };
        let row = [
            record.iteration.to_string(),
            record.kernel.clone(),
            record.proposed.to_string(),
            record.accepted.to_string(),
            record.new_best.to_string(),
            format!("{:.6e}", record.temperature),
            record
                .delta
                .map(|delta| format!("{delta:.6}"))
                .unwrap_or_default(),
            format!("{:.6}", record.energy),
            format!("{:.6}", record.best_energy),
            record.mark_count.to_string(),
            record.failure.clone().unwrap_or_default(),
        ];
        let result = writer.write_record(&row);
        result.map_err(|err| self.csv_error("csv-write", err))
    }

    fn report_end(&mut self, _end: &RunEnd) -> Result<(), MppError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|err| self.io_error("csv-flush", err))?;
        }
        Ok(())
    }
}

/// Forwards every call to several receivers. All receivers are called even
/// when one fails; the first error is returned.
#[derive(Default)]
pub struct FeedbackFanout {
    receivers: Vec<Box<dyn FeedbackReceiver>>,
}

impl FeedbackFanout {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a receiver.
    pub fn with(mut self, receiver: impl FeedbackReceiver + 'static) -> Self {
        self.receivers.push(Box::new(receiver));
        self
    }

    /// Adds a boxed receiver.
    pub fn push(&mut self, receiver: Box<dyn FeedbackReceiver>) {
        self.receivers.push(receiver);
    }

    fn each(
        &mut self,
        mut call: impl FnMut(&mut dyn FeedbackReceiver) -> Result<(), MppError>,
    ) -> Result<(), MppError> {
        let mut first_error = None;
        for receiver in &mut self.receivers {
            if let Err(err) = call(receiver.as_mut()) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl FeedbackReceiver for FeedbackFanout {
    fn report_begin(&mut self, begin: &RunBegin) -> Result<(), MppError> {
        self.each(|receiver| receiver.report_begin(begin))
    }

    fn report_iteration(&mut self, record: &Reporting) -> Result<(), MppError> {
        self.each(|receiver| receiver.report_iteration(record))
    }

    fn report_end(&mut self, end: &RunEnd) -> Result<(), MppError> {
        self.each(|receiver| receiver.report_end(end))
    }
}
