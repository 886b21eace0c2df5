//! Statistics primitives for the stowage simulation kernel.
//!
//! This crate is domain-free: it knows nothing about robots or pods. It
//! provides the storage disciplines the kernel's statistics are built from:
//!
//! - [`BoundedSeries`] -- a timestamped series capped at a configured point
//!   count. When an insertion pushes it past the cap, the whole buffer
//!   (including the point just inserted) is drained to a [`StatSink`] and the
//!   buffer is left empty.
//! - [`SummarySeries`] -- an unbounded list of samples kept in full for
//!   end-of-run mean and percentile computation.
//! - [`RunningMean`] -- an incremental average that keeps no samples.
//!
//! # Usage
//!
//! ```ignore
//! let mut sink = MemorySink::new();
//! let mut series = BoundedSeries::<MyPoint>::new(10_000);
//! series.push(MyPoint { time: 1.0 }, &mut sink)?;
//! // End of run:
//! series.flush(&mut sink)?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default cap of a bounded series.
pub const DEFAULT_MAX_DATA_POINTS: usize = 10_000;

/// Default length after which a summary series logs a growth warning.
pub const DEFAULT_SUMMARY_SOFT_LIMIT: usize = 1_000_000;

/// Separator between the values of one formatted data point.
pub const DELIMITER: char = ';';

/// Prefix of the header line written before the first batch of a series.
pub const HEADER_PREFIX: char = '#';

/// Configuration shared by every series of one statistics set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesConfig {
    /// Maximum number of points a bounded series holds in memory.
    pub max_points: usize,
    /// Summary-series length that triggers a one-time warning.
    pub summary_soft_limit: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_DATA_POINTS,
            summary_soft_limit: DEFAULT_SUMMARY_SOFT_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Data points
// ---------------------------------------------------------------------------

/// A record stored in a [`BoundedSeries`].
///
/// `header` and `line` must produce the same number of [`DELIMITER`]-separated
/// values.
pub trait DataPoint {
    /// Name of the series, used by sinks to pick a destination.
    const SERIES: &'static str;

    /// Column names joined by [`DELIMITER`], without the [`HEADER_PREFIX`].
    fn header() -> String;

    /// The point's values joined by [`DELIMITER`].
    fn line(&self) -> String;
}

/// Join already formatted values with [`DELIMITER`].
pub fn join_values(values: &[String]) -> String {
    let mut out = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(v);
    }
    out
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Errors raised while writing to a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("i/o failure on series `{series}`: {source}")]
    Io {
        series: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("sink rejected series `{series}`: {reason}")]
    Rejected { series: &'static str, reason: String },
}

/// An append-only destination for flushed series.
///
/// The kernel calls into a sink only when a bounded series overflows and at
/// the end of a run, never once per recorded point.
pub trait StatSink {
    /// Append a batch of formatted lines to `series`. `header` describes the
    /// columns; sinks write it once, before the first batch of a series.
    fn append(&mut self, series: &'static str, header: &str, lines: &[String])
    -> Result<(), SinkError>;

    /// Discard everything appended so far. Used at the warmup boundary.
    fn clear(&mut self) -> Result<(), SinkError>;
}

/// Keeps every appended line in memory, grouped by series.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    headers: BTreeMap<&'static str, String>,
    lines: BTreeMap<&'static str, Vec<String>>,
    batches: BTreeMap<&'static str, usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines appended to `series`, oldest first.
    pub fn lines(&self, series: &str) -> &[String] {
        self.lines.get(series).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Header recorded for `series`, without the prefix.
    pub fn header(&self, series: &str) -> Option<&str> {
        self.headers.get(series).map(String::as_str)
    }

    /// Number of `append` calls received for `series`.
    pub fn batch_count(&self, series: &str) -> usize {
        self.batches.get(series).copied().unwrap_or(0)
    }

    /// Total number of lines across all series.
    pub fn total_lines(&self) -> usize {
        self.lines.values().map(Vec::len).sum()
    }

    /// Names of every series that received at least one batch.
    pub fn series_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.lines.keys().copied()
    }
}

impl StatSink for MemorySink {
    fn append(
        &mut self,
        series: &'static str,
        header: &str,
        lines: &[String],
    ) -> Result<(), SinkError> {
        self.headers
            .entry(series)
            .or_insert_with(|| header.to_string());
        self.lines
            .entry(series)
            .or_default()
            .extend(lines.iter().cloned());
        *self.batches.entry(series).or_insert(0) += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.headers.clear();
        self.lines.clear();
        self.batches.clear();
        Ok(())
    }
}

/// Drops every batch. Used when only end-of-run summaries matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl StatSink for DiscardSink {
    fn append(&mut self, _: &'static str, _: &str, _: &[String]) -> Result<(), SinkError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends each series to `<dir>/<series>.csv`.
///
/// The header line is written when a file is first created by this sink.
/// `clear` deletes every file this sink has written.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    written: BTreeSet<&'static str>,
}

impl DirectorySink {
    /// Create a sink writing into `dir`. The directory is created on demand.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: BTreeSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `series`.
    pub fn path_for(&self, series: &str) -> PathBuf {
        self.dir.join(format!("{series}.csv"))
    }
}

impl StatSink for DirectorySink {
    fn append(
        &mut self,
        series: &'static str,
        header: &str,
        lines: &[String],
    ) -> Result<(), SinkError> {
        let io_err = |source| SinkError::Io { series, source };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let path = self.path_for(series);
        let fresh = !self.written.contains(series);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!fresh)
            .truncate(fresh)
            .open(&path)
            .map_err(io_err)?;
        if fresh {
            writeln!(file, "{HEADER_PREFIX}{header}").map_err(io_err)?;
            self.written.insert(series);
        }
        for line in lines {
            writeln!(file, "{line}").map_err(io_err)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        for series in std::mem::take(&mut self.written) {
            let path = self.path_for(series);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(SinkError::Io { series, source }),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BoundedSeries
// ---------------------------------------------------------------------------

/// A timestamped series with bounded in-memory size.
///
/// Insertion appends first and then checks the cap: when the length exceeds
/// `max_points`, every buffered point (the new one included) is appended to
/// the sink in insertion order and the buffer is cleared. After any `push`
/// the buffer therefore holds at most `max_points` points.
///
/// If the sink fails, the newest `max_points` points stay buffered, the
/// older ones are dropped and counted, and the error is returned.
#[derive(Debug, Clone)]
pub struct BoundedSeries<P> {
    points: Vec<P>,
    max_points: usize,
    flushed_points: u64,
    dropped_points: u64,
    flush_count: u64,
}

impl<P: DataPoint> BoundedSeries<P> {
    /// Create an empty series.
    ///
    /// # Panics
    ///
    /// Panics if `max_points` is zero.
    pub fn new(max_points: usize) -> Self {
        assert!(max_points > 0, "BoundedSeries cap must be > 0");
        Self {
            points: Vec::new(),
            max_points,
            flushed_points: 0,
            dropped_points: 0,
            flush_count: 0,
        }
    }

    /// Record a point. Returns `true` if the insertion caused a flush.
    pub fn push(&mut self, point: P, sink: &mut dyn StatSink) -> Result<bool, SinkError> {
        self.points.push(point);
        if self.points.len() <= self.max_points {
            return Ok(false);
        }
        if let Err(err) = self.flush(sink) {
            let excess = self.points.len() - self.max_points;
            self.points.drain(..excess);
            self.dropped_points += excess as u64;
            tracing::warn!(series = P::SERIES, dropped = excess, error = %err, "sink failed, oldest points dropped");
            return Err(err);
        }
        Ok(true)
    }

    /// Drain every buffered point to the sink. Returns the number written.
    pub fn flush(&mut self, sink: &mut dyn StatSink) -> Result<usize, SinkError> {
        if self.points.is_empty() {
            return Ok(0);
        }
        let lines: Vec<String> = self.points.iter().map(DataPoint::line).collect();
        sink.append(P::SERIES, &P::header(), &lines)?;
        let n = self.points.len();
        self.points.clear();
        self.flushed_points += n as u64;
        self.flush_count += 1;
        tracing::debug!(series = P::SERIES, points = n, "flushed series");
        Ok(n)
    }

    /// Drop every buffered point and forget flush history.
    pub fn clear(&mut self) {
        self.points.clear();
        self.flushed_points = 0;
        self.dropped_points = 0;
        self.flush_count = 0;
    }

    /// Points currently held in memory, oldest first.
    pub fn points(&self) -> &[P] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Points recorded since the last clear, whether flushed, buffered or
    /// dropped.
    pub fn total_recorded(&self) -> u64 {
        self.flushed_points + self.dropped_points + self.points.len() as u64
    }

    /// Points lost to sink failures since the last clear.
    pub fn dropped_points(&self) -> u64 {
        self.dropped_points
    }

    /// Number of flushes since the last clear.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }
}

// ---------------------------------------------------------------------------
// SummarySeries
// ---------------------------------------------------------------------------

/// An unbounded list of samples kept in full for end-of-run statistics.
///
/// Growth is not capped. Once the length passes the soft limit a single
/// warning is logged so long runs are visible in the log.
#[derive(Debug, Clone)]
pub struct SummarySeries {
    name: &'static str,
    values: Vec<f64>,
    soft_limit: usize,
    warned: bool,
}

impl SummarySeries {
    pub fn new(name: &'static str, soft_limit: usize) -> Self {
        Self {
            name,
            values: Vec::new(),
            soft_limit,
            warned: false,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
        if !self.warned && self.values.len() > self.soft_limit {
            self.warned = true;
            tracing::warn!(
                series = self.name,
                len = self.values.len(),
                "summary series passed its soft limit"
            );
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.warned = false;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().min_by(f64::total_cmp)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().max_by(f64::total_cmp)
    }

    /// Nearest-rank percentile for `q` in `[0, 1]` (clamped).
    ///
    /// The rank is `round(q * (n - 1))` over the sorted samples, so `q = 0`
    /// is the minimum and `q = 1` the maximum.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let rank = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[rank])
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(0.5)
    }
}

// ---------------------------------------------------------------------------
// RunningMean
// ---------------------------------------------------------------------------

/// Incremental arithmetic mean over a stream of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: f64) {
        let n = self.count as f64;
        self.mean = (self.mean * n + sample) / (n + 1.0);
        self.count += 1;
    }

    /// Mean of all samples, 0 when none were added.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
