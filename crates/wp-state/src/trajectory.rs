//! Incumbent trajectory: the ordered log of strict improvements.
//!
//! Persisted as JSON lines. The recorder remembers how many entries have
//! reached disk so each flush only appends the missing suffix; the file is
//! always a prefix of the in-memory sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info, warn};
use wp_types::{Configuration, ConfigurationResolver, ParseError, WpResult};

use crate::artifacts::{append, read_artifact, write_atomic};
use crate::ledger::ConfigId;

/// Current on-disk version of a trajectory line.
pub const TRAJECTORY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryEntry {
    /// Evaluations consumed when this incumbent was found.
    pub evaluations: u64,
    pub wallclock_secs: f64,
    pub eval_time_secs: f64,
    pub incumbent: Configuration,
    pub incumbent_id: ConfigId,
    /// Estimated cost of the incumbent at that point.
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrajectoryLine {
    format_version: u32,
    evaluations: u64,
    wallclock_secs: f64,
    eval_time_secs: f64,
    cost: f64,
    incumbent_id: ConfigId,
    incumbent: Map<String, Value>,
    recorded_at: DateTime<Utc>,
}

impl From<&TrajectoryEntry> for TrajectoryLine {
    fn from(entry: &TrajectoryEntry) -> Self {
        Self {
            format_version: TRAJECTORY_FORMAT_VERSION,
            evaluations: entry.evaluations,
            wallclock_secs: entry.wallclock_secs,
            eval_time_secs: entry.eval_time_secs,
            cost: entry.cost,
            incumbent_id: entry.incumbent_id,
            incumbent: entry.incumbent.to_value_map(),
            recorded_at: entry.recorded_at,
        }
    }
}

/// Lines not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryDelta {
    /// Rewrite the whole file instead of appending.
    pub rewrite: bool,
    pub lines: String,
    /// Entries persisted once this delta is written.
    pub upto: usize,
}

impl TrajectoryDelta {
    pub fn is_empty(&self) -> bool {
        !self.rewrite && self.lines.is_empty()
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if self.rewrite {
            write_atomic(path, self.lines.as_bytes())
        } else if !self.lines.is_empty() {
            append(path, self.lines.as_bytes())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryRecorder {
    entries: Vec<TrajectoryEntry>,
    flushed: usize,
    /// False until the first write at the current location.
    initialized: bool,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from previously loaded entries. Nothing is considered
    /// persisted, so the first flush writes them all.
    pub fn from_entries(entries: Vec<TrajectoryEntry>) -> Self {
        Self {
            entries,
            flushed: 0,
            initialized: false,
        }
    }

    /// Append `entry` iff its cost strictly improves on the latest entry.
    /// Entries with a non-finite cost or timestamp are never appended.
    pub fn append_if_improved(&mut self, entry: TrajectoryEntry) -> bool {
        if ![entry.cost, entry.wallclock_secs, entry.eval_time_secs]
            .iter()
            .all(|v| v.is_finite())
        {
            warn!(
                "Refusing trajectory entry for [{}] with non-finite cost {} or time",
                entry.incumbent, entry.cost
            );
            return false;
        }
        let improved = match self.entries.last() {
            None => true,
            Some(last) => entry.cost < last.cost,
        };
        if improved {
            info!(
                "New incumbent {} [{}] with cost {} after {} evaluations",
                entry.incumbent_id, entry.incumbent, entry.cost, entry.evaluations
            );
            self.entries.push(entry);
        }
        improved
    }

    pub fn latest(&self) -> Option<&TrajectoryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[TrajectoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The part of the trajectory that has not reached disk yet.
    pub fn pending(&self) -> WpResult<TrajectoryDelta> {
        let rewrite = !self.initialized;
        let from = if rewrite { 0 } else { self.flushed };
        let mut lines = String::new();
        for entry in &self.entries[from..] {
            lines.push_str(&serde_json::to_string(&TrajectoryLine::from(entry))?);
            lines.push('\n');
        }
        Ok(TrajectoryDelta {
            rewrite,
            lines,
            upto: self.entries.len(),
        })
    }

    /// Record that a delta produced by [`pending`](Self::pending) was handed
    /// to a writer.
    pub fn mark_flushed(&mut self, upto: usize) {
        self.flushed = upto.min(self.entries.len());
        self.initialized = true;
    }

    /// Write the pending suffix to `path` in the caller's thread.
    pub fn flush_to(&mut self, path: impl AsRef<Path>) -> WpResult<()> {
        let delta = self.pending()?;
        delta.write_to(path.as_ref())?;
        debug!(
            "Flushed trajectory to {} ({} entries persisted)",
            path.as_ref().display(),
            delta.upto
        );
        self.mark_flushed(delta.upto);
        Ok(())
    }

    /// Parse a persisted trajectory, resolving each incumbent against the
    /// current search space. Blank lines are skipped.
    pub fn load<R>(raw: &str, artifact: &str, resolver: &R) -> WpResult<Vec<TrajectoryEntry>>
    where
        R: ConfigurationResolver + ?Sized,
    {
        let mut entries = Vec::new();
        for (idx, text) in raw.lines().enumerate() {
            let line_no = idx + 1;
            if text.trim().is_empty() {
                continue;
            }
            let line: TrajectoryLine =
                serde_json::from_str(text).map_err(|e| ParseError::MalformedLine {
                    artifact: artifact.to_string(),
                    line: line_no,
                    message: e.to_string(),
                })?;
            if line.format_version > TRAJECTORY_FORMAT_VERSION {
                return Err(ParseError::UnsupportedVersion {
                    artifact: format!("{artifact}:{line_no}"),
                    found: line.format_version,
                    supported: TRAJECTORY_FORMAT_VERSION,
                }
                .into());
            }
            let incumbent = resolver
                .resolve(&line.incumbent)
                .map_err(|e| e.in_context(format!("{artifact}:{line_no}: incumbent")))?;
            entries.push(TrajectoryEntry {
                evaluations: line.evaluations,
                wallclock_secs: line.wallclock_secs,
                eval_time_secs: line.eval_time_secs,
                incumbent,
                incumbent_id: line.incumbent_id,
                cost: line.cost,
                recorded_at: line.recorded_at,
            });
        }
        info!("Loaded trajectory {}: {} entries", artifact, entries.len());
        Ok(entries)
    }

    pub fn load_file<R>(path: impl AsRef<Path>, resolver: &R) -> WpResult<Vec<TrajectoryEntry>>
    where
        R: ConfigurationResolver + ?Sized,
    {
        let (raw, artifact) = read_artifact(path.as_ref())?;
        Self::load(&raw, &artifact, resolver)
    }
}
