//! Run identity: which optimization session produced (or will produce) a set
//! of artifacts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Numeric run identifier. Artifacts of run `n` live under `run_n/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u32);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self(1)
    }
}

/// (run-identifier, output-location) plus a per-process session id.
///
/// The session id is stamped into the ledger and budget documents this run
/// writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub run_id: RunId,
    pub output_dir: PathBuf,
    pub session_id: Uuid,
}

impl RunIdentity {
    pub fn new(run_id: RunId, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id,
            output_dir: output_dir.into(),
            session_id: Uuid::new_v4(),
        }
    }

    /// Directory holding this run's artifacts.
    pub fn run_dir(&self) -> PathBuf {
        run_dir(&self.output_dir, self.run_id)
    }
}

/// `<output_dir>/run_<id>`
pub fn run_dir(output_dir: &Path, run_id: RunId) -> PathBuf {
    output_dir.join(run_id.to_string())
}
