//! Artifact locations and the low-level file operations the stores share.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use wp_types::{run_dir, ParseError, RunId};

pub const LEDGER_FILE: &str = "ledger.json";
pub const BUDGET_FILE: &str = "budget.json";
pub const TRAJECTORY_FILE: &str = "trajectory.jsonl";

/// Where the three stores of one run are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub ledger: PathBuf,
    pub budget: PathBuf,
    pub trajectory: PathBuf,
}

impl ArtifactPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            ledger: dir.join(LEDGER_FILE),
            budget: dir.join(BUDGET_FILE),
            trajectory: dir.join(TRAJECTORY_FILE),
        }
    }

    /// Artifacts of `run_id` below `output_dir`.
    pub fn for_run(output_dir: impl AsRef<Path>, run_id: RunId) -> Self {
        Self::in_dir(run_dir(output_dir.as_ref(), run_id))
    }

    pub fn all_exist(&self) -> bool {
        self.ledger.is_file() && self.budget.is_file() && self.trajectory.is_file()
    }
}

/// Read an artifact, naming it in the error if it cannot be read.
pub(crate) fn read_artifact(path: &Path) -> Result<(String, String), ParseError> {
    let artifact = path.display().to_string();
    match fs::read_to_string(path) {
        Ok(raw) => Ok((raw, artifact)),
        Err(source) => Err(ParseError::Unreadable { artifact, source }),
    }
}

/// Replace `path` with `bytes` via a sibling temp file and a rename, so a
/// reader never sees a half-written document.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

pub(crate) fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_data()
}
