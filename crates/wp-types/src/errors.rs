use thiserror::Error;

use crate::run::RunId;

/// Main error type for the Waypoint system
#[derive(Error, Debug)]
pub enum WpError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Duplicate evaluation: {0}")]
    Duplicate(#[from] DuplicateError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Restore error: {0}")]
    Restore(#[from] RestoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// A persisted artifact is structurally malformed.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{artifact}: cannot read artifact: {source}")]
    Unreadable {
        artifact: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{artifact}: malformed document: {message}")]
    Malformed { artifact: String, message: String },

    #[error("{artifact}:{line}: malformed entry: {message}")]
    MalformedLine {
        artifact: String,
        line: usize,
        message: String,
    },

    #[error("{artifact}: unsupported format version {found} (supported up to {supported})")]
    UnsupportedVersion {
        artifact: String,
        found: u32,
        supported: u32,
    },

    #[error("{artifact}: inconsistent document: {message}")]
    Inconsistent { artifact: String, message: String },
}

/// A configuration cannot be mapped onto the current search space.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("parameter '{parameter}' is not defined in the search space")]
    UnknownParameter { parameter: String },

    #[error("parameter '{parameter}' has no value")]
    MissingParameter { parameter: String },

    #[error("parameter '{parameter}': expected {expected}, found {found}")]
    TypeMismatch {
        parameter: String,
        expected: String,
        found: String,
    },

    #[error("parameter '{parameter}': value {value} outside [{low}, {high}]")]
    OutOfRange {
        parameter: String,
        value: String,
        low: String,
        high: String,
    },

    #[error("parameter '{parameter}': {value} is not one of the allowed choices")]
    InvalidChoice { parameter: String, value: String },

    #[error("{context}: {source}")]
    InContext {
        context: String,
        source: Box<ResolutionError>,
    },
}

impl ResolutionError {
    /// Attach the artifact/configuration the failure came from.
    pub fn in_context(self, context: impl Into<String>) -> Self {
        Self::InContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context stripped.
    pub fn root(&self) -> &ResolutionError {
        match self {
            Self::InContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A record collides with an existing one under the "reject" merge policy.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("configuration [{config}] already evaluated on instance {instance:?} with seed {seed} in {run_id}")]
pub struct DuplicateError {
    pub config: String,
    pub instance: Option<String>,
    pub seed: u64,
    pub run_id: RunId,
}

/// Cross-store inconsistency detected while restoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconciliationError {
    #[error("incumbent [{config}] taken from the {origin} does not appear in the ledger")]
    IncumbentNotInLedger { config: String, origin: String },

    #[error("trajectory entry {index} names [{config}] as config #{recorded}, but the ledger has it as #{ledger}")]
    IncumbentIdMismatch {
        index: usize,
        config: String,
        recorded: u32,
        ledger: u32,
    },

    #[error("incumbent override does not resolve against the current search space: {0}")]
    UnresolvableIncumbent(ResolutionError),

    #[error("ledger holds {records} evaluations but no incumbent was recorded or supplied")]
    MissingIncumbent { records: usize },

    #[error("trajectory is not strictly improving at entry {index}: cost {cost} after {previous}")]
    NonMonotonicTrajectory {
        index: usize,
        previous: f64,
        cost: f64,
    },
}

/// Failure reported by the external evaluator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("evaluation crashed: {message}")]
    Crashed { message: String },

    #[error("evaluation timed out after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("evaluation aborted: {message}")]
    Aborted { message: String },
}

/// Misuse of the restoration coordinator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestoreError {
    #[error("restoration already failed: {cause}")]
    AlreadyFailed { cause: String },

    #[error("restored state was already handed out")]
    AlreadyRestored,
}

/// Result type alias for Waypoint operations
pub type WpResult<T> = Result<T, WpError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::WpError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::WpError::Config(format!($($arg)*))
    };
}
