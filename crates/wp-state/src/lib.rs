//! # wp-state
//!
//! Persistent run state for Waypoint: the evaluation ledger, budget counters
//! and incumbent trajectory, their on-disk artifacts, checkpointing, and the
//! coordinator that restores a prior run into a new one.

pub mod artifacts;
pub mod budget;
pub mod checkpoint;
pub mod config;
pub mod ledger;
pub mod restore;
pub mod trajectory;

pub use artifacts::{ArtifactPaths, BUDGET_FILE, LEDGER_FILE, TRAJECTORY_FILE};
pub use budget::{BudgetCounters, BudgetDocument, BudgetKind, BudgetLimits, BudgetTracker};
pub use checkpoint::{AsyncCheckpointer, CheckpointSink, CheckpointSnapshot, SyncCheckpointer};
pub use config::{
    CheckpointCadence, DuplicatePolicy, RunConfig, RunConfigOverrides, DEFAULT_COST_FOR_CRASH,
};
pub use ledger::{ConfigId, EvaluationRecord, EvaluationStatus, Ledger, LedgerDocument};
pub use restore::{Incumbent, IncumbentOrigin, RestoreCoordinator, RestorePhase, RestoredState};
pub use trajectory::{TrajectoryDelta, TrajectoryEntry, TrajectoryRecorder};
