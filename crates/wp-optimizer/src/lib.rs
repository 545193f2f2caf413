//! # wp-optimizer
//!
//! Budget-limited optimization for Waypoint.
//!
//! Provides search strategies (grid, random), the evaluator seam to the
//! target being optimized, and the driver loop that records every outcome in
//! the ledger, tracks the incumbent and checkpoints through `wp-state`, so an
//! exhausted run can be restored and continued with a larger budget.

mod driver;
mod executor;
mod search;

pub use driver::{OptimizationSummary, Optimizer, StopReason, MAX_SKIPPED_SUGGESTIONS};
pub use executor::{EvaluationOutcome, Evaluator, FnEvaluator};
pub use search::{GridSearch, RandomSearch, SearchStrategy};
