//! Budget counters and the tracker that compares them against run limits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;
use wp_types::{ParseError, WpResult};

use crate::artifacts::{read_artifact, write_atomic};

/// Current on-disk version of the budget document.
pub const BUDGET_FORMAT_VERSION: u32 = 1;

/// Resources a run can spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BudgetKind {
    Evaluations,
    Failures,
    WallclockSecs,
    EvalTimeSecs,
}

impl BudgetKind {
    pub const ALL: [BudgetKind; 4] = [
        BudgetKind::Evaluations,
        BudgetKind::Failures,
        BudgetKind::WallclockSecs,
        BudgetKind::EvalTimeSecs,
    ];
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Evaluations => "evaluations",
            Self::Failures => "failures",
            Self::WallclockSecs => "wallclock_secs",
            Self::EvalTimeSecs => "eval_time_secs",
        };
        f.write_str(name)
    }
}

/// Ceilings for a run. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    pub max_evaluations: Option<u64>,
    pub max_failures: Option<u64>,
    pub max_wallclock_secs: Option<f64>,
    pub max_eval_time_secs: Option<f64>,
}

impl BudgetLimits {
    pub fn evaluations(n: u64) -> Self {
        Self {
            max_evaluations: Some(n),
            ..Self::default()
        }
    }

    pub fn get(&self, kind: BudgetKind) -> Option<f64> {
        match kind {
            BudgetKind::Evaluations => self.max_evaluations.map(|v| v as f64),
            BudgetKind::Failures => self.max_failures.map(|v| v as f64),
            BudgetKind::WallclockSecs => self.max_wallclock_secs,
            BudgetKind::EvalTimeSecs => self.max_eval_time_secs,
        }
    }
}

/// Consumption so far. Monotonically non-decreasing within and across runs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetCounters {
    pub evaluations: u64,
    pub failures: u64,
    pub wallclock_secs: f64,
    pub eval_time_secs: f64,
    /// Distinct configurations evaluated.
    pub configs_seen: u64,
    pub incumbent_changes: u64,
}

impl BudgetCounters {
    pub fn get(&self, kind: BudgetKind) -> f64 {
        match kind {
            BudgetKind::Evaluations => self.evaluations as f64,
            BudgetKind::Failures => self.failures as f64,
            BudgetKind::WallclockSecs => self.wallclock_secs,
            BudgetKind::EvalTimeSecs => self.eval_time_secs,
        }
    }

    /// Parse a persisted budget document.
    pub fn load(raw: &str, artifact: &str) -> WpResult<Self> {
        let doc: BudgetDocument = serde_json::from_str(raw).map_err(|e| ParseError::Malformed {
            artifact: artifact.to_string(),
            message: e.to_string(),
        })?;
        if doc.format_version > BUDGET_FORMAT_VERSION {
            return Err(ParseError::UnsupportedVersion {
                artifact: artifact.to_string(),
                found: doc.format_version,
                supported: BUDGET_FORMAT_VERSION,
            }
            .into());
        }

        let counters = doc.counters;
        for (field, value) in [
            ("wallclock_secs", counters.wallclock_secs),
            ("eval_time_secs", counters.eval_time_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ParseError::Inconsistent {
                    artifact: artifact.to_string(),
                    message: format!("{field} must be a non-negative number, found {value}"),
                }
                .into());
            }
        }
        Ok(counters)
    }

    pub fn load_file(path: impl AsRef<Path>) -> WpResult<Self> {
        let (raw, artifact) = read_artifact(path.as_ref())?;
        Self::load(&raw, &artifact)
    }
}

/// Persisted form of [`BudgetCounters`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDocument {
    pub format_version: u32,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub saved_at: DateTime<Utc>,
    pub counters: BudgetCounters,
}

/// Tracks consumption against the limits of the current run.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetTracker {
    counters: BudgetCounters,
    limits: BudgetLimits,
}

impl BudgetTracker {
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_counters(BudgetCounters::default(), limits)
    }

    /// Resume from prior consumption under (possibly new) limits.
    pub fn with_counters(counters: BudgetCounters, limits: BudgetLimits) -> Self {
        Self { counters, limits }
    }

    /// Swap the limits; consumption is kept as is.
    pub fn with_limits(mut self, limits: BudgetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn counters(&self) -> &BudgetCounters {
        &self.counters
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Add `amount` to the counter of `kind`. Counts are rounded to whole
    /// units; negative or non-finite amounts are ignored.
    pub fn consume(&mut self, kind: BudgetKind, amount: f64) {
        if !amount.is_finite() || amount < 0.0 {
            warn!("Ignoring invalid {} consumption: {}", kind, amount);
            return;
        }
        // Counters saturate rather than wrap; they never decrease.
        let units = amount.round() as u64;
        match kind {
            BudgetKind::Evaluations => {
                self.counters.evaluations = self.counters.evaluations.saturating_add(units)
            }
            BudgetKind::Failures => {
                self.counters.failures = self.counters.failures.saturating_add(units)
            }
            BudgetKind::WallclockSecs => {
                self.counters.wallclock_secs = (self.counters.wallclock_secs + amount).min(f64::MAX)
            }
            BudgetKind::EvalTimeSecs => {
                self.counters.eval_time_secs = (self.counters.eval_time_secs + amount).min(f64::MAX)
            }
        }
    }

    pub fn record_new_config(&mut self) {
        self.counters.configs_seen += 1;
    }

    pub fn record_incumbent_change(&mut self) {
        self.counters.incumbent_changes += 1;
    }

    pub fn used(&self, kind: BudgetKind) -> f64 {
        self.counters.get(kind)
    }

    /// Budget left for `kind`, or `None` when unlimited.
    pub fn remaining(&self, kind: BudgetKind) -> Option<f64> {
        self.limits
            .get(kind)
            .map(|limit| (limit - self.used(kind)).max(0.0))
    }

    /// The first counter that has reached its limit, if any.
    pub fn exhausted_by(&self) -> Option<BudgetKind> {
        BudgetKind::ALL.into_iter().find(|kind| {
            self.limits
                .get(*kind)
                .is_some_and(|limit| self.used(*kind) >= limit)
        })
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted_by().is_some()
    }

    pub fn to_document(&self, session_id: Uuid) -> BudgetDocument {
        BudgetDocument {
            format_version: BUDGET_FORMAT_VERSION,
            session_id: Some(session_id),
            saved_at: Utc::now(),
            counters: self.counters,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>, session_id: Uuid) -> WpResult<()> {
        let json = serde_json::to_vec_pretty(&self.to_document(session_id))?;
        write_atomic(path.as_ref(), &json)?;
        Ok(())
    }

    /// Log consumption against limits.
    pub fn summary(&self) {
        for kind in BudgetKind::ALL {
            match self.limits.get(kind) {
                Some(limit) => info!("Budget {}: {} / {}", kind, self.used(kind), limit),
                None => info!("Budget {}: {} (unlimited)", kind, self.used(kind)),
            }
        }
        info!(
            "Configurations seen: {}, incumbent changes: {}",
            self.counters.configs_seen, self.counters.incumbent_changes
        );
    }
}
