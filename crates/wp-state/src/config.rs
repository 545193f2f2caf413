//! Run configuration: the validated input a run (fresh or restored) is
//! built from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use wp_types::{config_error, RunId, RunIdentity, WpResult};

use crate::budget::BudgetLimits;

/// Cost recorded for failed evaluations unless configured otherwise (`i32::MAX`).
pub const DEFAULT_COST_FOR_CRASH: f64 = 2_147_483_647.0;

/// What happens when the same (configuration, instance, seed) is recorded
/// twice within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Overwrite,
}

/// How often the three stores are flushed to the output location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CheckpointCadence {
    EveryEvaluation,
    EveryN { evaluations: u64 },
    Interval { seconds: f64 },
}

impl Default for CheckpointCadence {
    fn default() -> Self {
        Self::EveryEvaluation
    }
}

/// Top-level configuration for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run_id: RunId,

    /// Fresh writes of this run go to `<output_dir>/run_<id>/`.
    pub output_dir: PathBuf,

    pub limits: BudgetLimits,

    pub duplicate_policy: DuplicatePolicy,

    pub checkpoint: CheckpointCadence,

    /// Raw parameter values of an incumbent that takes precedence over the
    /// restored trajectory's last entry.
    pub restore_incumbent: Option<Map<String, Value>>,

    /// Skip configurations the ledger has already seen.
    pub deterministic: bool,

    /// Cost recorded for crashed, timed-out or aborted evaluations.
    pub cost_for_crash: f64,

    /// Instance contexts evaluated round-robin. Empty means no instances.
    pub instances: Vec<String>,

    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: RunId::default(),
            output_dir: PathBuf::from("waypoint-output"),
            limits: BudgetLimits::default(),
            duplicate_policy: DuplicatePolicy::default(),
            checkpoint: CheckpointCadence::default(),
            restore_incumbent: None,
            deterministic: true,
            cost_for_crash: DEFAULT_COST_FOR_CRASH,
            instances: Vec::new(),
            seed: 0,
        }
    }
}

impl RunConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_limits(mut self, limits: BudgetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_max_evaluations(mut self, n: u64) -> Self {
        self.limits.max_evaluations = Some(n);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_checkpoint(mut self, cadence: CheckpointCadence) -> Self {
        self.checkpoint = cadence;
        self
    }

    pub fn with_restore_incumbent(mut self, values: Map<String, Value>) -> Self {
        self.restore_incumbent = Some(values);
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_cost_for_crash(mut self, cost: f64) -> Self {
        self.cost_for_crash = cost;
        self
    }

    pub fn with_instances(mut self, instances: Vec<String>) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn identity(&self) -> RunIdentity {
        RunIdentity::new(self.run_id, &self.output_dir)
    }

    pub fn validate(&self) -> WpResult<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(config_error!("output_dir must not be empty"));
        }
        for (name, limit) in [
            ("max_wallclock_secs", self.limits.max_wallclock_secs),
            ("max_eval_time_secs", self.limits.max_eval_time_secs),
        ] {
            if let Some(v) = limit {
                if !v.is_finite() || v < 0.0 {
                    return Err(config_error!("{} must be a non-negative number, got {}", name, v));
                }
            }
        }
        match self.checkpoint {
            CheckpointCadence::EveryN { evaluations: 0 } => {
                return Err(config_error!("checkpoint interval must be at least one evaluation"));
            }
            CheckpointCadence::Interval { seconds } if !(seconds > 0.0 && seconds.is_finite()) => {
                return Err(config_error!("checkpoint interval must be positive, got {}s", seconds));
            }
            _ => {}
        }
        if !self.cost_for_crash.is_finite() {
            return Err(config_error!("cost_for_crash must be finite"));
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> WpResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

/// Options that may be overridden when re-creating a run, e.g. to continue
/// an exhausted run with a larger budget in a new location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfigOverrides {
    pub run_id: Option<RunId>,
    pub output_dir: Option<PathBuf>,
    pub max_evaluations: Option<u64>,
    pub max_failures: Option<u64>,
    pub max_wallclock_secs: Option<f64>,
    pub max_eval_time_secs: Option<f64>,
    pub duplicate_policy: Option<DuplicatePolicy>,
    pub restore_incumbent: Option<Map<String, Value>>,
}

impl RunConfigOverrides {
    /// Overlay onto `base` and validate the result.
    pub fn apply(self, base: &RunConfig) -> WpResult<RunConfig> {
        let mut config = base.clone();
        if let Some(run_id) = self.run_id {
            config.run_id = run_id;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(n) = self.max_evaluations {
            config.limits.max_evaluations = Some(n);
        }
        if let Some(n) = self.max_failures {
            config.limits.max_failures = Some(n);
        }
        if let Some(secs) = self.max_wallclock_secs {
            config.limits.max_wallclock_secs = Some(secs);
        }
        if let Some(secs) = self.max_eval_time_secs {
            config.limits.max_eval_time_secs = Some(secs);
        }
        if let Some(policy) = self.duplicate_policy {
            config.duplicate_policy = policy;
        }
        if self.restore_incumbent.is_some() {
            config.restore_incumbent = self.restore_incumbent;
        }
        config.validate()?;
        Ok(config)
    }
}
