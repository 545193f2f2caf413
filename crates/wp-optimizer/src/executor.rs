//! The seam to the external target being optimized.

use serde_json::Value;
use wp_state::EvaluationStatus;
use wp_types::{Configuration, ExecutionError};

/// Result of one successful (or capped) evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub cost: f64,
    pub status: EvaluationStatus,
    /// Seconds the target reports it ran. Wall time is used when absent.
    pub time: Option<f64>,
    pub memory_mb: Option<f64>,
    pub additional_info: Value,
}

impl EvaluationOutcome {
    pub fn success(cost: f64) -> Self {
        Self {
            cost,
            status: EvaluationStatus::Success,
            time: None,
            memory_mb: None,
            additional_info: Value::Null,
        }
    }

    pub fn with_status(mut self, status: EvaluationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_time(mut self, seconds: f64) -> Self {
        self.time = Some(seconds);
        self
    }

    pub fn with_memory(mut self, megabytes: f64) -> Self {
        self.memory_mb = Some(megabytes);
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.additional_info = info;
        self
    }
}

/// Runs the target for a configuration on an instance with a seed.
pub trait Evaluator: Send {
    fn evaluate(
        &mut self,
        config: &Configuration,
        instance: Option<&str>,
        seed: u64,
    ) -> Result<EvaluationOutcome, ExecutionError>;
}

/// Adapts a closure over the configuration alone.
pub struct FnEvaluator<F> {
    func: F,
}

impl<F> FnEvaluator<F>
where
    F: FnMut(&Configuration) -> Result<f64, ExecutionError> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: FnMut(&Configuration) -> Result<f64, ExecutionError> + Send,
{
    fn evaluate(
        &mut self,
        config: &Configuration,
        _instance: Option<&str>,
        _seed: u64,
    ) -> Result<EvaluationOutcome, ExecutionError> {
        (self.func)(config).map(EvaluationOutcome::success)
    }
}
