//! The optimization loop: suggest, evaluate, record, checkpoint.

use chrono::Utc;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, warn};
use wp_state::{
    ArtifactPaths, BudgetKind, BudgetTracker, CheckpointCadence, CheckpointSink,
    CheckpointSnapshot, EvaluationRecord, EvaluationStatus, Ledger, RestoredState, RunConfig,
    TrajectoryEntry, TrajectoryRecorder,
};
use wp_types::{Configuration, ExecutionError, RunIdentity, WpResult};

use crate::executor::{EvaluationOutcome, Evaluator};
use crate::search::SearchStrategy;

/// Consecutive already-evaluated suggestions tolerated in deterministic mode.
pub const MAX_SKIPPED_SUGGESTIONS: usize = 1000;

/// Why [`Optimizer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetExhausted(BudgetKind),
    /// The strategy has nothing left to propose.
    SearchExhausted,
    /// Deterministic mode kept receiving configurations already evaluated.
    NoNewConfigurations,
    /// The target asked the run to stop.
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationSummary {
    pub identity: RunIdentity,
    pub stop_reason: StopReason,
    /// Evaluations consumed in total, restored ones included.
    pub evaluations: u64,
    /// Evaluations performed by this session.
    pub new_evaluations: u64,
    pub failures: u64,
    pub incumbent: Option<(Configuration, f64)>,
    pub output: ArtifactPaths,
}

/// Drives one run from a restored (or fresh) state until a stop condition.
pub struct Optimizer {
    identity: RunIdentity,
    paths: ArtifactPaths,
    ledger: Ledger,
    budget: BudgetTracker,
    trajectory: TrajectoryRecorder,
    incumbent: Option<(Configuration, f64)>,

    strategy: Box<dyn SearchStrategy>,
    evaluator: Box<dyn Evaluator>,
    sink: Box<dyn CheckpointSink>,

    cadence: CheckpointCadence,
    deterministic: bool,
    cost_for_crash: f64,
    instances: Vec<String>,
    seed: u64,

    instance_cursor: usize,
    since_checkpoint: u64,
    last_checkpoint: Instant,
    last_tick: Instant,
}

impl Optimizer {
    pub fn new(
        state: RestoredState,
        config: &RunConfig,
        strategy: Box<dyn SearchStrategy>,
        evaluator: Box<dyn Evaluator>,
        sink: Box<dyn CheckpointSink>,
    ) -> Self {
        let paths = state.output_paths();
        let now = Instant::now();
        Self {
            identity: state.identity,
            paths,
            ledger: state.ledger,
            budget: state.budget,
            trajectory: state.trajectory,
            incumbent: state.incumbent.map(|inc| (inc.config, inc.cost)),
            strategy,
            evaluator,
            sink,
            cadence: config.checkpoint,
            deterministic: config.deterministic,
            cost_for_crash: config.cost_for_crash,
            instances: config.instances.clone(),
            seed: config.seed,
            instance_cursor: 0,
            since_checkpoint: 0,
            last_checkpoint: now,
            last_tick: now,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn trajectory(&self) -> &TrajectoryRecorder {
        &self.trajectory
    }

    pub fn incumbent(&self) -> Option<&(Configuration, f64)> {
        self.incumbent.as_ref()
    }

    /// Run until the budget is exhausted or the search stops, then write a
    /// final checkpoint.
    pub fn run(&mut self) -> WpResult<OptimizationSummary> {
        info!(
            "Starting {} search for {} into {} ({} prior evaluations)",
            self.strategy.name(),
            self.identity.run_id,
            self.paths.ledger.display(),
            self.budget.counters().evaluations
        );
        let before = self.budget.counters().evaluations;
        self.last_tick = Instant::now();

        let stop_reason = loop {
            self.tick();
            if let Some(kind) = self.budget.exhausted_by() {
                info!("Budget {} exhausted", kind);
                break StopReason::BudgetExhausted(kind);
            }

            let config = match self.next_config() {
                Ok(config) => config,
                Err(reason) => break reason,
            };

            let aborted = self.evaluate_and_record(config);
            if self.checkpoint_due() {
                self.checkpoint()?;
            }
            if aborted {
                break StopReason::Aborted;
            }
        };

        self.tick();
        self.checkpoint()?;
        self.sink.flush()?;

        let summary = OptimizationSummary {
            identity: self.identity.clone(),
            stop_reason,
            evaluations: self.budget.counters().evaluations,
            new_evaluations: self.budget.counters().evaluations.saturating_sub(before),
            failures: self.budget.counters().failures,
            incumbent: self.incumbent.clone(),
            output: self.paths.clone(),
        };
        info!("Run {} stopped: {:?}", self.identity.run_id, stop_reason);
        if let Some((config, cost)) = &summary.incumbent {
            info!("Final incumbent [{}] with estimated cost {}", config, cost);
        }
        self.budget.summary();
        Ok(summary)
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f64();
        self.budget.consume(BudgetKind::WallclockSecs, elapsed);
        self.last_tick = now;
    }

    fn next_config(&mut self) -> Result<Configuration, StopReason> {
        let mut skipped = 0;
        loop {
            let config = self.strategy.suggest().ok_or_else(|| {
                info!("Search strategy {} has no more configurations", self.strategy.name());
                StopReason::SearchExhausted
            })?;
            if !self.deterministic || !self.ledger.contains(&config) {
                return Ok(config);
            }
            debug!("Skipping already evaluated configuration [{}]", config);
            skipped += 1;
            if skipped >= MAX_SKIPPED_SUGGESTIONS {
                warn!(
                    "Gave up after {} consecutive suggestions that were already evaluated",
                    skipped
                );
                return Err(StopReason::NoNewConfigurations);
            }
        }
    }

    fn next_instance(&mut self) -> Option<String> {
        if self.instances.is_empty() {
            return None;
        }
        let instance = self.instances[self.instance_cursor % self.instances.len()].clone();
        self.instance_cursor += 1;
        Some(instance)
    }

    /// Returns `true` if the target aborted the run.
    fn evaluate_and_record(&mut self, config: Configuration) -> bool {
        let instance = self.next_instance();
        let started_at = Utc::now();
        let timer = Instant::now();
        let result = self.evaluator.evaluate(&config, instance.as_deref(), self.seed);
        let wall = timer.elapsed().as_secs_f64();
        let finished_at = Utc::now();

        let aborted = matches!(result, Err(ExecutionError::Aborted { .. }));
        let outcome = match result {
            Ok(outcome) if outcome.cost.is_finite() => outcome,
            Ok(outcome) => {
                warn!("Evaluation of [{}] returned non-finite cost {}", config, outcome.cost);
                EvaluationOutcome::success(self.cost_for_crash)
                    .with_status(EvaluationStatus::Crashed)
                    .with_info(json!({ "error": format!("non-finite cost {}", outcome.cost) }))
            }
            Err(e) => {
                warn!("Evaluation of [{}] failed: {}", config, e);
                let (status, time) = match &e {
                    ExecutionError::Crashed { .. } => (EvaluationStatus::Crashed, wall),
                    ExecutionError::Timeout { seconds } => (EvaluationStatus::Timeout, *seconds),
                    ExecutionError::Aborted { .. } => (EvaluationStatus::Aborted, wall),
                };
                EvaluationOutcome::success(self.cost_for_crash)
                    .with_status(status)
                    .with_time(time)
                    .with_info(json!({ "error": e.to_string() }))
            }
        };

        // Reported measurements that cannot be persisted fall back to what we observed.
        let time = outcome
            .time
            .filter(|t| t.is_finite() && *t >= 0.0)
            .unwrap_or(wall);
        let is_new = !self.ledger.contains(&config);
        let mut record = EvaluationRecord::new(
            config.clone(),
            outcome.cost,
            outcome.status,
            self.identity.run_id,
        )
        .with_instance(instance, self.seed)
        .with_time(time);
        record.memory_mb = outcome.memory_mb.filter(|m| m.is_finite());
        record.started_at = started_at;
        record.finished_at = finished_at;
        record.additional_info = outcome.additional_info;

        self.budget.consume(BudgetKind::Evaluations, 1.0);
        self.budget.consume(BudgetKind::EvalTimeSecs, time);
        if outcome.status.is_failure() {
            self.budget.consume(BudgetKind::Failures, 1.0);
        }
        self.since_checkpoint += 1;

        if let Err(e) = self.ledger.record(record) {
            warn!("Discarding evaluation: {}", e);
            return aborted;
        }
        if is_new {
            self.budget.record_new_config();
        }
        self.strategy.report(&config, outcome.cost);
        self.update_incumbent();
        aborted
    }

    fn update_incumbent(&mut self) {
        let Some((best, cost)) = self.ledger.best() else {
            return;
        };
        let Some(incumbent_id) = self.ledger.config_id(best) else {
            return;
        };
        let counters = self.budget.counters();
        let entry = TrajectoryEntry {
            evaluations: counters.evaluations,
            wallclock_secs: counters.wallclock_secs,
            eval_time_secs: counters.eval_time_secs,
            incumbent: best.clone(),
            incumbent_id,
            cost,
            recorded_at: Utc::now(),
        };
        if self.trajectory.append_if_improved(entry) {
            self.incumbent = Some((best.clone(), cost));
            self.budget.record_incumbent_change();
        }
    }

    fn checkpoint_due(&self) -> bool {
        match self.cadence {
            CheckpointCadence::EveryEvaluation => true,
            CheckpointCadence::EveryN { evaluations } => self.since_checkpoint >= evaluations,
            CheckpointCadence::Interval { seconds } => {
                self.last_checkpoint.elapsed().as_secs_f64() >= seconds
            }
        }
    }

    fn checkpoint(&mut self) -> WpResult<()> {
        let snapshot = CheckpointSnapshot::capture(
            &self.paths,
            self.identity.session_id,
            &self.ledger,
            &self.budget,
            &self.trajectory,
        )?;
        let upto = snapshot.trajectory_upto();
        self.sink.submit(snapshot)?;
        self.trajectory.mark_flushed(upto);
        self.since_checkpoint = 0;
        self.last_checkpoint = Instant::now();
        debug!("Checkpoint submitted for {}", self.identity.run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FnEvaluator;
    use crate::search::{GridSearch, RandomSearch};
    use tempfile::tempdir;
    use wp_state::{DuplicatePolicy, RestoreCoordinator, SyncCheckpointer};
    use wp_types::{ParameterValue, SearchSpace};

    fn space() -> SearchSpace {
        SearchSpace::new().add_float("x", -1.0, 1.0)
    }

    fn square(config: &Configuration) -> Result<f64, ExecutionError> {
        match config.get("x") {
            Some(ParameterValue::Float(x)) => Ok(x * x),
            _ => Err(ExecutionError::Crashed {
                message: "missing x".into(),
            }),
        }
    }

    fn optimizer(config: &RunConfig, evaluator: Box<dyn Evaluator>) -> Optimizer {
        let space = space();
        let state = RestoreCoordinator::new(&space, config.clone())
            .unwrap()
            .restore(None)
            .unwrap();
        Optimizer::new(
            state,
            config,
            Box::new(RandomSearch::new(space.clone(), config.seed)),
            evaluator,
            Box::new(SyncCheckpointer::new()),
        )
    }

    #[test]
    fn runs_until_evaluation_budget_is_spent() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new(dir.path()).with_max_evaluations(10);
        let mut opt = optimizer(&config, Box::new(FnEvaluator::new(square)));

        let summary = opt.run().unwrap();
        assert_eq!(
            summary.stop_reason,
            StopReason::BudgetExhausted(BudgetKind::Evaluations)
        );
        assert_eq!(summary.evaluations, 10);
        assert_eq!(summary.new_evaluations, 10);
        assert_eq!(opt.ledger().len(), 10);
        assert!(summary.output.all_exist());

        // The incumbent is the best ledger entry and the trajectory improves.
        let (best, cost) = opt.ledger().best().unwrap();
        assert_eq!(summary.incumbent, Some((best.clone(), cost)));
        let costs: Vec<f64> = opt.trajectory().entries().iter().map(|e| e.cost).collect();
        assert!(costs.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(costs.last().copied(), Some(cost));
    }

    #[test]
    fn failures_are_recorded_with_crash_cost() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new(dir.path())
            .with_max_evaluations(4)
            .with_cost_for_crash(1000.0);
        let failing = FnEvaluator::new(|_: &Configuration| -> Result<f64, ExecutionError> {
            Err(ExecutionError::Timeout { seconds: 2.0 })
        });
        let mut opt = optimizer(&config, Box::new(failing));

        let summary = opt.run().unwrap();
        assert_eq!(summary.failures, 4);
        assert!(opt
            .ledger()
            .iter()
            .all(|r| r.status == EvaluationStatus::Timeout && r.cost == 1000.0 && r.time == 2.0));
        assert_eq!(opt.budget().counters().eval_time_secs, 8.0);
    }

    #[test]
    fn unusable_reported_measurements_fall_back() {
        struct Garbled;
        impl Evaluator for Garbled {
            fn evaluate(
                &mut self,
                _config: &Configuration,
                _instance: Option<&str>,
                _seed: u64,
            ) -> Result<EvaluationOutcome, ExecutionError> {
                Ok(EvaluationOutcome::success(1.0)
                    .with_time(f64::NAN)
                    .with_memory(f64::INFINITY))
            }
        }

        let dir = tempdir().unwrap();
        let config = RunConfig::new(dir.path()).with_max_evaluations(3);
        let mut opt = optimizer(&config, Box::new(Garbled));
        let summary = opt.run().unwrap();

        assert_eq!(summary.evaluations, 3);
        assert!(!opt.ledger().is_empty());
        assert!(opt
            .ledger()
            .iter()
            .all(|r| r.time.is_finite() && r.time >= 0.0 && r.memory_mb.is_none()));
        assert!(opt.budget().counters().eval_time_secs.is_finite());
    }

    #[test]
    fn failure_budget_stops_the_run() {
        let dir = tempdir().unwrap();
        let mut config = RunConfig::new(dir.path()).with_max_evaluations(100);
        config.limits.max_failures = Some(3);
        let failing = FnEvaluator::new(|_: &Configuration| -> Result<f64, ExecutionError> {
            Err(ExecutionError::Crashed {
                message: "segfault".into(),
            })
        });
        let mut opt = optimizer(&config, Box::new(failing));
        let summary = opt.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::BudgetExhausted(BudgetKind::Failures));
        assert_eq!(summary.evaluations, 3);
    }

    #[test]
    fn abort_stops_after_recording() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new(dir.path()).with_max_evaluations(10);
        let mut calls = 0;
        let aborting = FnEvaluator::new(move |config: &Configuration| {
            calls += 1;
            if calls == 3 {
                Err(ExecutionError::Aborted {
                    message: "target shut down".into(),
                })
            } else {
                square(config)
            }
        });
        let mut opt = optimizer(&config, Box::new(aborting));
        let summary = opt.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::Aborted);
        assert_eq!(opt.ledger().len(), 3);
    }

    #[test]
    fn grid_exhaustion_ends_the_run_in_deterministic_mode() {
        let dir = tempdir().unwrap();
        let space = SearchSpace::new().add_int("n", 0, 4);
        let config = RunConfig::new(dir.path())
            .with_max_evaluations(50)
            .with_checkpoint(CheckpointCadence::EveryN { evaluations: 2 });
        let state = RestoreCoordinator::new(&space, config.clone())
            .unwrap()
            .restore(None)
            .unwrap();
        let evaluator = FnEvaluator::new(|c: &Configuration| match c.get("n") {
            Some(ParameterValue::Int(n)) => Ok((*n - 2).pow(2) as f64),
            _ => Ok(f64::NAN),
        });
        let mut opt = Optimizer::new(
            state,
            &config,
            Box::new(GridSearch::new(&space, 2)),
            Box::new(evaluator),
            Box::new(SyncCheckpointer::new()),
        );

        let summary = opt.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::SearchExhausted);
        assert_eq!(summary.evaluations, 5);
        let (best, cost) = summary.incumbent.unwrap();
        assert_eq!(best.get("n"), Some(&ParameterValue::Int(2)));
        assert_eq!(cost, 0.0);

        let persisted = Ledger::load_file(&summary.output.ledger, &space, DuplicatePolicy::Reject).unwrap();
        assert_eq!(persisted.len(), 5);
    }

    #[test]
    fn grid_run_can_be_restored() {
        let dir = tempdir().unwrap();
        let space = SearchSpace::new().add_float("x", -2.0, 0.1);
        let config = RunConfig::new(dir.path().join("first")).with_max_evaluations(10);
        let state = RestoreCoordinator::new(&space, config.clone())
            .unwrap()
            .restore(None)
            .unwrap();
        let mut opt = Optimizer::new(
            state,
            &config,
            Box::new(GridSearch::new(&space, 10)),
            Box::new(FnEvaluator::new(square)),
            Box::new(SyncCheckpointer::new()),
        );
        let summary = opt.run().unwrap();
        assert_eq!(summary.evaluations, 10);

        let next = RunConfig::new(dir.path().join("second")).with_max_evaluations(20);
        let restored = RestoreCoordinator::new(&space, next)
            .unwrap()
            .restore(Some(&summary.output))
            .unwrap();
        assert_eq!(restored.ledger.len(), 10);
        let upper = wp_types::Configuration::from_pairs([("x", ParameterValue::Float(0.1))]);
        assert!(restored.ledger.contains(&upper));
    }

    #[test]
    fn instances_are_used_round_robin() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new(dir.path())
            .with_max_evaluations(4)
            .with_instances(vec!["a".into(), "b".into()]);
        let mut opt = optimizer(&config, Box::new(FnEvaluator::new(square)));
        opt.run().unwrap();
        let instances: Vec<Option<&str>> = opt.ledger().iter().map(|r| r.instance.as_deref()).collect();
        assert_eq!(instances, vec![Some("a"), Some("b"), Some("a"), Some("b")]);
    }

    #[test]
    fn non_finite_cost_counts_as_crash() {
        let dir = tempdir().unwrap();
        let config = RunConfig::new(dir.path()).with_max_evaluations(2);
        let evaluator = FnEvaluator::new(|_: &Configuration| Ok(f64::INFINITY));
        let mut opt = optimizer(&config, Box::new(evaluator));
        let summary = opt.run().unwrap();
        assert_eq!(summary.failures, 2);
        assert!(opt.ledger().iter().all(|r| r.status == EvaluationStatus::Crashed));
    }
}
