//! Restoration of a prior run's persisted stores into a starting state for
//! a new run.
//!
//! The coordinator moves through `Fresh → Loading → Reconciling → Ready`, or
//! ends in `Failed`. The three stores are flushed independently by the prior
//! run, so they are loaded independently and then cross-checked; nothing is
//! ever written to the prior run's location.

use tracing::{debug, error, info, warn};
use wp_types::{
    Configuration, ConfigurationResolver, ReconciliationError, RestoreError, RunIdentity, WpError,
    WpResult,
};

use crate::artifacts::ArtifactPaths;
use crate::budget::{BudgetCounters, BudgetTracker};
use crate::config::RunConfig;
use crate::ledger::Ledger;
use crate::trajectory::{TrajectoryEntry, TrajectoryRecorder};

/// Lifecycle of a [`RestoreCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Fresh,
    Loading,
    Reconciling,
    Ready,
    Failed,
}

/// Where the restored incumbent came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncumbentOrigin {
    Trajectory,
    Override,
}

impl std::fmt::Display for IncumbentOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trajectory => f.write_str("trajectory"),
            Self::Override => f.write_str("incumbent override"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Incumbent {
    pub config: Configuration,
    /// Average cost of the incumbent over its ledger records.
    pub cost: f64,
    pub origin: IncumbentOrigin,
}

/// Consistent starting state for a (resumed) run.
#[derive(Debug, Clone)]
pub struct RestoredState {
    /// Identity of the *new* run.
    pub identity: RunIdentity,
    pub ledger: Ledger,
    pub budget: BudgetTracker,
    pub trajectory: TrajectoryRecorder,
    pub incumbent: Option<Incumbent>,
    /// Artifacts the state was restored from, if any.
    pub restored_from: Option<ArtifactPaths>,
}

impl RestoredState {
    /// Where this run writes its own checkpoints.
    pub fn output_paths(&self) -> ArtifactPaths {
        ArtifactPaths::in_dir(self.identity.run_dir())
    }

    /// Whether this run's checkpoints land on the artifacts it was restored from.
    pub fn writes_over_source(&self) -> bool {
        self.restored_from
            .as_ref()
            .is_some_and(|source| *source == self.output_paths())
    }
}

struct Loaded {
    ledger: Ledger,
    counters: BudgetCounters,
    trajectory: Vec<TrajectoryEntry>,
}

/// Builds a [`RestoredState`] from prior artifacts and a new run configuration.
pub struct RestoreCoordinator<'a, R: ConfigurationResolver + ?Sized> {
    resolver: &'a R,
    config: RunConfig,
    phase: RestorePhase,
    failure: Option<String>,
}

impl<'a, R: ConfigurationResolver + ?Sized> RestoreCoordinator<'a, R> {
    pub fn new(resolver: &'a R, config: RunConfig) -> WpResult<Self> {
        config.validate()?;
        Ok(Self {
            resolver,
            config,
            phase: RestorePhase::Fresh,
            failure: None,
        })
    }

    pub fn phase(&self) -> RestorePhase {
        self.phase
    }

    /// Cause of the failure, once `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn transition(&mut self, next: RestorePhase) {
        debug!("Restore phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn fail(&mut self, err: WpError) -> WpError {
        error!("Restoration failed during {:?}: {}", self.phase, err);
        self.failure = Some(err.to_string());
        self.transition(RestorePhase::Failed);
        err
    }

    /// Produce the starting state. With `sources == None` the run starts
    /// empty; otherwise the prior run's artifacts are loaded and reconciled.
    pub fn restore(&mut self, sources: Option<&ArtifactPaths>) -> WpResult<RestoredState> {
        match self.phase {
            RestorePhase::Fresh => {}
            RestorePhase::Failed => {
                return Err(RestoreError::AlreadyFailed {
                    cause: self.failure.clone().unwrap_or_default(),
                }
                .into())
            }
            _ => return Err(RestoreError::AlreadyRestored.into()),
        }

        let Some(paths) = sources else {
            return self.start_fresh();
        };

        self.transition(RestorePhase::Loading);
        let loaded = match self.load(paths) {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(RestorePhase::Reconciling);
        let state = match self.reconcile(loaded, paths) {
            Ok(state) => state,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(RestorePhase::Ready);
        info!(
            "Restored {} evaluations from {} into {} at {}; budget exhausted: {}",
            state.ledger.len(),
            paths.ledger.display(),
            state.identity.run_id,
            state.identity.output_dir.display(),
            state.budget.exhausted()
        );
        Ok(state)
    }

    /// Convenience for `restore(Some(&ArtifactPaths::in_dir(dir)))`.
    pub fn restore_from_dir(&mut self, dir: impl AsRef<std::path::Path>) -> WpResult<RestoredState> {
        let paths = ArtifactPaths::in_dir(dir);
        self.restore(Some(&paths))
    }

    fn start_fresh(&mut self) -> WpResult<RestoredState> {
        // An incumbent cannot be declared for a run with no history.
        if let Some(values) = &self.config.restore_incumbent {
            let err = match self.resolver.resolve(values) {
                Ok(config) => ReconciliationError::IncumbentNotInLedger {
                    config: config.to_string(),
                    origin: IncumbentOrigin::Override.to_string(),
                },
                Err(e) => ReconciliationError::UnresolvableIncumbent(e),
            };
            return Err(self.fail(err.into()));
        }

        self.transition(RestorePhase::Ready);
        info!("Starting fresh run {}", self.config.run_id);
        Ok(RestoredState {
            identity: self.config.identity(),
            ledger: Ledger::new(self.config.duplicate_policy),
            budget: BudgetTracker::new(self.config.limits),
            trajectory: TrajectoryRecorder::new(),
            incumbent: None,
            restored_from: None,
        })
    }

    fn load(&self, paths: &ArtifactPaths) -> WpResult<Loaded> {
        let ledger = Ledger::load_file(&paths.ledger, self.resolver, self.config.duplicate_policy)?;
        let counters = BudgetCounters::load_file(&paths.budget)?;
        let trajectory = TrajectoryRecorder::load_file(&paths.trajectory, self.resolver)?;
        Ok(Loaded {
            ledger,
            counters,
            trajectory,
        })
    }

    fn reconcile(&self, loaded: Loaded, paths: &ArtifactPaths) -> WpResult<RestoredState> {
        let Loaded {
            ledger,
            mut counters,
            trajectory,
        } = loaded;

        for (index, pair) in trajectory.windows(2).enumerate() {
            if !(pair[1].cost < pair[0].cost) {
                return Err(ReconciliationError::NonMonotonicTrajectory {
                    index: index + 1,
                    previous: pair[0].cost,
                    cost: pair[1].cost,
                }
                .into());
            }
        }

        // Every trajectory entry must name a ledger configuration under the
        // id the ledger gave it; anything else means the files were torn.
        for (index, entry) in trajectory.iter().enumerate() {
            let id = ledger.config_id(&entry.incumbent).ok_or_else(|| {
                ReconciliationError::IncumbentNotInLedger {
                    config: entry.incumbent.to_string(),
                    origin: IncumbentOrigin::Trajectory.to_string(),
                }
            })?;
            if id != entry.incumbent_id {
                return Err(ReconciliationError::IncumbentIdMismatch {
                    index,
                    config: entry.incumbent.to_string(),
                    recorded: entry.incumbent_id.0,
                    ledger: id.0,
                }
                .into());
            }
        }

        let declared = match &self.config.restore_incumbent {
            Some(values) => {
                let config = self
                    .resolver
                    .resolve(values)
                    .map_err(ReconciliationError::UnresolvableIncumbent)?;
                Some((config, IncumbentOrigin::Override))
            }
            None => trajectory
                .last()
                .map(|entry| (entry.incumbent.clone(), IncumbentOrigin::Trajectory)),
        };

        let incumbent = match declared {
            Some((config, origin)) => {
                let cost = ledger.average_cost(&config).ok_or_else(|| {
                    ReconciliationError::IncumbentNotInLedger {
                        config: config.to_string(),
                        origin: origin.to_string(),
                    }
                })?;
                Some(Incumbent {
                    config,
                    cost,
                    origin,
                })
            }
            None if !ledger.is_empty() => {
                return Err(ReconciliationError::MissingIncumbent {
                    records: ledger.len(),
                }
                .into())
            }
            None => None,
        };

        // The ledger may have been flushed after the counters; consumption it
        // proves is never forgotten.
        if ledger.runs_recorded() > counters.evaluations {
            warn!(
                "Budget counters ({} evaluations) lag the ledger ({} runs); lifting counters",
                counters.evaluations,
                ledger.runs_recorded()
            );
            counters.evaluations = ledger.runs_recorded();
        }
        let failures = ledger.failures() as u64;
        if failures > counters.failures {
            warn!(
                "Budget counters ({} failures) lag the ledger ({} failed records); lifting counters",
                counters.failures, failures
            );
            counters.failures = failures;
        }
        counters.configs_seen = counters.configs_seen.max(ledger.configurations().len() as u64);

        let budget = BudgetTracker::with_counters(counters, self.config.limits);
        if let Some(kind) = budget.exhausted_by() {
            warn!(
                "Restored consumption already meets the new {} limit; the run will stop immediately",
                kind
            );
        }

        let state = RestoredState {
            identity: self.config.identity(),
            ledger,
            budget,
            trajectory: TrajectoryRecorder::from_entries(trajectory),
            incumbent,
            restored_from: Some(paths.clone()),
        };
        if state.writes_over_source() {
            warn!(
                "Run {} will checkpoint into {}, overwriting the artifacts it was restored from",
                state.identity.run_id,
                state.identity.run_dir().display()
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetKind, BudgetLimits};
    use crate::checkpoint::{CheckpointSink, CheckpointSnapshot, SyncCheckpointer};
    use crate::config::DuplicatePolicy;
    use crate::ledger::{EvaluationRecord, EvaluationStatus};
    use chrono::Utc;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;
    use wp_types::{ParameterValue, ResolutionError, RunId, SearchSpace};

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_float("x1", -5.0, 10.0)
            .add_float("x2", 0.0, 15.0)
    }

    fn config(x1: f64, x2: f64) -> Configuration {
        Configuration::from_pairs([
            ("x1", ParameterValue::Float(x1)),
            ("x2", ParameterValue::Float(x2)),
        ])
    }

    /// Persist a small run of `n` evaluations with decreasing costs.
    fn persist_run(output_dir: &Path, n: u64) -> ArtifactPaths {
        let run_config = RunConfig::new(output_dir).with_max_evaluations(n);
        let identity = run_config.identity();
        let paths = ArtifactPaths::in_dir(identity.run_dir());

        let mut ledger = Ledger::new(DuplicatePolicy::Reject);
        let mut budget = BudgetTracker::new(run_config.limits);
        let mut trajectory = TrajectoryRecorder::new();
        for i in 0..n {
            let c = config(i as f64 * 0.1, 1.0);
            let cost = 50.0 - i as f64;
            ledger
                .record(EvaluationRecord::new(c.clone(), cost, EvaluationStatus::Success, RunId(1)))
                .unwrap();
            budget.consume(BudgetKind::Evaluations, 1.0);
            budget.record_new_config();
            trajectory.append_if_improved(TrajectoryEntry {
                evaluations: i + 1,
                wallclock_secs: 0.0,
                eval_time_secs: 0.0,
                incumbent_id: ledger.config_id(&c).unwrap(),
                incumbent: c,
                cost,
                recorded_at: Utc::now(),
            });
        }
        let snapshot =
            CheckpointSnapshot::capture(&paths, identity.session_id, &ledger, &budget, &trajectory)
                .unwrap();
        SyncCheckpointer::new().submit(snapshot).unwrap();
        paths
    }

    #[test]
    fn fresh_start_without_artifacts() {
        let space = space();
        let mut coordinator =
            RestoreCoordinator::new(&space, RunConfig::new("out").with_max_evaluations(5)).unwrap();
        assert_eq!(coordinator.phase(), RestorePhase::Fresh);

        let state = coordinator.restore(None).unwrap();
        assert_eq!(coordinator.phase(), RestorePhase::Ready);
        assert!(state.ledger.is_empty());
        assert_eq!(state.budget.counters(), &BudgetCounters::default());
        assert!(state.trajectory.is_empty());
        assert!(state.incumbent.is_none());
        assert!(state.restored_from.is_none());
    }

    #[test]
    fn restore_with_larger_budget_into_new_location() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(&dir.path().join("restore_me"), 25);

        let new_config = RunConfig::new(dir.path().join("restored"))
            .with_run_id(RunId(2))
            .with_max_evaluations(50);
        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, new_config).unwrap();
        let state = coordinator.restore(Some(&old_paths)).unwrap();

        assert_eq!(coordinator.phase(), RestorePhase::Ready);
        assert_eq!(state.ledger.len(), 25);
        assert_eq!(state.budget.counters().evaluations, 25);
        assert!(!state.budget.exhausted());
        assert_eq!(state.trajectory.len(), 25);
        assert_eq!(state.identity.run_id, RunId(2));
        assert_eq!(
            state.output_paths().ledger,
            dir.path().join("restored/run_2/ledger.json")
        );

        let incumbent = state.incumbent.unwrap();
        assert_eq!(incumbent.origin, IncumbentOrigin::Trajectory);
        assert_eq!(incumbent.config, config(24.0 * 0.1, 1.0));
        assert_eq!(incumbent.cost, 26.0);
    }

    #[test]
    fn restore_with_spent_budget_is_exhausted_immediately() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 10);
        let space = space();
        let mut coordinator =
            RestoreCoordinator::new(&space, RunConfig::new(dir.path()).with_max_evaluations(10)).unwrap();
        let state = coordinator.restore(Some(&old_paths)).unwrap();
        assert!(state.budget.exhausted());
        assert_eq!(state.budget.counters().evaluations, 10);
    }

    #[test]
    fn override_takes_precedence_over_trajectory() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);
        let values = config(0.1, 1.0).to_value_map();
        let run_config = RunConfig::new(dir.path().join("next")).with_restore_incumbent(values);

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, run_config).unwrap();
        let state = coordinator.restore(Some(&old_paths)).unwrap();
        let incumbent = state.incumbent.unwrap();
        assert_eq!(incumbent.origin, IncumbentOrigin::Override);
        assert_eq!(incumbent.config, config(0.1, 1.0));
        assert_eq!(incumbent.cost, 49.0);
    }

    #[test]
    fn override_absent_from_ledger_fails() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);
        let run_config = RunConfig::new(dir.path().join("next"))
            .with_restore_incumbent(json!({"x1": 9.0, "x2": 9.0}).as_object().cloned().unwrap());

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, run_config).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(
            err,
            WpError::Reconciliation(ReconciliationError::IncumbentNotInLedger { .. })
        ));
        assert_eq!(coordinator.phase(), RestorePhase::Failed);
    }

    #[test]
    fn unresolvable_override_fails() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);
        let run_config = RunConfig::new(dir.path().join("next")).with_restore_incumbent(
            json!({"x1": 0.1, "x2": 1.0, "x3": 4.0}).as_object().cloned().unwrap(),
        );

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, run_config).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        match err {
            WpError::Reconciliation(ReconciliationError::UnresolvableIncumbent(e)) => {
                assert_eq!(
                    e,
                    ResolutionError::UnknownParameter {
                        parameter: "x3".into()
                    }
                )
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn drifted_search_space_is_rejected_not_substituted() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);

        // x2 no longer exists in the current space.
        let drifted = SearchSpace::new().add_float("x1", -5.0, 10.0);
        let mut coordinator = RestoreCoordinator::new(&drifted, RunConfig::new(dir.path())).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(err, WpError::Resolution(_)));
        assert_eq!(coordinator.phase(), RestorePhase::Failed);
        assert!(coordinator.failure().is_some());
    }

    #[test]
    fn trajectory_ahead_of_ledger_is_detected() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);

        // Simulate a torn checkpoint: the trajectory names an incumbent the
        // ledger never received.
        let mut trajectory = TrajectoryRecorder::from_entries(
            TrajectoryRecorder::load_file(&old_paths.trajectory, &space()).unwrap(),
        );
        trajectory.append_if_improved(TrajectoryEntry {
            evaluations: 6,
            wallclock_secs: 0.0,
            eval_time_secs: 0.0,
            incumbent: config(7.0, 7.0),
            incumbent_id: crate::ledger::ConfigId(6),
            cost: 1.0,
            recorded_at: Utc::now(),
        });
        trajectory.flush_to(&old_paths.trajectory).unwrap();

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, RunConfig::new(dir.path())).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(
            err,
            WpError::Reconciliation(ReconciliationError::IncumbentNotInLedger { .. })
        ));
    }

    #[test]
    fn torn_trajectory_is_rejected_even_with_an_override() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);
        let mut trajectory = TrajectoryRecorder::from_entries(
            TrajectoryRecorder::load_file(&old_paths.trajectory, &space()).unwrap(),
        );
        trajectory.append_if_improved(TrajectoryEntry {
            evaluations: 6,
            wallclock_secs: 0.0,
            eval_time_secs: 0.0,
            incumbent: config(9.0, 9.0),
            incumbent_id: crate::ledger::ConfigId(6),
            cost: 0.5,
            recorded_at: Utc::now(),
        });
        trajectory.flush_to(&old_paths.trajectory).unwrap();

        // The override itself is valid and present in the ledger.
        let run_config = RunConfig::new(dir.path().join("next"))
            .with_restore_incumbent(config(0.1, 1.0).to_value_map());
        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, run_config).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        match err {
            WpError::Reconciliation(ReconciliationError::IncumbentNotInLedger { config, origin }) => {
                assert_eq!(config, self::config(9.0, 9.0).to_string());
                assert_eq!(origin, "trajectory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(coordinator.phase(), RestorePhase::Failed);
    }

    #[test]
    fn trajectory_config_id_must_match_ledger() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 5);
        let mut entries = TrajectoryRecorder::load_file(&old_paths.trajectory, &space()).unwrap();
        entries[4].incumbent_id = crate::ledger::ConfigId(1);
        TrajectoryRecorder::from_entries(entries)
            .flush_to(&old_paths.trajectory)
            .unwrap();

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, RunConfig::new(dir.path().join("next"))).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(
            err,
            WpError::Reconciliation(ReconciliationError::IncumbentIdMismatch {
                index: 4,
                recorded: 1,
                ledger: 5,
                ..
            })
        ));
    }

    #[test]
    fn restoring_onto_the_source_location_is_flagged() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 3);
        let space = space();

        let mut in_place = RestoreCoordinator::new(&space, RunConfig::new(dir.path())).unwrap();
        let state = in_place.restore(Some(&old_paths)).unwrap();
        assert!(state.writes_over_source());

        let moved = RunConfig::new(dir.path()).with_run_id(RunId(2));
        let mut elsewhere = RestoreCoordinator::new(&space, moved).unwrap();
        let state = elsewhere.restore(Some(&old_paths)).unwrap();
        assert!(!state.writes_over_source());

        let fresh = RestoreCoordinator::new(&space, RunConfig::new(dir.path()))
            .unwrap()
            .restore(None)
            .unwrap();
        assert!(!fresh.writes_over_source());
    }

    #[test]
    fn non_monotonic_trajectory_is_rejected() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 3);
        let raw = std::fs::read_to_string(&old_paths.trajectory).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        // Swap the first two lines so the cost goes up.
        let reordered = format!("{}\n{}\n{}\n", lines[1], lines[0], lines[2]);
        std::fs::write(&old_paths.trajectory, reordered).unwrap();

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, RunConfig::new(dir.path())).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(
            err,
            WpError::Reconciliation(ReconciliationError::NonMonotonicTrajectory { index: 1, .. })
        ));
    }

    #[test]
    fn missing_incumbent_with_history_is_rejected() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 3);
        std::fs::write(&old_paths.trajectory, "").unwrap();

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, RunConfig::new(dir.path())).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(
            err,
            WpError::Reconciliation(ReconciliationError::MissingIncumbent { records: 3 })
        ));
    }

    #[test]
    fn lagging_counters_are_lifted_to_the_ledger() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 6);
        let stale = BudgetTracker::with_counters(
            BudgetCounters {
                evaluations: 4,
                ..BudgetCounters::default()
            },
            BudgetLimits::default(),
        );
        stale.save(&old_paths.budget, uuid::Uuid::new_v4()).unwrap();

        let space = space();
        let mut coordinator =
            RestoreCoordinator::new(&space, RunConfig::new(dir.path()).with_max_evaluations(6)).unwrap();
        let state = coordinator.restore(Some(&old_paths)).unwrap();
        assert_eq!(state.budget.counters().evaluations, 6);
        assert_eq!(state.budget.counters().configs_seen, 6);
        assert!(state.budget.exhausted());
    }

    #[test]
    fn failed_restore_leaves_artifacts_untouched_and_is_terminal() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 4);
        let before: Vec<Vec<u8>> = [&old_paths.ledger, &old_paths.budget, &old_paths.trajectory]
            .iter()
            .map(|p| std::fs::read(p).unwrap())
            .collect();
        std::fs::write(&old_paths.budget, "{ truncated").unwrap();

        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, RunConfig::new(dir.path())).unwrap();
        let err = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(err, WpError::Parse(_)));

        assert_eq!(std::fs::read(&old_paths.ledger).unwrap(), before[0]);
        assert_eq!(std::fs::read(&old_paths.trajectory).unwrap(), before[2]);

        let again = coordinator.restore(Some(&old_paths)).unwrap_err();
        assert!(matches!(
            again,
            WpError::Restore(RestoreError::AlreadyFailed { .. })
        ));
    }

    #[test]
    fn coordinator_hands_out_state_once() {
        let space = space();
        let mut coordinator = RestoreCoordinator::new(&space, RunConfig::new("out")).unwrap();
        coordinator.restore(None).unwrap();
        let err = coordinator.restore(None).unwrap_err();
        assert!(matches!(err, WpError::Restore(RestoreError::AlreadyRestored)));
    }

    #[test]
    fn override_without_history_fails() {
        let space = space();
        let run_config =
            RunConfig::new("out").with_restore_incumbent(config(1.0, 1.0).to_value_map());
        let mut coordinator = RestoreCoordinator::new(&space, run_config).unwrap();
        assert!(coordinator.restore(None).is_err());
        assert_eq!(coordinator.phase(), RestorePhase::Failed);
    }

    #[test]
    fn duplicate_policy_carries_into_restored_ledger() {
        let dir = tempdir().unwrap();
        let old_paths = persist_run(dir.path(), 2);
        let space = space();
        let run_config = RunConfig::new(dir.path()).with_duplicate_policy(DuplicatePolicy::Overwrite);
        let mut coordinator = RestoreCoordinator::new(&space, run_config).unwrap();
        let state = coordinator.restore_from_dir(old_paths.ledger.parent().unwrap()).unwrap();
        assert_eq!(state.ledger.policy(), DuplicatePolicy::Overwrite);
    }
}
