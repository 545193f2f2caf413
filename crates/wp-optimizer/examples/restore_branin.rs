//! Optimize the Branin function with a 25-evaluation budget, then restore the
//! exhausted run with a 50-evaluation budget into a new output location and
//! continue it.
//!
//! ```text
//! cargo run -p wp-optimizer --example restore_branin -- [output-base]
//! ```

use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wp_optimizer::{FnEvaluator, Optimizer, RandomSearch};
use wp_state::{
    AsyncCheckpointer, RestoreCoordinator, RunConfig, RunConfigOverrides, SyncCheckpointer,
};
use wp_types::{Configuration, ExecutionError, ParameterValue, SearchSpace};

fn branin(config: &Configuration) -> Result<f64, ExecutionError> {
    let coord = |name: &str| match config.get(name) {
        Some(ParameterValue::Float(v)) => Ok(*v),
        other => Err(ExecutionError::Crashed {
            message: format!("{name} is not a float: {other:?}"),
        }),
    };
    let (x1, x2) = (coord("x1")?, coord("x2")?);

    let b = 5.1 / (4.0 * PI * PI);
    let c = 5.0 / PI;
    let t = 1.0 / (8.0 * PI);
    Ok((x2 - b * x1 * x1 + c * x1 - 6.0).powi(2) + 10.0 * (1.0 - t) * x1.cos() + 10.0)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let base = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("waypoint-branin"));
    let space = SearchSpace::new()
        .add_float("x1", -5.0, 10.0)
        .add_float("x2", 0.0, 15.0);

    // First run: exhaust a small budget.
    let original = RunConfig::new(base.join("restore_me"))
        .with_max_evaluations(25)
        .with_seed(1);
    let state = RestoreCoordinator::new(&space, original.clone())?.restore(None)?;
    let mut first = Optimizer::new(
        state,
        &original,
        Box::new(RandomSearch::new(space.clone(), original.seed)),
        Box::new(FnEvaluator::new(branin)),
        Box::new(SyncCheckpointer::new()),
    );
    let exhausted = first.run().context("first run failed")?;
    info!(
        "First run used {} evaluations; artifacts in {}",
        exhausted.evaluations,
        exhausted.output.ledger.display()
    );

    // Re-create the run with a larger budget and a new output location.
    let extended = RunConfigOverrides {
        output_dir: Some(base.join("restored")),
        max_evaluations: Some(50),
        ..RunConfigOverrides::default()
    }
    .apply(&original)?
    .with_seed(2);

    let mut coordinator = RestoreCoordinator::new(&space, extended.clone())?;
    let state = coordinator
        .restore(Some(&exhausted.output))
        .context("restoring the exhausted run")?;
    info!(
        "Restored {} evaluations, budget exhausted: {}",
        state.ledger.len(),
        state.budget.exhausted()
    );

    let mut second = Optimizer::new(
        state,
        &extended,
        Box::new(RandomSearch::new(space.clone(), extended.seed)),
        Box::new(FnEvaluator::new(branin)),
        Box::new(AsyncCheckpointer::new()),
    );
    let summary = second.run().context("continued run failed")?;

    info!(
        "Continued run used {} evaluations ({} new) and stopped: {:?}",
        summary.evaluations, summary.new_evaluations, summary.stop_reason
    );
    if let Some((config, cost)) = summary.incumbent {
        info!("Best configuration [{}] with cost {:.5}", config, cost);
    }
    Ok(())
}
