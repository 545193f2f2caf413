//! Sampling strategies that propose configurations to evaluate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use wp_types::{Configuration, ParameterKind, ParameterValue, SearchSpace};

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Next configuration to evaluate, or `None` once the strategy has
    /// nothing left to propose.
    fn suggest(&mut self) -> Option<Configuration>;

    /// Report a finished evaluation so adaptive strategies can learn.
    fn report(&mut self, _config: &Configuration, _cost: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Configuration>,
}

impl GridSearch {
    /// `float_steps` is the number of points per continuous dimension.
    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(space, float_steps),
        }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<Configuration> {
        let steps = float_steps.max(2);
        // Endpoints are exact and interior points never round past them.
        let spread = |low: f64, high: f64| -> Vec<f64> {
            (0..steps)
                .map(|i| match i {
                    0 => low,
                    i if i == steps - 1 => high,
                    i => (low + (i as f64 / (steps - 1) as f64) * (high - low)).clamp(low, high),
                })
                .collect()
        };

        let mut combos: Vec<BTreeMap<String, ParameterValue>> = vec![BTreeMap::new()];
        for param in &space.parameters {
            let axis: Vec<ParameterValue> = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    spread(*low, *high).into_iter().map(ParameterValue::Float).collect()
                }
                ParameterKind::IntRange { low, high } => {
                    (*low..=*high).map(ParameterValue::Int).collect()
                }
                ParameterKind::LogUniform { low, high } => spread(low.ln(), high.ln())
                    .into_iter()
                    .map(|v| ParameterValue::Float(v.exp().clamp(*low, *high)))
                    .collect(),
                ParameterKind::Choice { values } => {
                    values.iter().cloned().map(ParameterValue::Json).collect()
                }
            };

            // Cartesian product
            let mut next = Vec::with_capacity(combos.len() * axis.len());
            for existing in &combos {
                for value in &axis {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            combos = next;
        }

        combos.into_iter().map(Configuration::new).collect()
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self) -> Option<Configuration> {
        let next = self.combos.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn sample_one(&mut self) -> Option<Configuration> {
        let mut values = BTreeMap::new();
        for param in &self.space.parameters {
            let value = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    ParameterValue::Float(self.rng.random_range(*low..=*high))
                }
                ParameterKind::IntRange { low, high } => {
                    ParameterValue::Int(self.rng.random_range(*low..=*high))
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_val: f64 = self.rng.random_range(low.ln()..=high.ln());
                    ParameterValue::Float(log_val.exp().clamp(*low, *high))
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return None;
                    }
                    let idx = self.rng.random_range(0..values.len());
                    ParameterValue::Json(values[idx].clone())
                }
            };
            values.insert(param.name.clone(), value);
        }
        Some(Configuration::new(values))
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self) -> Option<Configuration> {
        self.sample_one()
    }

    fn name(&self) -> &str {
        "random"
    }
}
