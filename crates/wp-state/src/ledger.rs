//! The evaluation ledger: every (configuration, instance, seed) → outcome
//! observed by any run, in insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;
use wp_types::{
    validation_error, ConfigKey, Configuration, ConfigurationResolver, DuplicateError, ParseError,
    RunId, WpResult,
};

use crate::artifacts::{read_artifact, write_atomic};
use crate::config::DuplicatePolicy;

/// Current on-disk version of the ledger document.
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// Stable, 1-based id of a distinct configuration, in first-seen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(pub u32);

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Success,
    Crashed,
    Timeout,
    /// Stopped early by an adaptive cap; the cost is a lower bound.
    Capped,
    Aborted,
}

impl EvaluationStatus {
    /// Whether this outcome counts against the failure budget.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Crashed | Self::Timeout | Self::Aborted)
    }
}

/// One observed outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub config: Configuration,
    pub instance: Option<String>,
    pub seed: u64,
    pub cost: f64,
    pub status: EvaluationStatus,
    /// Seconds the evaluation took.
    pub time: f64,
    pub memory_mb: Option<f64>,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub additional_info: Value,
}

impl EvaluationRecord {
    pub fn new(config: Configuration, cost: f64, status: EvaluationStatus, run_id: RunId) -> Self {
        let now = Utc::now();
        Self {
            config,
            instance: None,
            seed: 0,
            cost,
            status,
            time: 0.0,
            memory_mb: None,
            run_id,
            started_at: now,
            finished_at: now,
            additional_info: Value::Null,
        }
    }

    pub fn with_instance(mut self, instance: Option<String>, seed: u64) -> Self {
        self.instance = instance;
        self.seed = seed;
        self
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RunKey {
    config: ConfigId,
    instance: Option<String>,
    seed: u64,
    run_id: RunId,
}

/// Insertion-ordered evaluation records plus derived indices.
#[derive(Debug, Clone)]
pub struct Ledger {
    policy: DuplicatePolicy,
    records: Vec<EvaluationRecord>,
    configs: Vec<Configuration>,
    config_ids: HashMap<ConfigKey, ConfigId>,
    by_config: HashMap<ConfigId, Vec<usize>>,
    by_run_key: HashMap<RunKey, usize>,
    runs_recorded: u64,
}

impl Ledger {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            records: Vec::new(),
            configs: Vec::new(),
            config_ids: HashMap::new(),
            by_config: HashMap::new(),
            by_run_key: HashMap::new(),
            runs_recorded: 0,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: DuplicatePolicy) {
        self.policy = policy;
    }

    fn intern(&mut self, config: &Configuration) -> ConfigId {
        if let Some(id) = self.config_ids.get(config.key()) {
            return *id;
        }
        let id = ConfigId(self.configs.len() as u32 + 1);
        self.configs.push(config.clone());
        self.config_ids.insert(config.key().clone(), id);
        id
    }

    /// Append an evaluation.
    ///
    /// A record with the same (configuration, instance, seed, run) as an
    /// existing one is rejected with [`WpError::Duplicate`] under
    /// [`DuplicatePolicy::Reject`] and replaces the existing record in place
    /// under [`DuplicatePolicy::Overwrite`]. Non-finite cost, time or memory
    /// is a [`WpError::Validation`]; the ledger is unchanged either way.
    pub fn record(&mut self, record: EvaluationRecord) -> WpResult<()> {
        Self::check_finite(&record)?;
        if let Some(id) = self.config_ids.get(record.config.key()).copied() {
            let key = RunKey {
                config: id,
                instance: record.instance.clone(),
                seed: record.seed,
                run_id: record.run_id,
            };
            if let Some(&pos) = self.by_run_key.get(&key) {
                match self.policy {
                    DuplicatePolicy::Reject => {
                        return Err(DuplicateError {
                            config: record.config.key().to_string(),
                            instance: record.instance,
                            seed: record.seed,
                            run_id: record.run_id,
                        }
                        .into());
                    }
                    DuplicatePolicy::Overwrite => {
                        debug!("Overwriting evaluation of config {} at position {}", id, pos);
                        // Same config and key: position-based indices stay valid.
                        self.records[pos] = record;
                        self.runs_recorded += 1;
                        return Ok(());
                    }
                }
            }
        }

        let id = self.intern(&record.config);
        let pos = self.records.len();
        self.by_run_key.insert(
            RunKey {
                config: id,
                instance: record.instance.clone(),
                seed: record.seed,
                run_id: record.run_id,
            },
            pos,
        );
        self.by_config.entry(id).or_default().push(pos);
        self.records.push(record);
        self.runs_recorded += 1;
        Ok(())
    }

    fn check_finite(record: &EvaluationRecord) -> WpResult<()> {
        let memory = record.memory_mb.unwrap_or(0.0);
        for (field, value) in [("cost", record.cost), ("time", record.time), ("memory_mb", memory)] {
            if !value.is_finite() {
                return Err(validation_error!(
                    "{} of [{}] must be finite, got {}",
                    field,
                    record.config,
                    value
                ));
            }
        }
        Ok(())
    }

    /// All records of `config` in insertion order. Empty if unseen.
    pub fn query<'a>(
        &'a self,
        config: &Configuration,
    ) -> impl Iterator<Item = &'a EvaluationRecord> + Clone + 'a {
        let positions = self
            .config_ids
            .get(config.key())
            .and_then(|id| self.by_config.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        positions.iter().map(move |&pos| &self.records[pos])
    }

    pub fn contains(&self, config: &Configuration) -> bool {
        self.config_ids.contains_key(config.key())
    }

    pub fn config_id(&self, config: &Configuration) -> Option<ConfigId> {
        self.config_ids.get(config.key()).copied()
    }

    pub fn configuration(&self, id: ConfigId) -> Option<&Configuration> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|idx| self.configs.get(idx))
    }

    /// Distinct configurations in first-seen order.
    pub fn configurations(&self) -> &[Configuration] {
        &self.configs
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvaluationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Accepted `record` calls, overwrites included.
    pub fn runs_recorded(&self) -> u64 {
        self.runs_recorded
    }

    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Mean cost over all records of `config`.
    pub fn average_cost(&self, config: &Configuration) -> Option<f64> {
        let (sum, n) = self
            .query(config)
            .fold((0.0, 0usize), |(sum, n), r| (sum + r.cost, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    /// Configuration with the lowest average cost; ties go to the earliest.
    pub fn best(&self) -> Option<(&Configuration, f64)> {
        let mut best: Option<(&Configuration, f64)> = None;
        for config in &self.configs {
            if let Some(cost) = self.average_cost(config) {
                if best.map_or(true, |(_, b)| cost < b) {
                    best = Some((config, cost));
                }
            }
        }
        best
    }

    pub fn to_document(&self, session_id: Uuid) -> LedgerDocument {
        let configs = self
            .configs
            .iter()
            .enumerate()
            .map(|(idx, config)| (idx as u32 + 1, config.to_value_map()))
            .collect();
        let data = self
            .records
            .iter()
            .map(|r| RecordEntry {
                config_id: self.config_ids[r.config.key()],
                instance: r.instance.clone(),
                seed: r.seed,
                cost: r.cost,
                status: r.status,
                time: r.time,
                memory_mb: r.memory_mb,
                run_id: r.run_id,
                started_at: r.started_at,
                finished_at: r.finished_at,
                additional_info: r.additional_info.clone(),
            })
            .collect();

        LedgerDocument {
            format_version: LEDGER_FORMAT_VERSION,
            session_id: Some(session_id),
            saved_at: Utc::now(),
            runs_recorded: self.runs_recorded,
            configs,
            data,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>, session_id: Uuid) -> WpResult<()> {
        let json = serde_json::to_vec_pretty(&self.to_document(session_id))?;
        write_atomic(path.as_ref(), &json)?;
        debug!("Saved ledger with {} records to {}", self.len(), path.as_ref().display());
        Ok(())
    }

    /// Rebuild a ledger from its persisted form, resolving every
    /// configuration against the current search space.
    pub fn load<R>(raw: &str, artifact: &str, resolver: &R, policy: DuplicatePolicy) -> WpResult<Self>
    where
        R: ConfigurationResolver + ?Sized,
    {
        let inconsistent = |message: String| ParseError::Inconsistent {
            artifact: artifact.to_string(),
            message,
        };

        let doc: LedgerDocument = serde_json::from_str(raw).map_err(|e| ParseError::Malformed {
            artifact: artifact.to_string(),
            message: e.to_string(),
        })?;
        if doc.format_version > LEDGER_FORMAT_VERSION {
            return Err(ParseError::UnsupportedVersion {
                artifact: artifact.to_string(),
                found: doc.format_version,
                supported: LEDGER_FORMAT_VERSION,
            }
            .into());
        }

        // Rebuild with Reject so a corrupt document cannot hide duplicates.
        let mut ledger = Ledger::new(DuplicatePolicy::Reject);
        for (expected, (id, values)) in (1u32..).zip(&doc.configs) {
            if *id != expected {
                return Err(inconsistent(format!(
                    "config ids must be contiguous from 1, found {id} at position {expected}"
                ))
                .into());
            }
            let config = resolver
                .resolve(values)
                .map_err(|e| e.in_context(format!("{artifact}: config {id}")))?;
            if ledger.contains(&config) {
                return Err(inconsistent(format!("config {id} duplicates [{config}]")).into());
            }
            ledger.intern(&config);
        }

        for (idx, entry) in doc.data.into_iter().enumerate() {
            let config = ledger
                .configuration(entry.config_id)
                .cloned()
                .ok_or_else(|| {
                    inconsistent(format!(
                        "record {idx} references unknown config {}",
                        entry.config_id
                    ))
                })?;
            let record = EvaluationRecord {
                config,
                instance: entry.instance,
                seed: entry.seed,
                cost: entry.cost,
                status: entry.status,
                time: entry.time,
                memory_mb: entry.memory_mb,
                run_id: entry.run_id,
                started_at: entry.started_at,
                finished_at: entry.finished_at,
                additional_info: entry.additional_info,
            };
            ledger
                .record(record)
                .map_err(|e| inconsistent(format!("record {idx}: {e}")))?;
        }

        if doc.runs_recorded < ledger.len() as u64 {
            return Err(inconsistent(format!(
                "runs_recorded {} is below the {} stored records",
                doc.runs_recorded,
                ledger.len()
            ))
            .into());
        }
        ledger.runs_recorded = doc.runs_recorded;
        ledger.policy = policy;

        info!(
            "Loaded ledger {}: {} records over {} configurations",
            artifact,
            ledger.len(),
            ledger.configs.len()
        );
        Ok(ledger)
    }

    pub fn load_file<R>(path: impl AsRef<Path>, resolver: &R, policy: DuplicatePolicy) -> WpResult<Self>
    where
        R: ConfigurationResolver + ?Sized,
    {
        let (raw, artifact) = read_artifact(path.as_ref())?;
        Self::load(&raw, &artifact, resolver, policy)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

/// Persisted form of a [`Ledger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub format_version: u32,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub saved_at: DateTime<Utc>,
    pub runs_recorded: u64,
    /// Raw parameter values per config id.
    pub configs: BTreeMap<u32, Map<String, Value>>,
    pub data: Vec<RecordEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEntry {
    pub config_id: ConfigId,
    pub instance: Option<String>,
    pub seed: u64,
    pub cost: f64,
    pub status: EvaluationStatus,
    pub time: f64,
    pub memory_mb: Option<f64>,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub additional_info: Value,
}
