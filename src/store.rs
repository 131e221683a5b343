//! Append-only experiment records: a configuration snapshot when a run starts, one summary per
//! generation, and a closing record. Stores are best effort; the orchestrator retries a failed
//! append with [Backoff], then logs it and carries on.

use crate::{
    config::{Config, PersistenceConfig},
    error::{Error, Result},
    genome::Genome,
};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation: usize,
    /// best performance score of the generation
    pub best_fitness: f64,
    /// mean combined fitness
    pub mean_fitness: f64,
    pub species_count: usize,
    pub failures: usize,
    pub archive_size: usize,
    pub best_genome: Genome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum ExperimentRecord {
    Start {
        started_at: DateTime<Utc>,
        config: Config,
    },
    Generation(GenerationSummary),
    Finish {
        finished_at: DateTime<Utc>,
        generations: usize,
        best_fitness: f64,
        reason: String,
    },
}

pub trait ExperimentStore {
    fn append(&mut self, record: &ExperimentRecord) -> Result<()>;
}

impl<S: ExperimentStore + ?Sized> ExperimentStore for Box<S> {
    fn append(&mut self, record: &ExperimentRecord) -> Result<()> {
        (**self).append(record)
    }
}

/// One JSON document per line, appended to a file
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file at `path`, in append order
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<ExperimentRecord>> {
        fs::read_to_string(path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

impl ExperimentStore for JsonlStore {
    fn append(&mut self, record: &ExperimentRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|e| Error::Persistence(format!("{}: {e}", self.path.display())))
    }
}

/// Keeps records in memory. Clones share the same records, so a handle kept outside a run
/// sees what the run wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<ExperimentRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExperimentRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl ExperimentStore for MemoryStore {
    fn append(&mut self, record: &ExperimentRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::Persistence("memory store poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}

/// Up to `max_retries` more attempts after a failure, doubling the wait from `initial` after
/// every one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub initial: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32, initial: Duration) -> Self {
        Self {
            max_retries,
            initial,
        }
    }

    /// Run `op` until it succeeds or the retries run out. `what` names the operation in logs.
    pub fn retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut wait = self.initial;
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{what} failed ({e}), retry {attempt}/{} in {wait:?}",
                        self.max_retries
                    );
                    thread::sleep(wait);
                    wait = wait.saturating_mul(2);
                }
                Err(e) => {
                    return Err(Error::Persistence(format!(
                        "{what}: giving up after {} attempts: {e}",
                        attempt + 1
                    )))
                }
            }
        }
    }
}

impl From<&PersistenceConfig> for Backoff {
    fn from(config: &PersistenceConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.backoff_ms))
    }
}

/// Retries failed appends to `inner` under a [Backoff]
#[derive(Debug, Clone)]
pub struct RetryingStore<S: ExperimentStore> {
    inner: S,
    backoff: Backoff,
}

impl<S: ExperimentStore> RetryingStore<S> {
    pub fn new(inner: S, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ExperimentStore> ExperimentStore for RetryingStore<S> {
    fn append(&mut self, record: &ExperimentRecord) -> Result<()> {
        let inner = &mut self.inner;
        self.backoff.retry("append", || inner.append(record))
    }
}
