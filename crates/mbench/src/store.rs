//! Running per-function statistics and their persisted form.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::output::{SummaryJson, SummaryRow};
use crate::sampler::Deltas;
use crate::table;

/// Cumulative counters for one call-site.
///
/// Only sums are stored; averages are derived on demand by [`averages`](Self::averages).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateProfile {
    pub name: String,
    pub calls: u64,
    /// Seconds.
    pub total_time: f64,
    /// Seconds.
    pub total_cpu: f64,
    pub total_memory: i64,
    pub total_gpu: i64,
    pub total_io: i64,
    /// Free text owned by the user. Never touched by measurements.
    pub notes: String,
}

/// Per-call averages of an [`AggregateProfile`].
///
/// All zero when no call was recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Averages {
    pub time: f64,
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
    pub io: f64,
}

impl AggregateProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, deltas: &Deltas) {
        self.calls += 1;
        self.total_time += deltas.elapsed_secs();
        self.total_cpu += deltas.cpu;
        self.total_memory += deltas.memory;
        self.total_gpu += deltas.gpu;
        self.total_io += deltas.io;
    }

    pub fn averages(&self) -> Averages {
        if self.calls == 0 {
            return Averages::default();
        }
        let calls = self.calls as f64;
        Averages {
            time: self.total_time / calls,
            cpu: self.total_cpu / calls,
            memory: self.total_memory as f64 / calls,
            gpu: self.total_gpu as f64 / calls,
            io: self.total_io as f64 / calls,
        }
    }
}

/// A profile paired with its derived averages.
#[derive(Debug, Clone, Copy)]
pub struct SummaryEntry<'a> {
    pub profile: &'a AggregateProfile,
    pub averages: Averages,
}

/// Mapping from function name to its running aggregate.
///
/// Keeps insertion order so summaries list functions in the order they were
/// first observed (or loaded).
#[derive(Debug, Default, Clone)]
pub struct AggregateStore {
    profiles: Vec<AggregateProfile>,
    index: HashMap<String, usize>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one observation into the aggregate for `name`, creating it if needed.
    pub fn update(&mut self, name: &str, deltas: &Deltas) -> &AggregateProfile {
        let idx = match self.index.get(name).copied() {
            Some(idx) => idx,
            None => self.insert(AggregateProfile::new(name)),
        };
        let profile = &mut self.profiles[idx];
        profile.record(deltas);
        profile
    }

    pub fn get(&self, name: &str) -> Option<&AggregateProfile> {
        self.index.get(name).map(|&idx| &self.profiles[idx])
    }

    pub fn remove(&mut self, name: &str) -> Option<AggregateProfile> {
        let idx = self.index.remove(name)?;
        let removed = self.profiles.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Sets the notes of an existing aggregate. Returns `false` for unknown names.
    pub fn set_notes(&mut self, name: &str, notes: impl Into<String>) -> bool {
        match self.index.get(name) {
            Some(&idx) => {
                self.profiles[idx].notes = notes.into();
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregateProfile> + Clone + '_ {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
        self.index.clear();
    }

    /// Lazily pairs every aggregate with its averages, in insertion order.
    ///
    /// Each call starts from the current state of the store.
    pub fn summary(&self) -> impl Iterator<Item = SummaryEntry<'_>> + Clone + '_ {
        self.profiles.iter().map(|profile| SummaryEntry {
            profile,
            averages: profile.averages(),
        })
    }

    pub fn summary_json(&self) -> SummaryJson {
        SummaryJson {
            rows: self
                .summary()
                .map(|entry| SummaryRow::new(entry.profile, &entry.averages))
                .collect(),
        }
    }

    /// Replaces all aggregates with the rows of the table at `path`.
    ///
    /// A missing file yields an empty store. Malformed rows are skipped.
    pub fn load(&mut self, path: &Path) -> Result<usize> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("[mbench] no profile table at {}", path.display());
                self.clear();
                return Ok(0);
            }
            Err(source) => {
                return Err(Error::Load {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let profiles = table::read_table(BufReader::new(file), path)?;
        self.clear();
        for profile in profiles {
            self.upsert(profile);
        }
        tracing::debug!(
            "[mbench] loaded {} profiles from {}",
            self.len(),
            path.display()
        );
        Ok(self.len())
    }

    /// Creates a store seeded from `path`, see [`load`](Self::load).
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut store = Self::new();
        store.load(path)?;
        Ok(store)
    }

    /// Writes the header and one row per aggregate to `path`, replacing it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let persist_err = |source| Error::Persist {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(persist_err)?;
        let mut writer = BufWriter::new(file);
        table::write_table(&mut writer, self.iter()).map_err(persist_err)?;
        writer.flush().map_err(persist_err)?;

        tracing::debug!(
            "[mbench] saved {} profiles to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }

    fn insert(&mut self, profile: AggregateProfile) -> usize {
        let idx = self.profiles.len();
        self.index.insert(profile.name.clone(), idx);
        self.profiles.push(profile);
        idx
    }

    fn upsert(&mut self, profile: AggregateProfile) {
        match self.index.get(&profile.name) {
            Some(&idx) => self.profiles[idx] = profile,
            None => {
                self.insert(profile);
            }
        }
    }
}
