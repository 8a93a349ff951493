use std::collections::{BTreeMap, HashSet};

use aem_types::{ConfigMode, Configuration};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::invariants::validate_store;
use crate::persistence::SnapshotFile;
use crate::error::StoreError;

/// Outcome counts of one [`ConfigStore::add_configurations`] batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddReport {
    pub added: usize,
    /// Entries whose `valid_from` was already present in their mode.
    pub duplicates: usize,
    /// Entries dropped at the parse boundary.
    pub rejected: usize,
}

/// Configurations grouped by mode.
///
/// Each mode's list is ascending by `valid_from` with no repeated
/// `valid_from`, and every entry sits under its own `config_mode`.
/// All mutation goes through [`ConfigStore::insert`] so the invariant holds
/// by construction; [`validate_store`] checks it for loaded snapshots.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigStore {
    configs: BTreeMap<ConfigMode, Vec<Configuration>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of raw configuration entries.
    ///
    /// Invalid entries are dropped individually and the rest still load.
    pub fn add_configurations<'a, I>(&mut self, batch: I) -> AddReport
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut report = AddReport::default();
        for raw in batch {
            match Configuration::from_json(raw) {
                Ok(config) => {
                    if self.insert(config) {
                        report.added += 1;
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(error) => {
                    warn!(%error, "dropping invalid configuration entry");
                    report.rejected += 1;
                }
            }
        }
        debug!(
            added = report.added,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "merged configuration batch"
        );
        report
    }

    /// Insert in `valid_from` order. Returns `false` (and leaves the store
    /// unchanged) if the mode already holds that `valid_from`.
    pub fn insert(&mut self, config: Configuration) -> bool {
        let list = self.configs.entry(config.config_mode).or_default();
        match list.binary_search_by_key(&config.valid_from, |existing| existing.valid_from) {
            Ok(_) => false,
            Err(position) => {
                list.insert(position, config);
                true
            }
        }
    }

    /// The mode's configurations, ascending by `valid_from`.
    pub fn configs(&self, mode: ConfigMode) -> &[Configuration] {
        self.configs.get(&mode).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConfigMode, &[Configuration])> {
        self.configs
            .iter()
            .map(|(mode, configs)| (*mode, configs.as_slice()))
    }

    /// Number of modes with an entry.
    pub fn mode_count(&self) -> usize {
        self.configs.len()
    }

    /// Total number of configurations across modes.
    pub fn len(&self) -> usize {
        self.configs.values().map(Vec::len).sum()
    }

    /// True when no mode holds a configuration.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep, per mode, the newest configuration plus every configuration
    /// whose `(mode, valid_from)` is in `referenced`. Returns how many were
    /// dropped.
    pub fn retain_referenced(&mut self, referenced: &HashSet<(ConfigMode, i64)>) -> usize {
        let mut dropped = 0;
        for (mode, list) in self.configs.iter_mut() {
            let Some(newest) = list.last().map(|config| config.valid_from) else {
                continue;
            };
            let before = list.len();
            list.retain(|config| {
                config.valid_from == newest || referenced.contains(&(*mode, config.valid_from))
            });
            dropped += before - list.len();
        }
        self.configs.retain(|_, list| !list.is_empty());
        dropped
    }

    /// Restore from a snapshot, repairing a store that breaks the ordering
    /// invariants. A missing or unreadable snapshot yields an empty store.
    pub fn load_from(file: &SnapshotFile) -> Self {
        let store: Self = file.load();
        let violations = validate_store(&store);
        if violations.is_empty() {
            return store;
        }
        for violation in &violations {
            warn!(path = %file.path().display(), %violation, "repairing configuration snapshot");
        }
        store.configs.into_values().flatten().collect()
    }

    pub fn save_to(&self, file: &SnapshotFile) -> Result<(), StoreError> {
        file.save(self)
    }
}

impl FromIterator<Configuration> for ConfigStore {
    fn from_iter<T: IntoIterator<Item = Configuration>>(iter: T) -> Self {
        let mut store = Self::new();
        for config in iter {
            store.insert(config);
        }
        store
    }
}
