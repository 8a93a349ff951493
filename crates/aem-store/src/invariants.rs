//! Batch invariant checking for the configuration store.
//!
//! [`ConfigStore::insert`](crate::ConfigStore::insert) upholds these by
//! construction, so a violation means the store came from a snapshot the
//! current build did not write. The check collects every violation in one
//! pass rather than stopping at the first.

use aem_types::ConfigMode;
use aem_types::Configuration;

use crate::error::StoreViolation;
use crate::store::ConfigStore;

/// Check every mode list, returning all violations found.
pub fn validate_store(store: &ConfigStore) -> Vec<StoreViolation> {
    let mut violations = Vec::new();
    for (mode, configs) in store.iter() {
        check_mode(mode, configs, &mut violations);
    }
    violations
}

fn check_mode(mode: ConfigMode, configs: &[Configuration], violations: &mut Vec<StoreViolation>) {
    if configs.is_empty() {
        violations.push(StoreViolation::EmptyMode { mode });
        return;
    }
    for (index, config) in configs.iter().enumerate() {
        if config.config_mode != mode {
            violations.push(StoreViolation::ModeMismatch {
                key: mode,
                config_mode: config.config_mode,
                valid_from: config.valid_from,
            });
        }
        let Some(previous) = index.checked_sub(1).map(|i| configs[i].valid_from) else {
            continue;
        };
        if config.valid_from == previous {
            violations.push(StoreViolation::DuplicateValidFrom {
                mode,
                valid_from: previous,
            });
        } else if config.valid_from < previous {
            violations.push(StoreViolation::OutOfOrder {
                mode,
                index,
                previous,
                actual: config.valid_from,
            });
        }
    }
}
