use std::collections::HashSet;

use aem_types::{ConfigMode, Invocation};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::store::ConfigStore;

/// What one [`clear_cache`] pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub expired_invocations: usize,
    pub duplicate_invocations: usize,
    pub dropped_configs: usize,
}

impl ClearReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Garbage-collect invocations and configurations.
///
/// In order:
/// 1. Drop invocations whose governing configuration's cutoff has elapsed
///    since their last conversion (see [`Invocation::is_out_of_window`]).
/// 2. Among bound invocations, keep only the first per
///    `(campaign_id, mode, config_id)`; list order is creation order, so the
///    earliest wins.
/// 3. Per mode, keep the newest configuration plus every configuration a
///    surviving invocation resolves to.
///
/// Deterministic for a given `now`. Cost is O(invocations × configurations
/// per mode).
pub fn clear_cache(
    invocations: &mut Vec<Invocation>,
    store: &mut ConfigStore,
    now: DateTime<Utc>,
) -> ClearReport {
    let mut report = ClearReport::default();

    let before = invocations.len();
    invocations.retain(|invocation| {
        !invocation.is_out_of_window(store.configs(invocation.config_mode()), now)
    });
    report.expired_invocations = before - invocations.len();

    let mut seen: HashSet<(String, ConfigMode, i64)> = HashSet::new();
    let before = invocations.len();
    invocations.retain(|invocation| {
        !invocation.is_bound()
            || seen.insert((
                invocation.campaign_id().to_string(),
                invocation.config_mode(),
                invocation.config_id(),
            ))
    });
    report.duplicate_invocations = before - invocations.len();

    let referenced: HashSet<(ConfigMode, i64)> = invocations
        .iter()
        .filter_map(|invocation| {
            let mode = invocation.config_mode();
            invocation
                .find_config(store.configs(mode))
                .map(|config| (mode, config.valid_from))
        })
        .collect();
    report.dropped_configs = store.retain_referenced(&referenced);

    if !report.is_noop() {
        debug!(
            expired = report.expired_invocations,
            duplicates = report.duplicate_invocations,
            dropped_configs = report.dropped_configs,
            "cleared attribution cache"
        );
    }
    report
}
