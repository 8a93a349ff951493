use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::{Configuration, ConversionValueRule};
use crate::error::DomainError;
use crate::mode::ConfigMode;
use crate::signature::hmac_sha512_hex;

/// Config id of an invocation not yet bound to a configuration.
pub const UNBOUND_CONFIG_ID: i64 = -1;

/// Conversion value and priority before any rule has matched.
pub const NO_CONVERSION: i64 = -1;

/// One attribution attempt created from a deep link.
///
/// The identity fields (`campaign_id`, `acs_token` and the optional ACS and
/// advertiser fields) are fixed at creation. Attribution then mutates the
/// runtime fields: the bound config id, recorded events and values, the
/// current conversion value and its priority, and the aggregation flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    id: Uuid,
    campaign_id: String,
    acs_token: String,
    acs_shared_secret: Option<String>,
    acs_config_id: Option<String>,
    advertiser_id: Option<String>,
    business_id: Option<String>,
    config_id: i64,
    conversion_value: i64,
    priority: i64,
    conversion_timestamp: DateTime<Utc>,
    is_aggregated: bool,
    recorded_events: BTreeSet<String>,
    /// event name -> currency -> accumulated amount
    recorded_values: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Invocation {
    /// Create an unaggregated invocation stamped with the current time.
    ///
    /// Returns `Err(MissingField)` if either required field is empty.
    pub fn new(campaign_id: impl Into<String>, acs_token: impl Into<String>) -> Result<Self, DomainError> {
        let campaign_id = campaign_id.into();
        let acs_token = acs_token.into();
        if campaign_id.is_empty() {
            return Err(DomainError::MissingField { field: "campaign_id" });
        }
        if acs_token.is_empty() {
            return Err(DomainError::MissingField { field: "acs_token" });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            campaign_id,
            acs_token,
            acs_shared_secret: None,
            acs_config_id: None,
            advertiser_id: None,
            business_id: None,
            config_id: UNBOUND_CONFIG_ID,
            conversion_value: NO_CONVERSION,
            priority: NO_CONVERSION,
            conversion_timestamp: Utc::now(),
            is_aggregated: false,
            recorded_events: BTreeSet::new(),
            recorded_values: BTreeMap::new(),
        })
    }

    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.acs_shared_secret = Some(secret.into());
        self
    }

    pub fn with_acs_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.acs_config_id = Some(config_id.into());
        self
    }

    pub fn with_advertiser_id(mut self, advertiser_id: impl Into<String>) -> Self {
        self.advertiser_id = Some(advertiser_id.into());
        self
    }

    pub fn with_business_id(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn acs_token(&self) -> &str {
        &self.acs_token
    }

    pub fn acs_shared_secret(&self) -> Option<&str> {
        self.acs_shared_secret.as_deref()
    }

    pub fn acs_config_id(&self) -> Option<&str> {
        self.acs_config_id.as_deref()
    }

    pub fn advertiser_id(&self) -> Option<&str> {
        self.advertiser_id.as_deref()
    }

    pub fn business_id(&self) -> Option<&str> {
        self.business_id.as_deref()
    }

    pub fn config_id(&self) -> i64 {
        self.config_id
    }

    pub fn is_bound(&self) -> bool {
        self.config_id != UNBOUND_CONFIG_ID
    }

    pub fn conversion_value(&self) -> i64 {
        self.conversion_value
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn conversion_timestamp(&self) -> DateTime<Utc> {
        self.conversion_timestamp
    }

    pub fn is_aggregated(&self) -> bool {
        self.is_aggregated
    }

    pub fn recorded_events(&self) -> &BTreeSet<String> {
        &self.recorded_events
    }

    /// Accumulated amount for `event` in `currency`.
    pub fn recorded_value(&self, event: &str, currency: &str) -> Option<f64> {
        self.recorded_values.get(event)?.get(currency).copied()
    }

    pub fn set_config_id(&mut self, config_id: i64) {
        self.config_id = config_id;
    }

    pub fn set_conversion_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.conversion_timestamp = timestamp;
    }

    pub fn set_aggregated(&mut self, is_aggregated: bool) {
        self.is_aggregated = is_aggregated;
    }

    /// Mode whose configurations govern this invocation.
    pub fn config_mode(&self) -> ConfigMode {
        if self.business_id.is_some() {
            ConfigMode::Brand
        } else {
            ConfigMode::Default
        }
    }

    /// Hour bucket of the last conversion, as reported upstream.
    pub fn consumption_hour(&self) -> i64 {
        self.conversion_timestamp.timestamp().div_euclid(3600)
    }

    /// Look up the configuration this invocation is attributed against.
    ///
    /// A bound invocation resolves to the configuration whose `valid_from`
    /// equals its config id. An unbound one resolves to the newest
    /// configuration already valid at its conversion timestamp.
    ///
    /// `configs` must be the invocation's mode list, ascending by `valid_from`.
    pub fn find_config<'a>(&self, configs: &'a [Configuration]) -> Option<&'a Configuration> {
        if self.is_bound() {
            return configs
                .iter()
                .find(|config| config.valid_from == self.config_id);
        }
        let at = self.conversion_timestamp.timestamp();
        configs.iter().rev().find(|config| config.valid_from <= at)
    }

    /// [`Self::find_config`], binding the config id on first resolution.
    pub fn resolve_config<'a>(&mut self, configs: &'a [Configuration]) -> Option<&'a Configuration> {
        let config = self.find_config(configs)?;
        if !self.is_bound() {
            self.config_id = config.valid_from;
        }
        Some(config)
    }

    /// Record `event` if the resolved configuration counts it.
    ///
    /// `value` accumulates under `currency`, or under the configuration's
    /// default currency when none is given. Returns whether the event was
    /// recorded.
    pub fn attribute_event(
        &mut self,
        event: &str,
        currency: Option<&str>,
        value: Option<f64>,
        configs: &[Configuration],
    ) -> bool {
        let Some(config) = self.resolve_config(configs) else {
            return false;
        };
        if !config.mentions_event(event) {
            return false;
        }

        self.recorded_events.insert(event.to_string());
        if let Some(value) = value {
            let currency = currency
                .filter(|c| !c.is_empty())
                .map(str::to_uppercase)
                .unwrap_or_else(|| config.default_currency.clone());
            *self
                .recorded_values
                .entry(event.to_string())
                .or_default()
                .entry(currency)
                .or_insert(0.0) += value;
        }
        true
    }

    /// Move to the highest-priority rule now satisfied, if it outranks the
    /// current one.
    ///
    /// Rules are scanned in the configuration's order (descending priority,
    /// ties in server order), so the first satisfied rule wins. On a match
    /// the conversion timestamp is reset to `now` and the invocation becomes
    /// eligible for upload again.
    pub fn update_conversion_value(&mut self, configs: &[Configuration], now: DateTime<Utc>) -> bool {
        let Some(config) = self.find_config(configs) else {
            return false;
        };
        let matched = config
            .conversion_value_rules
            .iter()
            .take_while(|rule| rule.priority > self.priority)
            .find(|rule| self.is_rule_matched(rule))
            .map(|rule| (rule.conversion_value, rule.priority));

        match matched {
            Some((conversion_value, priority)) => {
                self.conversion_value = conversion_value;
                self.priority = priority;
                self.conversion_timestamp = now;
                self.is_aggregated = false;
                true
            }
            None => false,
        }
    }

    /// Whether the attribution window of the governing configuration has
    /// elapsed since the last conversion.
    ///
    /// An invocation without a resolvable configuration is kept.
    pub fn is_out_of_window(&self, configs: &[Configuration], now: DateTime<Utc>) -> bool {
        match self.find_config(configs) {
            Some(config) => now - self.conversion_timestamp > config.cutoff(),
            None => false,
        }
    }

    /// Keyed digest sent with uploads, or `None` without a shared secret.
    pub fn upload_signature(&self, delay_flow: &str) -> Option<String> {
        let secret = self.acs_shared_secret.as_deref().filter(|s| !s.is_empty())?;
        let message = format!(
            "{}|{}|{}|{}",
            self.campaign_id,
            self.conversion_value,
            self.consumption_hour(),
            delay_flow
        );
        Some(hmac_sha512_hex(secret.as_bytes(), message.as_bytes()))
    }

    fn is_rule_matched(&self, rule: &ConversionValueRule) -> bool {
        rule.events.iter().all(|event| {
            if !self.recorded_events.contains(&event.event_name) {
                return false;
            }
            match event.values.as_deref() {
                None | Some([]) => true,
                Some(thresholds) => thresholds.iter().any(|threshold| {
                    self.recorded_value(&event.event_name, &threshold.currency.to_uppercase())
                        .is_some_and(|amount| amount >= threshold.amount)
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    const PURCHASE: &str = "fb_mobile_purchase";
    const DONATE: &str = "Donate";

    fn invocation() -> Invocation {
        Invocation::new("test_campaign_1234", "test_token_1234567")
            .unwrap()
            .with_shared_secret("test_shared_secret")
            .with_acs_config_id("test_config_id_123")
            .with_advertiser_id("test_advertiserid_12345")
    }

    fn config(valid_from: i64) -> Configuration {
        Configuration::from_json(&json!({
            "default_currency": "USD",
            "cutoff_time": 1,
            "valid_from": valid_from,
            "config_mode": "DEFAULT",
            "conversion_value_rules": [
                {
                    "conversion_value": 2,
                    "priority": 10,
                    "events": [{ "event_name": PURCHASE }]
                },
                {
                    "conversion_value": 6,
                    "priority": 30,
                    "events": [{
                        "event_name": DONATE,
                        "values": [{ "currency": "usd", "amount": 100.0 }]
                    }]
                },
                {
                    "conversion_value": 4,
                    "priority": 20,
                    "events": [{ "event_name": PURCHASE }, { "event_name": DONATE }]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn new_requires_campaign_and_token() {
        assert_eq!(
            Invocation::new("", "token"),
            Err(DomainError::MissingField { field: "campaign_id" })
        );
        assert_eq!(
            Invocation::new("campaign", ""),
            Err(DomainError::MissingField { field: "acs_token" })
        );

        let inv = invocation();
        assert_eq!(inv.config_id(), UNBOUND_CONFIG_ID);
        assert_eq!(inv.conversion_value(), NO_CONVERSION);
        assert!(!inv.is_aggregated());
        assert_eq!(inv.config_mode(), ConfigMode::Default);
        assert_eq!(inv.with_business_id("biz").config_mode(), ConfigMode::Brand);
    }

    #[test]
    fn unbound_invocation_binds_to_newest_valid_config() {
        let configs = vec![config(10000), config(10001), config(i64::MAX)];
        let mut inv = invocation();

        assert_eq!(inv.find_config(&configs).map(|c| c.valid_from), Some(10001));
        assert!(!inv.is_bound());

        inv.resolve_config(&configs);
        assert_eq!(inv.config_id(), 10001);

        // Once bound, newer configs no longer apply.
        let configs = vec![config(10000), config(10001), config(20000)];
        assert_eq!(inv.find_config(&configs).map(|c| c.valid_from), Some(10001));
    }

    #[test]
    fn attribute_event_ignores_events_outside_the_config() {
        let configs = vec![config(10000)];
        let mut inv = invocation();

        assert!(!inv.attribute_event("fb_mobile_search", Some("USD"), Some(1.0), &configs));
        assert!(inv.recorded_events().is_empty());
        assert!(!inv.attribute_event(PURCHASE, None, None, &[]));
    }

    #[test]
    fn attribute_event_accumulates_values_per_currency() {
        let configs = vec![config(10000)];
        let mut inv = invocation();

        assert!(inv.attribute_event(DONATE, Some("usd"), Some(40.0), &configs));
        assert!(inv.attribute_event(DONATE, None, Some(10.0), &configs));
        assert!(inv.attribute_event(DONATE, Some("EUR"), Some(5.0), &configs));

        assert_eq!(inv.recorded_value(DONATE, "USD"), Some(50.0));
        assert_eq!(inv.recorded_value(DONATE, "EUR"), Some(5.0));
        assert!(inv.recorded_events().contains(DONATE));
        assert_eq!(inv.config_id(), 10000);
    }

    #[test]
    fn update_conversion_value_climbs_priority() {
        let configs = vec![config(10000)];
        let now = Utc::now();
        let mut inv = invocation();
        inv.set_aggregated(true);

        inv.attribute_event(PURCHASE, Some("USD"), Some(1.0), &configs);
        assert!(inv.update_conversion_value(&configs, now));
        assert_eq!((inv.conversion_value(), inv.priority()), (2, 10));
        assert!(!inv.is_aggregated());

        // Same events again: nothing outranks the current rule.
        assert!(!inv.update_conversion_value(&configs, now));

        inv.attribute_event(DONATE, Some("USD"), Some(60.0), &configs);
        assert!(inv.update_conversion_value(&configs, now));
        assert_eq!((inv.conversion_value(), inv.priority()), (4, 20));

        inv.attribute_event(DONATE, Some("USD"), Some(60.0), &configs);
        assert!(inv.update_conversion_value(&configs, now));
        assert_eq!((inv.conversion_value(), inv.priority()), (6, 30));
    }

    #[test]
    fn first_rule_wins_on_equal_priority() {
        let configs = vec![
            Configuration::from_json(&json!({
                "default_currency": "USD",
                "cutoff_time": 1,
                "valid_from": 1,
                "config_mode": "DEFAULT",
                "conversion_value_rules": [
                    { "conversion_value": 7, "priority": 5, "events": [{ "event_name": PURCHASE }] },
                    { "conversion_value": 8, "priority": 5, "events": [{ "event_name": PURCHASE }] }
                ]
            }))
            .unwrap(),
        ];
        let mut inv = invocation();
        inv.attribute_event(PURCHASE, None, None, &configs);
        assert!(inv.update_conversion_value(&configs, Utc::now()));
        assert_eq!(inv.conversion_value(), 7);
    }

    #[test]
    fn out_of_window_uses_bound_config_cutoff() {
        let configs = vec![config(10000), config(10001)];
        let now = Utc::now();

        let mut recent = invocation();
        recent.set_config_id(10000);
        assert!(!recent.is_out_of_window(&configs, now));

        let mut stale = invocation();
        stale.set_config_id(10001);
        stale.set_conversion_timestamp(now - Duration::days(2));
        assert!(stale.is_out_of_window(&configs, now));

        // No matching config: kept.
        stale.set_config_id(42);
        assert!(!stale.is_out_of_window(&configs, now));
    }

    #[test]
    fn out_of_window_tolerates_extreme_cutoff() {
        let mut endless = config(10000);
        endless.cutoff_time = i64::MAX;
        let mut inv = invocation();
        inv.set_config_id(10000);
        inv.set_conversion_timestamp(Utc::now() - Duration::days(365));

        assert!(!inv.is_out_of_window(&[endless], Utc::now()));
    }

    #[test]
    fn upload_signature_requires_shared_secret() {
        let inv = invocation();
        let signature = inv.upload_signature("server").unwrap();
        assert_eq!(signature.len(), 128);
        assert_ne!(Some(signature), inv.upload_signature("client"));

        let unsigned = Invocation::new("c", "t").unwrap();
        assert_eq!(unsigned.upload_signature("server"), None);
    }

    #[test]
    fn survives_serialization() {
        let configs = vec![config(10000)];
        let mut inv = invocation();
        inv.attribute_event(DONATE, Some("USD"), Some(12.5), &configs);

        let json = serde_json::to_string(&inv).unwrap();
        let back: Invocation = serde_json::from_str(&json).unwrap();
        similar_asserts::assert_eq!(back, inv);
    }
}
