use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ConfigError;
use crate::mode::ConfigMode;

/// Minimum amount an event must accumulate in one currency for a rule to match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventValue {
    pub currency: String,
    pub amount: f64,
}

/// One event a rule requires, optionally gated on accumulated value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<EventValue>>,
}

/// Maps a set of recorded events to a conversion value.
///
/// A rule matches when every listed event has been recorded. An event with
/// `values` additionally requires the recorded amount in at least one of
/// the listed currencies to reach the threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversionValueRule {
    pub conversion_value: i64,
    pub priority: i64,
    pub events: Vec<RuleEvent>,
}

impl ConversionValueRule {
    /// Parse one rule, rejecting rules without events or with unnamed events.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let rule: Self = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::MalformedRule(e.to_string()))?;
        if rule.events.is_empty() {
            return Err(ConfigError::MalformedRule("rule has no events".into()));
        }
        if rule.events.iter().any(|event| event.event_name.is_empty()) {
            return Err(ConfigError::MalformedRule("rule event has an empty name".into()));
        }
        Ok(rule)
    }

    pub fn mentions_event(&self, event_name: &str) -> bool {
        self.events.iter().any(|event| event.event_name == event_name)
    }
}

/// Server-issued rule set for one configuration mode.
///
/// `valid_from` doubles as the configuration's identity: invocations bind to
/// a configuration by storing its `valid_from` as their config id.
/// `conversion_value_rules` are kept sorted by descending priority; rules of
/// equal priority keep their server order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub default_currency: String,
    pub cutoff_time: i64,
    pub valid_from: i64,
    pub config_mode: ConfigMode,
    pub conversion_value_rules: Vec<ConversionValueRule>,
}

impl Configuration {
    /// Validate a configuration entry from the conversion configs endpoint.
    ///
    /// Rules that fail to parse are skipped. The entry itself is rejected
    /// when a required key is missing, `cutoff_time` is negative or too
    /// large to be a duration, the mode is unknown, or no rule survives.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;

        let default_currency = required_str(object, "default_currency")?.to_uppercase();
        let cutoff_time = required_i64(object, "cutoff_time")?;
        let valid_from = required_i64(object, "valid_from")?;
        if cutoff_time < 0 || Duration::try_days(cutoff_time).is_none() {
            return Err(ConfigError::InvalidCutoff {
                valid_from,
                cutoff_time,
            });
        }
        let config_mode: ConfigMode = required_str(object, "config_mode")?.parse()?;
        let raw_rules = object
            .get("conversion_value_rules")
            .and_then(Value::as_array)
            .ok_or(ConfigError::MissingKey("conversion_value_rules"))?;

        let mut conversion_value_rules: Vec<ConversionValueRule> = raw_rules
            .iter()
            .filter_map(|raw| match ConversionValueRule::from_json(raw) {
                Ok(rule) => Some(rule),
                Err(error) => {
                    debug!(valid_from, %error, "skipping conversion value rule");
                    None
                }
            })
            .collect();
        if conversion_value_rules.is_empty() {
            return Err(ConfigError::NoValidRules { valid_from });
        }
        conversion_value_rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            default_currency,
            cutoff_time,
            valid_from,
            config_mode,
            conversion_value_rules,
        })
    }

    /// Length of the attribution window.
    ///
    /// Saturates for a `cutoff_time` that bypassed [`Self::from_json`]:
    /// negative is zero, oversized is [`Duration::MAX`].
    pub fn cutoff(&self) -> Duration {
        Duration::try_days(self.cutoff_time.max(0)).unwrap_or(Duration::MAX)
    }

    /// Whether any rule counts this event.
    pub fn mentions_event(&self, event_name: &str) -> bool {
        self.conversion_value_rules
            .iter()
            .any(|rule| rule.mentions_event(event_name))
    }
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, ConfigError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingKey(key))
}

fn required_i64(object: &Map<String, Value>, key: &'static str) -> Result<i64, ConfigError> {
    object
        .get(key)
        .and_then(Value::as_i64)
        .ok_or(ConfigError::MissingKey(key))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config_json(valid_from: i64) -> Value {
        json!({
            "default_currency": "usd",
            "cutoff_time": 1,
            "valid_from": valid_from,
            "config_mode": "DEFAULT",
            "conversion_value_rules": [
                {
                    "conversion_value": 2,
                    "priority": 10,
                    "events": [{ "event_name": "fb_mobile_purchase" }]
                },
                {
                    "conversion_value": 5,
                    "priority": 20,
                    "events": [
                        { "event_name": "fb_mobile_purchase" },
                        {
                            "event_name": "Donate",
                            "values": [{ "currency": "USD", "amount": 100.0 }]
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn parses_fields_and_orders_rules_by_priority() {
        let config = Configuration::from_json(&config_json(10000)).unwrap();

        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.cutoff_time, 1);
        assert_eq!(config.valid_from, 10000);
        assert_eq!(config.config_mode, ConfigMode::Default);
        let priorities: Vec<i64> = config
            .conversion_value_rules
            .iter()
            .map(|rule| rule.priority)
            .collect();
        assert_eq!(priorities, vec![20, 10]);
        assert!(config.mentions_event("Donate"));
        assert!(!config.mentions_event("fb_mobile_search"));
        assert_eq!(config.cutoff(), Duration::days(1));
    }

    #[test]
    fn equal_priority_rules_keep_server_order() {
        let config = Configuration::from_json(&json!({
            "default_currency": "USD",
            "cutoff_time": 1,
            "valid_from": 1,
            "config_mode": "DEFAULT",
            "conversion_value_rules": [
                { "conversion_value": 1, "priority": 5, "events": [{ "event_name": "a" }] },
                { "conversion_value": 2, "priority": 5, "events": [{ "event_name": "b" }] }
            ]
        }))
        .unwrap();

        let values: Vec<i64> = config
            .conversion_value_rules
            .iter()
            .map(|rule| rule.conversion_value)
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn rejects_entries_missing_required_keys() {
        for key in ["default_currency", "cutoff_time", "valid_from", "config_mode", "conversion_value_rules"] {
            let mut value = config_json(1);
            value.as_object_mut().unwrap().remove(key);
            assert_eq!(
                Configuration::from_json(&value),
                Err(ConfigError::MissingKey(key)),
                "missing {key}"
            );
        }
        assert_eq!(Configuration::from_json(&json!([])), Err(ConfigError::NotAnObject));
    }

    #[test]
    fn rejects_unknown_mode() {
        let mut value = config_json(1);
        value["config_mode"] = json!("CPAS");
        assert_eq!(
            Configuration::from_json(&value),
            Err(ConfigError::UnknownMode("CPAS".into()))
        );
    }

    #[test]
    fn skips_malformed_rules_and_rejects_when_none_remain() {
        let mut value = config_json(7);
        value["conversion_value_rules"] = json!([
            { "conversion_value": 1, "events": [{ "event_name": "a" }] },
            { "conversion_value": 3, "priority": 1, "events": [] },
            { "conversion_value": 4, "priority": 1, "events": [{ "event_name": "b" }] }
        ]);
        let config = Configuration::from_json(&value).unwrap();
        assert_eq!(config.conversion_value_rules.len(), 1);
        assert_eq!(config.conversion_value_rules[0].conversion_value, 4);

        value["conversion_value_rules"] = json!([{ "priority": 1 }]);
        assert_eq!(
            Configuration::from_json(&value),
            Err(ConfigError::NoValidRules { valid_from: 7 })
        );
    }

    #[test]
    fn serialized_form_parses_back_through_the_boundary() {
        let config = Configuration::from_json(&config_json(10001)).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        similar_asserts::assert_eq!(Configuration::from_json(&value).unwrap(), config);
    }

    #[test]
    fn rejects_negative_and_oversized_cutoff() {
        for cutoff_time in [-1, 200_000_000_000_000, i64::MAX] {
            let mut value = config_json(9);
            value["cutoff_time"] = json!(cutoff_time);
            assert_eq!(
                Configuration::from_json(&value),
                Err(ConfigError::InvalidCutoff {
                    valid_from: 9,
                    cutoff_time,
                })
            );
        }

        let mut value = config_json(9);
        value["cutoff_time"] = json!(0);
        assert_eq!(Configuration::from_json(&value).unwrap().cutoff(), Duration::zero());
    }

    #[test]
    fn cutoff_saturates_for_unchecked_values() {
        let mut config = Configuration::from_json(&config_json(1)).unwrap();

        config.cutoff_time = i64::MAX;
        assert_eq!(config.cutoff(), Duration::MAX);

        config.cutoff_time = -3;
        assert_eq!(config.cutoff(), Duration::zero());
    }
}
