#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("invocation is missing required field `{field}`")]
    MissingField { field: &'static str },
}

/// Reasons a configuration entry is rejected at the parse boundary.
///
/// A rejected entry is dropped on its own; the rest of the batch still loads.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration entry is not a JSON object")]
    NotAnObject,
    #[error("configuration is missing required key `{0}`")]
    MissingKey(&'static str),
    #[error("configuration valid from {valid_from} has unusable cutoff_time {cutoff_time}")]
    InvalidCutoff { valid_from: i64, cutoff_time: i64 },
    #[error("unknown configuration mode `{0}`")]
    UnknownMode(String),
    #[error("configuration valid from {valid_from} has no valid conversion value rule")]
    NoValidRules { valid_from: i64 },
    #[error("malformed conversion value rule: {0}")]
    MalformedRule(String),
}
