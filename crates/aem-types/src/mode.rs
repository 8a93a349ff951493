use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Partition of the configuration store.
///
/// Invocations carrying a business id are attributed against `Brand`
/// configurations; everything else uses `Default`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfigMode {
    #[serde(rename = "DEFAULT")]
    Default,
    #[serde(rename = "BRAND")]
    Brand,
}

impl ConfigMode {
    /// Wire name, as sent in `config_mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Brand => "BRAND",
        }
    }
}

impl FromStr for ConfigMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT" => Ok(Self::Default),
            "BRAND" => Ok(Self::Brand),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
