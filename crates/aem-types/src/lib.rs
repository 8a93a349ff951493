pub mod configuration;
pub mod error;
pub mod invocation;
pub mod mode;
pub mod signature;

pub use configuration::{Configuration, ConversionValueRule, EventValue, RuleEvent};
pub use error::{ConfigError, DomainError};
pub use invocation::{Invocation, NO_CONVERSION, UNBOUND_CONFIG_ID};
pub use mode::ConfigMode;
pub use signature::hmac_sha512_hex;
