pub mod error;
mod bridge;
mod name_map;
mod translate;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeConfig, DispatchMode};
pub use error::{BridgeError, ConfigError, UnresolvableChannel};
pub use name_map::{NameMap, WILDCARDS, is_wildcard};
pub use translate::{Translation, translate_request, translate_response};
