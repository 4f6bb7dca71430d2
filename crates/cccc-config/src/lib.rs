//! Configuration file support for cccc clients
//!
//! An optional KDL file supplies the home directory, an explicit daemon
//! endpoint, the request timeout and the default `by` actor. Anything left
//! out falls back to the SDK's discovery and defaults.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{default_config_path, load_config, parse_config, parse_config_str};
