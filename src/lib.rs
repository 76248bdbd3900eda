pub mod config;

pub use config::{ConfigError, Defaults, Loader, Schema};
