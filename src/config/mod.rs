//! Layered configuration loading: declared defaults, a config file and
//! environment variables, in increasing order of precedence.

mod builder;
mod decode;
mod defaults;
mod env;
mod error;
mod file;
mod flatten;
mod source;

pub use builder::{Loader, LoaderBuilder, LoaderSettings};
pub use defaults::{Defaults, Schema};
pub use env::{env_var_name, EnvKeyReplacer, EnvSource, MockEnv, StdEnv};
pub use error::ConfigError;
pub use file::FileFormat;
pub use flatten::flatten_keys;
pub use source::{ResolvedConfig, ResolvedValue, Resolver, ValueSource};
