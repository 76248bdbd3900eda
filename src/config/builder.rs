use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use toml::{Table, Value};
use tracing::debug;

use super::decode::{from_table, FieldError};
use super::defaults::{Defaults, Schema};
use super::env::{coerce_env_value, EnvKeyReplacer, EnvSource, StdEnv};
use super::file::FileFormat;
use super::flatten::flatten_keys;
use super::source::{lookup_path, merge_at_path, split_key, ResolvedConfig, Resolver, ValueSource};
use super::ConfigError;

/// Settings of a [`Loader`], fixed once the loader is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
    pub(crate) config_name: String,
    pub(crate) config_type: FileFormat,
    pub(crate) search_paths: Vec<PathBuf>,
    pub(crate) env_prefix: String,
    pub(crate) env_key_replacer: EnvKeyReplacer,
    pub(crate) allow_empty_env: bool,
}

impl LoaderSettings {
    /// File name searched for, without extension.
    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    pub fn config_type(&self) -> FileFormat {
        self.config_type
    }

    /// Directories searched in order; the first match wins.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    pub fn env_key_replacer(&self) -> &EnvKeyReplacer {
        &self.env_key_replacer
    }

    pub fn allow_empty_env(&self) -> bool {
        self.allow_empty_env
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            config_name: "config".to_string(),
            config_type: FileFormat::default(),
            search_paths: vec![PathBuf::from(".")],
            env_prefix: String::new(),
            env_key_replacer: EnvKeyReplacer::default(),
            allow_empty_env: false,
        }
    }
}

/// Populates a [`Schema`] from declared defaults, a config file and
/// environment variables, in increasing order of precedence.
///
/// Environment variable names are derived from each field's key path, so
/// with prefix `APP` the field `server.port` is read from `APP_SERVER_PORT`.
///
/// ## Example
///
/// ```no_run
/// use confloader::{Defaults, Loader, Schema};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct AppConfig {
///     server: Server,
/// }
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct Server {
///     port: u16,
/// }
///
/// impl Schema for AppConfig {
///     fn declare_defaults(defaults: &mut Defaults) {
///         defaults.set("server.port", 8080);
///     }
/// }
///
/// let loader = Loader::builder()
///     .with_config_name("app")
///     .with_config_path("/etc/app")
///     .with_env_prefix("APP")
///     .build();
///
/// let mut config = AppConfig::default();
/// loader.load(&mut config)?;
/// # Ok::<(), confloader::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Loader {
    settings: LoaderSettings,
    env: Arc<dyn EnvSource>,
}

impl Loader {
    /// Creates a loader with default settings: `./config.yaml`, no prefix.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    /// Loads configuration into `target`.
    ///
    /// Fields with neither a file nor an environment value keep their
    /// declared default. `target` is only written once everything has
    /// resolved; on error it is left as it was.
    pub fn load<T: Schema>(&self, target: &mut T) -> Result<(), ConfigError> {
        self.load_with_sources(target).map(|_| ())
    }

    /// Like [`load`](Self::load), and reports where each value came from.
    pub fn load_with_sources<T: Schema>(&self, target: &mut T) -> Result<ResolvedConfig, ConfigError> {
        // Validated before any file or environment access
        let keys = flatten_keys(&*target)?;
        let defaults = Defaults::of::<T>();
        defaults.check_keys(&keys)?;
        let mut snapshot = snapshot(&*target)?;

        let mut resolver = Resolver::new(&self.settings, self.env.as_ref());
        resolver.automatic_env();
        resolver.read_file()?;
        for key in &keys {
            resolver.register_key(key)?;
        }

        defaults.apply(&mut snapshot);
        resolver.set_defaults(snapshot.clone());

        let resolved = resolver.merge();
        *target = decode(snapshot, &resolved)?;

        debug!(
            keys = keys.len(),
            file = ?resolved.file_path(),
            "configuration loaded"
        );
        Ok(resolved)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot<T: Schema>(target: &T) -> Result<Table, ConfigError> {
    match Value::try_from(target) {
        Ok(Value::Table(table)) => Ok(table),
        Ok(other) => Err(ConfigError::InvalidTarget(format!(
            "require a struct to load into, got {}",
            other.type_str()
        ))),
        Err(e) => Err(ConfigError::SchemaDecode(e.to_string())),
    }
}

/// Overlays file and environment values onto `base` and deserializes it.
fn decode<T: DeserializeOwned>(mut base: Table, resolved: &ResolvedConfig) -> Result<T, ConfigError> {
    for (key, entry) in resolved.iter() {
        let path = split_key(key);
        let value = match (entry.source, &entry.value, entry.var.as_deref()) {
            // Already part of `base`
            (ValueSource::Default, _, _) => continue,
            (ValueSource::Environment, Value::String(raw), Some(var)) => {
                coerce_env_value(key, var, raw, lookup_path(&base, &path))?
            }
            (_, value, _) => value.clone(),
        };
        merge_at_path(&mut base, &path, value);
    }

    from_table(base).map_err(|FieldError { key, message }| {
        // `ports[1]` belongs to the key `ports`
        let leaf = key.split('[').next().unwrap_or_default().to_string();
        match resolved.get(&leaf).and_then(|entry| entry.var.clone()) {
            Some(var) => ConfigError::Decode {
                key: leaf,
                var,
                message,
            },
            None => ConfigError::DeserializeError { key, message },
        }
    })
}

/// Builder for a [`Loader`].
#[derive(Debug, Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct LoaderBuilder {
    settings: LoaderSettings,
    env: Option<Arc<dyn EnvSource>>,
}

impl LoaderBuilder {
    /// Sets the config file name, without extension. Defaults to `config`.
    pub fn with_config_name(mut self, name: impl Into<String>) -> Self {
        self.settings.config_name = name.into();
        self
    }

    /// Appends a directory to search for the config file.
    ///
    /// Directories are searched in the order added, after the working
    /// directory; the first match wins.
    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.settings.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets the file format, which also decides the extension. Defaults to YAML.
    pub fn with_config_type(mut self, format: FileFormat) -> Self {
        self.settings.config_type = format;
        self
    }

    /// Sets the prefix joined with `_` in front of every variable name.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.env_prefix = prefix.into();
        self
    }

    /// Replaces `old` with `new` in key paths when deriving variable names.
    /// Defaults to `.` → `_`.
    pub fn with_env_key_replacer(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.settings.env_key_replacer = EnvKeyReplacer::new(old, new);
        self
    }

    /// Treats variables set to the empty string as values rather than unset.
    pub fn with_allow_empty_env(mut self, allow: bool) -> Self {
        self.settings.allow_empty_env = allow;
        self
    }

    /// Reads variables from `source` instead of the process environment.
    pub fn with_env_source(mut self, source: impl EnvSource + 'static) -> Self {
        self.env = Some(Arc::new(source));
        self
    }

    pub fn build(self) -> Loader {
        Loader {
            settings: self.settings,
            env: self.env.unwrap_or_else(|| Arc::new(StdEnv)),
        }
    }
}
