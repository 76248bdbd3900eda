//! Declared default values for a schema.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::Serialize;
use toml::{Table, Value};

use super::source::{lookup_path, merge_at_path, split_key};
use super::ConfigError;

/// A configuration type the [`Loader`](super::Loader) can populate.
///
/// Defaults are declared by key path next to the type:
///
/// ```
/// use confloader::{Defaults, Schema};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct AppConfig {
///     server: Server,
/// }
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct Server {
///     host: String,
///     port: u16,
/// }
///
/// impl Schema for AppConfig {
///     fn declare_defaults(defaults: &mut Defaults) {
///         defaults.set("server.host", "0.0.0.0").set("server.port", 8080);
///     }
/// }
/// ```
///
/// Key paths stop at fields that hold no struct: maps, sequences, enums and
/// `Option` fields that are `None` in the value passed to `load`. Such a
/// field takes its default as a whole, so for `tls: Option<Tls>` declare
/// `tls` with a table rather than `tls.cert`:
///
/// ```
/// # use confloader::{Defaults, Schema};
/// # use serde::{Deserialize, Serialize};
/// #[derive(Default, Serialize, Deserialize)]
/// struct AppConfig {
///     tls: Option<Tls>,
/// }
///
/// #[derive(Serialize, Deserialize)]
/// struct Tls {
///     cert: String,
/// }
///
/// impl Schema for AppConfig {
///     fn declare_defaults(defaults: &mut Defaults) {
///         let mut tls = toml::Table::new();
///         tls.insert("cert".into(), "/etc/app/cert.pem".into());
///         defaults.set("tls", tls);
///     }
/// }
/// ```
pub trait Schema: Serialize + DeserializeOwned {
    fn declare_defaults(defaults: &mut Defaults) {
        let _ = defaults;
    }
}

/// Default values keyed by key path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults {
    values: BTreeMap<String, Value>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the defaults declared by `T`.
    pub fn of<T: Schema>() -> Self {
        let mut defaults = Self::new();
        T::declare_defaults(&mut defaults);
        defaults
    }

    /// Declares the default for `key`, replacing any earlier one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fails if a default names a key path the schema does not have.
    pub(crate) fn check_keys(&self, keys: &BTreeSet<String>) -> Result<(), ConfigError> {
        let Some(unknown) = self.values.keys().find(|key| !keys.contains(*key)) else {
            return Ok(());
        };
        let leaf = keys
            .iter()
            .find(|key| unknown.strip_prefix(key.as_str()).is_some_and(|rest| rest.starts_with('.')));
        let message = match leaf {
            Some(leaf) => format!(
                "default declared for unknown key '{unknown}': '{leaf}' is a leaf and takes its default as a whole"
            ),
            None => format!("default declared for unknown key '{unknown}'"),
        };
        Err(ConfigError::SchemaDecode(message))
    }

    /// Writes each default into `table` where the current value is zero or
    /// missing. Values the caller already set are kept.
    pub(crate) fn apply(&self, table: &mut Table) {
        for (key, default) in &self.values {
            let path = split_key(key);
            if lookup_path(table, &path).map_or(true, is_zero) {
                merge_at_path(table, &path, default.clone());
            }
        }
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Integer(i) => *i == 0,
        Value::Float(f) => *f == 0.0,
        Value::Boolean(b) => !b,
        Value::Array(items) => items.is_empty(),
        Value::Table(table) => table.is_empty(),
        Value::Datetime(_) => false,
    }
}
