use std::collections::HashMap;

use toml::Value;

use super::ConfigError;

/// Read-only access to environment variables.
///
/// The loader consults this at merge time instead of reading the process
/// environment directly, so tests can supply their own variables.
pub trait EnvSource: Send + Sync + std::fmt::Debug {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnv;

impl EnvSource for StdEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MockEnv {
    vars: HashMap<String, String>,
}

impl MockEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }
}

impl EnvSource for MockEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Substitution applied to a key path when deriving its variable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvKeyReplacer {
    old: String,
    new: String,
}

impl EnvKeyReplacer {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn replace(&self, key: &str) -> String {
        if self.old.is_empty() {
            return key.to_string();
        }
        key.replace(&self.old, &self.new)
    }
}

impl Default for EnvKeyReplacer {
    fn default() -> Self {
        Self::new(".", "_")
    }
}

/// Derives the variable name for `key`: `PREFIX_KEY`, upper-cased, with the
/// replacer applied to the key. An empty prefix contributes nothing.
pub fn env_var_name(prefix: &str, replacer: &EnvKeyReplacer, key: &str) -> String {
    let key = replacer.replace(key);
    let name = if prefix.is_empty() {
        key
    } else {
        format!("{prefix}_{key}")
    };
    name.to_uppercase()
}

/// Checks that `name` can be looked up as an environment variable.
pub(crate) fn validate_var_name(key: &str, name: &str) -> Result<(), ConfigError> {
    let reason = if key.is_empty() {
        "key path is empty"
    } else if name.is_empty() {
        "variable name is empty"
    } else if name.contains('=') {
        "variable name contains '='"
    } else if name.contains('\0') {
        "variable name contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(ConfigError::EnvironmentBind {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}

/// Turns a raw variable into the value merged at `key`.
///
/// The string is kept as is and converted to the field's type at decode
/// time. `hint` is the value the schema currently holds at that key; only
/// tables are refused here, since a single variable cannot describe one.
pub(crate) fn coerce_env_value(
    key: &str,
    var: &str,
    raw: &str,
    hint: Option<&Value>,
) -> Result<Value, ConfigError> {
    if let Some(Value::Table(_)) = hint {
        return Err(ConfigError::Decode {
            key: key.to_string(),
            var: var.to_string(),
            message: "tables cannot be set from an environment variable".to_string(),
        });
    }
    Ok(Value::String(raw.to_string()))
}
