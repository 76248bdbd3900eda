use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use toml::{Table, Value};
use tracing::{debug, trace};

use super::builder::LoaderSettings;
use super::env::{env_var_name, validate_var_name, EnvSource};
use super::file::{find_config_file, load_config_file};
use super::ConfigError;

/// Where a resolved value came from. Later variants take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueSource {
    Default,
    File,
    Environment,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueSource::Default => "default",
            ValueSource::File => "file",
            ValueSource::Environment => "environment",
        })
    }
}

/// A merged value with its origin.
///
/// Environment values are kept as the raw string; they are typed when
/// decoded into the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: Value,
    pub source: ValueSource,
    /// Variable name the value was read from, for environment values.
    pub var: Option<String>,
}

/// Output of [`Resolver::merge`]: one entry per key path that has a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ResolvedValue>,
    file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        self.values.get(key)
    }

    pub fn source_of(&self, key: &str) -> Option<ValueSource> {
        self.values.get(key).map(|v| v.source)
    }

    /// The config file that was read, if one was found.
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Holds the three ranked sources for one load and merges them per key.
#[derive(Debug)]
pub struct Resolver<'a> {
    settings: &'a LoaderSettings,
    env: &'a dyn EnvSource,
    automatic_env: bool,
    /// Key path to variable name.
    keys: BTreeMap<String, String>,
    defaults: Table,
    file: Option<(PathBuf, Table)>,
}

impl<'a> Resolver<'a> {
    pub fn new(settings: &'a LoaderSettings, env: &'a dyn EnvSource) -> Self {
        Self {
            settings,
            env,
            automatic_env: false,
            keys: BTreeMap::new(),
            defaults: Table::new(),
            file: None,
        }
    }

    /// Turns on environment lookups for registered keys.
    pub fn automatic_env(&mut self) {
        self.automatic_env = true;
    }

    /// Registers `key` for merging and derives its variable name.
    ///
    /// Registering the same key again has no effect.
    pub fn register_key(&mut self, key: &str) -> Result<(), ConfigError> {
        if self.keys.contains_key(key) {
            return Ok(());
        }
        let name = env_var_name(
            &self.settings.env_prefix,
            &self.settings.env_key_replacer,
            key,
        );
        validate_var_name(key, &name)?;
        trace!(key, var = %name, "registered config key");
        self.keys.insert(key.to_string(), name);
        Ok(())
    }

    /// Variable name bound to `key`, if registered.
    pub fn var_name(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Searches for the config file and loads it as the file source.
    ///
    /// Returns `Ok(false)` if no file was found, which is not an error.
    pub fn read_file(&mut self) -> Result<bool, ConfigError> {
        let settings = self.settings;
        let Some(path) = find_config_file(
            &settings.search_paths,
            &settings.config_name,
            settings.config_type,
        ) else {
            debug!(
                name = %settings.config_name,
                format = %settings.config_type,
                "no config file found in search paths"
            );
            self.file = None;
            return Ok(false);
        };

        debug!(path = %path.display(), "loading config file");
        let table = load_config_file(&path, settings.config_type)?;
        self.file = Some((path, table));
        Ok(true)
    }

    /// Replaces the default source.
    pub fn set_defaults(&mut self, defaults: Table) {
        self.defaults = defaults;
    }

    /// Returns the highest-ranked value for every registered key.
    ///
    /// The environment is read here, not at registration. Keys no source
    /// supplies are absent from the result.
    pub fn merge(&self) -> ResolvedConfig {
        let mut values = BTreeMap::new();

        for (key, var) in &self.keys {
            if let Some(resolved) = self.lookup(key, var) {
                trace!(key = %key, source = %resolved.source, "resolved config key");
                values.insert(key.clone(), resolved);
            }
        }

        ResolvedConfig {
            values,
            file: self.file.as_ref().map(|(path, _)| path.clone()),
        }
    }

    fn lookup(&self, key: &str, var: &str) -> Option<ResolvedValue> {
        if self.automatic_env {
            if let Some(raw) = self.env.get(var) {
                if !raw.is_empty() || self.settings.allow_empty_env {
                    return Some(ResolvedValue {
                        value: Value::String(raw),
                        source: ValueSource::Environment,
                        var: Some(var.to_string()),
                    });
                }
            }
        }

        let path = split_key(key);
        if let Some(value) = self.file.as_ref().and_then(|(_, t)| lookup_path(t, &path)) {
            return Some(ResolvedValue {
                value: value.clone(),
                source: ValueSource::File,
                var: None,
            });
        }

        lookup_path(&self.defaults, &path).map(|value| ResolvedValue {
            value: value.clone(),
            source: ValueSource::Default,
            var: None,
        })
    }
}

pub(crate) fn split_key(key: &str) -> Vec<String> {
    key.split('.').map(str::to_string).collect()
}

/// Walks `path` through nested tables. Segments match exactly when possible
/// and case-insensitively otherwise.
pub(crate) fn lookup_path<'t>(table: &'t Table, path: &[String]) -> Option<&'t Value> {
    let (first, rest) = path.split_first()?;
    let value = table.get(first).or_else(|| {
        table
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(first))
            .map(|(_, v)| v)
    })?;

    if rest.is_empty() {
        Some(value)
    } else {
        lookup_path(value.as_table()?, rest)
    }
}

pub(crate) fn merge_at_path(table: &mut Table, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        if let Value::Table(overlay) = value {
            deep_merge(table, overlay);
        }
        return;
    };

    if rest.is_empty() {
        match (table.get_mut(first), value) {
            (Some(Value::Table(base)), Value::Table(overlay)) => {
                deep_merge(base, overlay);
            }
            (_, value) => {
                table.insert(first.clone(), value);
            }
        }
        return;
    }

    if !matches!(table.get(first), Some(Value::Table(_))) {
        table.insert(first.clone(), Value::Table(Table::new()));
    }

    if let Some(Value::Table(nested)) = table.get_mut(first) {
        merge_at_path(nested, rest, value);
    }
}

fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(base_table)), Value::Table(overlay_table)) => {
                deep_merge(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::MockEnv;
    use std::fs;
    use tempfile::tempdir;

    fn settings_in(dir: &Path) -> LoaderSettings {
        LoaderSettings {
            config_name: "app".into(),
            search_paths: vec![dir.to_path_buf()],
            env_prefix: "APP".into(),
            ..LoaderSettings::default()
        }
    }

    fn defaults() -> Table {
        toml::from_str("[server]\nport = 8080\nhost = \"localhost\"\n").unwrap()
    }

    #[test]
    fn test_value_source_ranking() {
        assert!(ValueSource::Environment > ValueSource::File);
        assert!(ValueSource::File > ValueSource::Default);
    }

    #[test]
    fn test_register_key_is_idempotent() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        let env = MockEnv::new();
        let mut resolver = Resolver::new(&settings, &env);

        resolver.register_key("server.port").unwrap();
        resolver.register_key("server.port").unwrap();

        assert_eq!(resolver.keys().count(), 1);
        assert_eq!(resolver.var_name("server.port"), Some("APP_SERVER_PORT"));
    }

    #[test]
    fn test_register_key_rejects_unbindable_names() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        let env = MockEnv::new();
        let mut resolver = Resolver::new(&settings, &env);

        let result = resolver.register_key("a=b");
        assert!(matches!(result, Err(ConfigError::EnvironmentBind { key, .. }) if key == "a=b"));
    }

    #[test]
    fn test_merge_prefers_environment_then_file_then_default() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.yaml"), "server:\n  port: 7070\n  host: file.host\n").unwrap();
        let settings = settings_in(dir.path());
        let env = MockEnv::from_pairs([("APP_SERVER_PORT", "9090")]);

        let mut resolver = Resolver::new(&settings, &env);
        resolver.automatic_env();
        assert!(resolver.read_file().unwrap());
        resolver.register_key("server.port").unwrap();
        resolver.register_key("server.host").unwrap();
        resolver.register_key("server.timeout").unwrap();
        resolver.set_defaults(defaults());

        let merged = resolver.merge();
        let port = merged.get("server.port").unwrap();
        assert_eq!(port.source, ValueSource::Environment);
        assert_eq!(port.value, Value::String("9090".into()));
        assert_eq!(port.var.as_deref(), Some("APP_SERVER_PORT"));

        let host = merged.get("server.host").unwrap();
        assert_eq!(host.source, ValueSource::File);
        assert_eq!(host.value, Value::String("file.host".into()));

        assert!(merged.get("server.timeout").is_none());
        assert_eq!(merged.file_path(), Some(dir.path().join("app.yaml").as_path()));
    }

    #[test]
    fn test_merge_ignores_environment_until_enabled() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        let env = MockEnv::from_pairs([("APP_SERVER_PORT", "9090")]);

        let mut resolver = Resolver::new(&settings, &env);
        resolver.register_key("server.port").unwrap();
        resolver.set_defaults(defaults());

        assert_eq!(resolver.merge().source_of("server.port"), Some(ValueSource::Default));
        resolver.automatic_env();
        assert_eq!(
            resolver.merge().source_of("server.port"),
            Some(ValueSource::Environment)
        );
    }

    #[test]
    fn test_empty_environment_value_counts_as_unset() {
        let dir = tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        let env = MockEnv::from_pairs([("APP_SERVER_HOST", "")]);

        {
            let mut resolver = Resolver::new(&settings, &env);
            resolver.automatic_env();
            resolver.register_key("server.host").unwrap();
            resolver.set_defaults(defaults());
            assert_eq!(resolver.merge().source_of("server.host"), Some(ValueSource::Default));
        }

        settings.allow_empty_env = true;
        let mut resolver = Resolver::new(&settings, &env);
        resolver.automatic_env();
        resolver.register_key("server.host").unwrap();
        let merged = resolver.merge();
        assert_eq!(merged.source_of("server.host"), Some(ValueSource::Environment));
        assert_eq!(merged.get("server.host").unwrap().value, Value::String(String::new()));
    }

    #[test]
    fn test_read_file_missing_is_not_an_error() {
        let dir = tempdir().unwrap();
        let settings = settings_in(dir.path());
        let env = MockEnv::new();
        let mut resolver = Resolver::new(&settings, &env);

        assert!(!resolver.read_file().unwrap());
        assert_eq!(resolver.merge().file_path(), None);
    }

    #[test]
    fn test_read_file_malformed_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.yaml"), "server: [port\n").unwrap();
        let settings = settings_in(dir.path());
        let env = MockEnv::new();
        let mut resolver = Resolver::new(&settings, &env);

        assert!(matches!(
            resolver.read_file(),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_file_keys_match_case_insensitively() {
        let table: Table = toml::from_str("[Server]\nPort = 1\n").unwrap();
        let value = lookup_path(&table, &split_key("server.port")).unwrap();
        assert_eq!(value.as_integer(), Some(1));
    }

    #[test]
    fn test_merge_at_path_creates_nested_tables() {
        let mut table = Table::new();
        merge_at_path(&mut table, &split_key("a.b.c"), Value::Integer(1));
        merge_at_path(&mut table, &split_key("a.d"), Value::Boolean(true));
        assert_eq!(table["a"]["b"]["c"].as_integer(), Some(1));
        assert_eq!(table["a"]["d"].as_bool(), Some(true));
    }

    #[test]
    fn test_merge_at_path_replaces_scalar_with_table() {
        let mut table: Table = toml::from_str("a = 1\n").unwrap();
        merge_at_path(&mut table, &split_key("a.b"), Value::Integer(2));
        assert_eq!(table["a"]["b"].as_integer(), Some(2));
    }
}
