//! Config file discovery and parsing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use toml::{Table, Value};

use super::ConfigError;

/// Format of the config file, which also decides its extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Yaml,
    Toml,
    Json,
}

impl FileFormat {
    /// Extensions tried when searching, in order.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileFormat::Yaml => &["yaml", "yml"],
            FileFormat::Toml => &["toml"],
            FileFormat::Json => &["json"],
        }
    }

    /// Parses a document into a table. The top level must be a mapping.
    pub fn parse(self, contents: &str) -> Result<Table, Box<dyn std::error::Error + Send + Sync>> {
        let value = match self {
            FileFormat::Toml => return Ok(toml::from_str(contents)?),
            FileFormat::Yaml => {
                let doc: serde_yaml::Value = serde_yaml::from_str(contents)?;
                yaml_to_value(doc, "")?
            }
            FileFormat::Json => {
                let doc: serde_json::Value = serde_json::from_str(contents)?;
                json_to_value(doc, "")?
            }
        };

        match value {
            Some(Value::Table(table)) => Ok(table),
            // An empty document carries no settings
            None => Ok(Table::new()),
            Some(other) => Err(format!("expected a mapping at the top level, found {}", other.type_str()).into()),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extensions()[0])
    }
}

impl FromStr for FileFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(FileFormat::Yaml),
            "toml" => Ok(FileFormat::Toml),
            "json" => Ok(FileFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Returns the first `<dir>/<name>.<ext>` that exists as a regular file.
pub fn find_config_file(search_paths: &[PathBuf], name: &str, format: FileFormat) -> Option<PathBuf> {
    search_paths.iter().find_map(|dir| {
        format
            .extensions()
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|candidate| candidate.is_file())
    })
}

/// Reads and parses the file at `path`.
pub fn load_config_file(path: &Path, format: FileFormat) -> Result<Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    format.parse(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

// `null` has no counterpart in the value model. In a mapping it leaves the
// key absent; in a sequence it would shift the following items, so it fails.
fn yaml_to_value(value: serde_yaml::Value, path: &str) -> Result<Option<Value>, String> {
    use serde_yaml::Value as Yaml;

    let value = match value {
        Yaml::Null => return Ok(None),
        Yaml::Bool(b) => Value::Boolean(b),
        Yaml::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    yaml_to_value(item, &item_path)?.ok_or_else(|| null_in_sequence(&item_path))
                })
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut table = Table::new();
            for (key, value) in mapping {
                let Some(key) = yaml_key(key) else { continue };
                if let Some(value) = yaml_to_value(value, &child_path(path, &key))? {
                    table.insert(key, value);
                }
            }
            Value::Table(table)
        }
        Yaml::Tagged(tagged) => return yaml_to_value(tagged.value, path),
    };
    Ok(Some(value))
}

fn yaml_key(key: serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Some(s),
        Yaml::Bool(b) => Some(b.to_string()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Tagged(tagged) => yaml_key(tagged.value),
        Yaml::Null | Yaml::Sequence(_) | Yaml::Mapping(_) => None,
    }
}

fn json_to_value(value: serde_json::Value, path: &str) -> Result<Option<Value>, String> {
    use serde_json::Value as Json;

    let value = match value {
        Json::Null => return Ok(None),
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{path}[{i}]");
                    json_to_value(item, &item_path)?.ok_or_else(|| null_in_sequence(&item_path))
                })
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => {
            let mut table = Table::new();
            for (key, value) in map {
                if let Some(value) = json_to_value(value, &child_path(path, &key))? {
                    table.insert(key, value);
                }
            }
            Value::Table(table)
        }
    };
    Ok(Some(value))
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn null_in_sequence(path: &str) -> String {
    format!("null is not allowed in a sequence (at '{path}')")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_yaml_nested_mapping() {
        let table = FileFormat::Yaml
            .parse("server:\n  port: 7070\n  host: example.com\ndebug: true\n")
            .unwrap();
        assert_eq!(table["server"]["port"].as_integer(), Some(7070));
        assert_eq!(table["server"]["host"].as_str(), Some("example.com"));
        assert_eq!(table["debug"].as_bool(), Some(true));
    }

    #[test]
    fn test_parse_yaml_drops_nulls() {
        let table = FileFormat::Yaml.parse("a: ~\nb:\n  c: null\n  d: 1\n").unwrap();
        assert!(table.get("a").is_none());
        assert!(table["b"].get("c").is_none());
        assert_eq!(table["b"]["d"].as_integer(), Some(1));
    }

    #[test]
    fn test_parse_rejects_null_sequence_items() {
        let err = FileFormat::Yaml.parse("hosts: [a, ~, b]\n").unwrap_err();
        assert!(err.to_string().contains("hosts[1]"), "{err}");

        let err = FileFormat::Json.parse(r#"{"server": {"ports": [80, null]}}"#).unwrap_err();
        assert!(err.to_string().contains("server.ports[1]"), "{err}");
    }

    #[test]
    fn test_load_config_file_null_sequence_item_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, "tags:\n  - a\n  -\n  - b\n").unwrap();

        let result = load_config_file(&path, FileFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_parse_empty_yaml_document() {
        assert!(FileFormat::Yaml.parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_json_and_toml() {
        let json = FileFormat::Json.parse(r#"{"server": {"port": 1, "ratio": 0.5}}"#).unwrap();
        assert_eq!(json["server"]["port"].as_integer(), Some(1));
        assert_eq!(json["server"]["ratio"].as_float(), Some(0.5));

        let toml = FileFormat::Toml.parse("[server]\nport = 2\n").unwrap();
        assert_eq!(toml["server"]["port"].as_integer(), Some(2));
    }

    #[test]
    fn test_parse_rejects_non_mapping_top_level() {
        assert!(FileFormat::Yaml.parse("- a\n- b\n").is_err());
        assert!(FileFormat::Json.parse("[1, 2]").is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("YAML".parse::<FileFormat>().unwrap(), FileFormat::Yaml);
        assert_eq!("yml".parse::<FileFormat>().unwrap(), FileFormat::Yaml);
        assert_eq!("json".parse::<FileFormat>().unwrap(), FileFormat::Json);
        assert!(matches!(
            "hcl".parse::<FileFormat>(),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_find_config_file_first_match_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(first.path().join("app.yaml"), "a: 1\n").unwrap();
        fs::write(second.path().join("app.yaml"), "a: 2\n").unwrap();

        let paths = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let found = find_config_file(&paths, "app", FileFormat::Yaml).unwrap();
        assert_eq!(found, first.path().join("app.yaml"));
    }

    #[test]
    fn test_find_config_file_skips_missing_dirs_and_uses_yml() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.yml"), "a: 1\n").unwrap();

        let paths = vec![PathBuf::from("/nonexistent/dir"), dir.path().to_path_buf()];
        let found = find_config_file(&paths, "app", FileFormat::Yaml).unwrap();
        assert_eq!(found, dir.path().join("app.yml"));
    }

    #[test]
    fn test_find_config_file_ignores_other_formats() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.toml"), "a = 1\n").unwrap();

        let paths = vec![dir.path().to_path_buf()];
        assert!(find_config_file(&paths, "app", FileFormat::Yaml).is_none());
    }

    #[test]
    fn test_load_config_file_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, "server: [unclosed\n").unwrap();

        let result = load_config_file(&path, FileFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::ParseError { path: p, .. }) if p == path));
    }
}
