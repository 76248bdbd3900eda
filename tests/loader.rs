use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use confloader::config::{EnvSource, FileFormat, MockEnv, ValueSource};
use confloader::{ConfigError, Defaults, Loader, Schema};
use serde::{Deserialize, Serialize};
use tempfile::{tempdir, TempDir};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct AppConfig {
    server: Server,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Server {
    port: u16,
}

impl Schema for AppConfig {
    fn declare_defaults(defaults: &mut Defaults) {
        defaults.set("server.port", 8080);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Deep {
    a: A,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct A {
    b: B,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct B {
    c: String,
}

impl Schema for Deep {}

/// Counts lookups so tests can tell whether the environment was consulted.
#[derive(Debug, Default, Clone)]
struct CountingEnv {
    lookups: Arc<AtomicUsize>,
}

impl EnvSource for CountingEnv {
    fn get(&self, _name: &str) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        None
    }
}

fn loader_in(dir: &TempDir, env: impl EnvSource + 'static) -> Loader {
    Loader::builder()
        .with_config_name("integration")
        .with_config_path(dir.path())
        .with_env_prefix("APP")
        .with_env_source(env)
        .build()
}

#[test]
fn test_port_scenario_default_env_file() {
    let dir = tempdir().unwrap();

    let mut config = AppConfig::default();
    loader_in(&dir, MockEnv::new()).load(&mut config).unwrap();
    assert_eq!(config.server.port, 8080);

    let mut config = AppConfig::default();
    let env = MockEnv::from_pairs([("APP_SERVER_PORT", "9090")]);
    loader_in(&dir, env).load(&mut config).unwrap();
    assert_eq!(config.server.port, 9090);

    fs::write(dir.path().join("integration.yaml"), "server:\n  port: 7070\n").unwrap();
    let mut config = AppConfig::default();
    loader_in(&dir, MockEnv::new()).load(&mut config).unwrap();
    assert_eq!(config.server.port, 7070);
}

#[test]
fn test_environment_beats_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("integration.yaml"), "server:\n  port: 7070\n").unwrap();
    let env = MockEnv::from_pairs([("APP_SERVER_PORT", "9090")]);

    let mut config = AppConfig::default();
    let resolved = loader_in(&dir, env).load_with_sources(&mut config).unwrap();
    assert_eq!(config.server.port, 9090);
    assert_eq!(resolved.source_of("server.port"), Some(ValueSource::Environment));
    assert_eq!(
        resolved.file_path(),
        Some(dir.path().join("integration.yaml").as_path())
    );
}

#[test]
fn test_derived_variable_name_round_trip() {
    let dir = tempdir().unwrap();
    let env = MockEnv::from_pairs([("X_A_B_C", "from-env")]);
    let loader = Loader::builder()
        .with_config_name("integration")
        .with_config_path(dir.path())
        .with_env_prefix("X")
        .with_env_source(env)
        .build();

    let mut config = Deep::default();
    loader.load(&mut config).unwrap();
    assert_eq!(config.a.b.c, "from-env");
}

#[test]
fn test_process_environment_is_read_at_load_time() {
    let dir = tempdir().unwrap();
    let loader = Loader::builder()
        .with_config_name("integration")
        .with_config_path(dir.path())
        .with_env_prefix("CONFLOADER_IT_PROC")
        .build();

    let mut config = AppConfig::default();
    loader.load(&mut config).unwrap();
    assert_eq!(config.server.port, 8080);

    std::env::set_var("CONFLOADER_IT_PROC_SERVER_PORT", "6060");
    let mut config = AppConfig::default();
    let result = loader.load(&mut config);
    std::env::remove_var("CONFLOADER_IT_PROC_SERVER_PORT");

    result.unwrap();
    assert_eq!(config.server.port, 6060);
}

#[test]
fn test_non_struct_target_is_rejected_without_io() {
    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(transparent)]
    struct Port(u16);
    impl Schema for Port {}

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(transparent)]
    struct Hosts(Vec<String>);
    impl Schema for Hosts {}

    let dir = tempdir().unwrap();
    // Would fail to parse if it were read
    fs::write(dir.path().join("integration.yaml"), "[broken\n").unwrap();
    let env = CountingEnv::default();
    let lookups = env.lookups.clone();
    let loader = loader_in(&dir, env);

    let mut port = Port(1);
    assert!(matches!(
        loader.load(&mut port),
        Err(ConfigError::InvalidTarget(_))
    ));
    assert_eq!(port, Port(1));

    let mut hosts = Hosts::default();
    assert!(matches!(
        loader.load(&mut hosts),
        Err(ConfigError::InvalidTarget(_))
    ));

    assert_eq!(lookups.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_file_is_not_an_error() {
    let dir = tempdir().unwrap();
    let env = CountingEnv::default();
    let lookups = env.lookups.clone();

    let mut config = AppConfig::default();
    let resolved = loader_in(&dir, env).load_with_sources(&mut config).unwrap();

    assert_eq!(config.server.port, 8080);
    assert_eq!(resolved.file_path(), None);
    assert_eq!(resolved.source_of("server.port"), Some(ValueSource::Default));
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
}

#[test]
fn test_json_config_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("integration.json"), r#"{"server": {"port": 4040}}"#).unwrap();
    let loader = Loader::builder()
        .with_config_name("integration")
        .with_config_path(dir.path())
        .with_config_type(FileFormat::Json)
        .with_env_source(MockEnv::new())
        .build();

    let mut config = AppConfig::default();
    loader.load(&mut config).unwrap();
    assert_eq!(config.server.port, 4040);
}

#[test]
fn test_loader_is_shareable_across_threads() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("integration.yaml"), "server:\n  port: 7070\n").unwrap();
    let loader = Arc::new(loader_in(&dir, MockEnv::new()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = Arc::clone(&loader);
            std::thread::spawn(move || {
                let mut config = AppConfig::default();
                loader.load(&mut config).map(|()| config)
            })
        })
        .collect();

    for handle in handles {
        let config = handle.join().unwrap().unwrap();
        assert_eq!(config.server.port, 7070);
    }
}

#[test]
fn test_optional_section_takes_table_default() {
    #[derive(Debug, Default, Serialize, Deserialize)]
    struct WithTls {
        tls: Option<Tls>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Tls {
        cert: String,
    }

    impl Schema for WithTls {
        fn declare_defaults(defaults: &mut Defaults) {
            let mut tls = toml::Table::new();
            tls.insert("cert".into(), "/etc/app/cert.pem".into());
            defaults.set("tls", tls);
        }
    }

    let dir = tempdir().unwrap();
    let mut config = WithTls::default();
    loader_in(&dir, MockEnv::new()).load(&mut config).unwrap();
    assert_eq!(
        config.tls.map(|tls| tls.cert).as_deref(),
        Some("/etc/app/cert.pem")
    );
}
