use confloader::{Defaults, Loader, Schema};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppConfig {
    app: AppSection,
    database: DatabaseSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppSection {
    name: String,
    debug: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseSection {
    host: String,
    port: u16,
    name: String,
}

impl Schema for AppConfig {
    fn declare_defaults(defaults: &mut Defaults) {
        defaults
            .set("app.name", "demo")
            .set("database.host", "localhost")
            .set("database.port", 5432)
            .set("database.name", "demo");
    }
}

// Try `DEMO_DATABASE_PORT=6543 RUST_LOG=confloader=trace cargo run --example example`
fn main() -> Result<(), confloader::ConfigError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let loader = Loader::builder()
        .with_config_name("demo")
        .with_config_path("demos")
        .with_env_prefix("DEMO")
        .build();

    let mut config = AppConfig::default();
    let resolved = loader.load_with_sources(&mut config)?;

    println!("App: {} (debug={})", config.app.name, config.app.debug);
    println!(
        "Database: {}:{}/{}",
        config.database.host, config.database.port, config.database.name
    );
    for (key, value) in resolved.iter() {
        println!("  {key} <- {}", value.source);
    }

    Ok(())
}
