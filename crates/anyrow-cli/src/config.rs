use anyhow::Context;
use anyrow_sql::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// libpq-style connection string or `postgres://` URL.
    pub url: String,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        Self::parse(&contents).with_context(|| format!("loading config {path}"))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(anyhow::anyhow!("database url is empty"));
        }
        if self.database.connect_timeout_ms == Some(0) {
            return Err(anyhow::anyhow!("database connect_timeout_ms must be positive"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(anyhow::anyhow!("logging level is empty"));
        }
        self.engine.validate()
    }
}
