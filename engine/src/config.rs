use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::{env, path::PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dictionary_path: PathBuf,
    pub scaler_path: PathBuf,
    pub models_dir: PathBuf,
    pub holdout_path: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    /// Defaults, then `engine.toml` (or `$CREDIT_RISK_CONFIG`) if present,
    /// then `CREDIT_RISK_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = env::var("CREDIT_RISK_CONFIG").unwrap_or_else(|_| "engine.toml".to_string());

        Self::defaults()?
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("CREDIT_RISK"))
            .build()?
            .try_deserialize()
    }

    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 3000)?
            .set_default("dictionary_path", "artifacts/dictionary.json")?
            .set_default("scaler_path", "artifacts/scaler.json")?
            .set_default("models_dir", "artifacts/models")?
            .set_default("holdout_path", "artifacts/holdout.json")?
            .set_default("log_filter", "credit_risk_engine=info,tower_http=debug")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
