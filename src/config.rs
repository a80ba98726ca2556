use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::domain::MAX_LOOKBACK_HOURS;
use crate::history::MAX_RETENTION_HOURS;
use crate::ml::PredictorKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub history: HistoryConfig,
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}
impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn default_request_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig { pub retention_hours: i64 }

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub manifest_file: String,
    pub scaler_file: String,
    /// Fallback order
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub rule_based_fallback: bool,
}

impl ArtifactsConfig {
    pub fn manifest_path(&self) -> PathBuf { self.dir.join(&self.manifest_file) }
    pub fn scaler_path(&self) -> PathBuf { self.dir.join(&self.scaler_file) }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub kind: PredictorKind,
    pub file: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("LSF__").split("__"));
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MAX_LOOKBACK_HOURS..=MAX_RETENTION_HOURS).contains(&self.history.retention_hours) {
            anyhow::bail!(
                "history.retention_hours must be within {MAX_LOOKBACK_HOURS}..={MAX_RETENTION_HOURS}, got {}",
                self.history.retention_hours
            );
        }
        if self.artifacts.models.is_empty() && !self.artifacts.rule_based_fallback {
            anyhow::bail!("no predictors configured: add artifacts.models or enable rule_based_fallback");
        }
        if let Some(m) = self.artifacts.models.iter().find(|m| m.kind == PredictorKind::RuleBased) {
            anyhow::bail!("model {}: rule_based is enabled with artifacts.rule_based_fallback, not as a model file", m.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8080

        [history]
        retention_hours = 168

        [artifacts]
        dir = "artifacts"
        manifest_file = "manifest.json"
        scaler_file = "scaler.json"
        rule_based_fallback = true

        [[artifacts.models]]
        id = "xgboost"
        kind = "gradient_boosted_trees"
        file = "xgboost.json"

        [[artifacts.models]]
        id = "random_forest"
        kind = "random_forest"
        file = "random_forest.json"
    "#;

    fn parse(toml: &str) -> Config {
        Figment::new().merge(Toml::string(toml)).extract().unwrap()
    }

    #[test]
    fn test_parse_and_validate() {
        let config = parse(TOML);
        config.validate().unwrap();
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
        let ids: Vec<_> = config.artifacts.models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["xgboost", "random_forest"]);
        assert_eq!(config.artifacts.models[1].kind, PredictorKind::RandomForest);
        assert_eq!(config.artifacts.scaler_path(), PathBuf::from("artifacts/scaler.json"));
    }

    #[test]
    fn test_short_retention_rejected() {
        let mut config = parse(TOML);
        config.history.retention_hours = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbounded_retention_rejected() {
        let mut config = parse(TOML);
        config.history.retention_hours = MAX_RETENTION_HOURS;
        config.validate().unwrap();
        config.history.retention_hours = i64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("168..=8760"));
    }

    #[test]
    fn test_no_predictors_rejected() {
        let mut config = parse(TOML);
        config.artifacts.models.clear();
        config.validate().unwrap();
        config.artifacts.rule_based_fallback = false;
        assert!(config.validate().is_err());
    }
}
