use config::{Config, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod validator;

use crate::bridge::BridgeConfig;
use crate::cli::Cli;
use crate::domain::auth::AuthConfig;
use crate::domain::{AgentSeed, ApplicationDefinition};
use crate::persistence::PersistenceConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: PersistenceConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Seed applications, from `config/applications/*`
    #[serde(default)]
    pub applications: Vec<ApplicationDefinition>,
    /// Seed agents, from `config/agents/*`
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthConfig::default(),
            database: PersistenceConfig::default(),
            bridge: BridgeConfig::default(),
            rate_limit: None,
            applications: Vec::new(),
            agents: Vec::new(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let config_path = &cli.config;
        let root = config_path
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(".");

        let mut settings = Self::build(File::from(config_path.clone()).required(false))?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);
        settings.load_external_configs(root)?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn from_root(root: &str) -> Result<Self, anyhow::Error> {
        let config_path = Path::new(root).join("agentdesk");
        let mut settings = Self::build(File::from(config_path).required(false))?;

        settings.load_external_configs(root)?;
        settings.validate()?;

        Ok(settings)
    }

    fn build<S>(source: S) -> Result<Self, anyhow::Error>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let s = Config::builder()
            .add_source(source)
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .build()?;

        Ok(s.try_deserialize()?)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(url) = &cli.database_url {
            self.database.url = url.clone();
        }
        if let Some(url) = &cli.prediction_url {
            self.bridge.prediction_url = Some(url.clone());
        }
    }

    fn load_external_configs(&mut self, root: &str) -> Result<(), anyhow::Error> {
        let applications: Vec<ApplicationDefinition> =
            load_dir(&format!("{}/config/applications", root))?;
        let agents: Vec<AgentSeed> = load_dir(&format!("{}/config/agents", root))?;

        if !applications.is_empty() || !agents.is_empty() {
            tracing::debug!(
                "Loaded {} application and {} agent definition(s) from {}/config",
                applications.len(),
                agents.len(),
                root
            );
        }

        self.applications.extend(applications);
        self.agents.extend(agents);
        Ok(())
    }
}

/// Read every `*.json`, `*.yaml` and `*.yml` file in `path`, in name order
fn load_dir<T: DeserializeOwned>(path: &str) -> Result<Vec<T>, anyhow::Error> {
    let pattern = format!("{}/*", path);
    let mut items = Vec::new();

    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) => {
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if !matches!(ext, "json" | "yaml" | "yml") {
                    continue;
                }

                let content = std::fs::read_to_string(&path)?;
                let item: T = if ext == "json" {
                    serde_json::from_str(&content)
                        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?
                } else {
                    serde_yaml::from_str(&content)
                        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?
                };
                items.push(item);
            }
            Err(e) => tracing::warn!("Failed to read glob entry: {}", e),
        }
    }

    Ok(items)
}
