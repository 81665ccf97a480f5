use clap::Parser;
use std::path::PathBuf;

/// agentdesk - permissioned AI agent catalog and chat backend
#[derive(Parser, Debug, Clone)]
#[command(name = "agentdesk", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "AGENTDESK_CONFIG", default_value = "agentdesk.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "AGENTDESK_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "AGENTDESK_PORT")]
    pub port: Option<u16>,

    /// Database URL (sqlite://, postgres://, mysql://)
    #[arg(long, env = "AGENTDESK_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Base URL of the streaming prediction service
    #[arg(long, env = "AGENTDESK_PREDICTION_URL")]
    pub prediction_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["agentdesk"]);
        assert_eq!(cli.config, PathBuf::from("agentdesk.toml"));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.database_url.is_none());
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "agentdesk",
            "--config",
            "custom.toml",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--database-url",
            "sqlite://desk.db",
            "--prediction-url",
            "http://flows.local:3000",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.host, Some("0.0.0.0".to_string()));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.database_url.as_deref(), Some("sqlite://desk.db"));
        assert_eq!(cli.prediction_url.as_deref(), Some("http://flows.local:3000"));
    }
}
