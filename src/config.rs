//! Relay configuration
//!
//! Sources are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `RELAY__*` environment variables (double
//! underscore separates nesting, e.g. `RELAY__LEDGER__MAX_HISTORY=500`).

use crate::error::{RelayError, Result};
use crate::ledger::DEFAULT_MAX_HISTORY;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix
const ENV_PREFIX: &str = "RELAY";

/// Default cap on a single line of agent output (16 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub broadcaster: BroadcasterConfig,
    pub agent: AgentConfig,
}

/// [server] section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// [ledger] section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Entries retained before the oldest are dropped
    pub max_history: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// [broadcaster] section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Events buffered per subscriber before it counts as stalled
    pub channel_capacity: usize,
    /// Seconds between liveness sweeps
    pub sweep_interval_secs: u64,
    /// Seconds without a successful delivery before eviction
    pub stale_timeout_secs: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            sweep_interval_secs: 30,
            stale_timeout_secs: 120,
        }
    }
}

/// [agent] section: how the agent process is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Longest stdout line accepted from the agent; longer lines are skipped
    pub max_line_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "--print".into(),
                "--verbose".into(),
                "--input-format".into(),
                "stream-json".into(),
                "--output-format".into(),
                "stream-json".into(),
            ],
            working_dir: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl RelayConfig {
    /// Load configuration, optionally reading `path` as a TOML file
    ///
    /// A missing explicit file is an error; environment variables always win.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RelayError::Internal(format!("Failed to render configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults_without_sources() {
        let config = RelayConfig::load(None).unwrap();
        assert_eq!(config.server.addr.port(), 3000);
        assert_eq!(config.ledger.max_history, DEFAULT_MAX_HISTORY);
        assert_eq!(config.broadcaster.sweep_interval_secs, 30);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[ledger]\nmax_history = 50\n\n[agent]\ncommand = \"my-agent\"\nargs = [\"--json\"]"
        )
        .unwrap();

        let config = RelayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ledger.max_history, 50);
        assert_eq!(config.agent.command, "my-agent");
        assert_eq!(config.agent.args, vec!["--json".to_string()]);
        // untouched sections keep their defaults
        assert_eq!(config.broadcaster.channel_capacity, 256);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("RELAY__LEDGER__MAX_HISTORY", "42");
        std::env::set_var("RELAY__SERVER__ADDR", "0.0.0.0:4100");
        let config = RelayConfig::load(None);
        std::env::remove_var("RELAY__LEDGER__MAX_HISTORY");
        std::env::remove_var("RELAY__SERVER__ADDR");

        let config = config.unwrap();
        assert_eq!(config.ledger.max_history, 42);
        assert_eq!(config.server.addr.port(), 4100);
    }

    #[test]
    #[serial]
    fn test_missing_file_is_error() {
        let result = RelayConfig::load(Some(Path::new("/nonexistent/relay.toml")));
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn test_toml_rendering() {
        let rendered = RelayConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[ledger]"));
        assert!(rendered.contains("max_history = 1000"));
    }
}
