//! Configuration display command

use agent_relay::{error::Result, RelayConfig};

/// Print the effective configuration (defaults, file, environment)
pub fn handle(config: &RelayConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
