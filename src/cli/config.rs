// ABOUTME: CLI config command printing the effective configuration

use anyhow::Result;

use gridconn::ConnectorConfig;

/// Print `config` as TOML on stdout
pub fn execute(config: &ConnectorConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
