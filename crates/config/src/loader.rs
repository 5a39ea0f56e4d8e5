use std::path::Path;

use anyhow::bail;

use crate::{Config, upstream};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "Config file {} not found, starting with no upstream servers",
                path.display()
            );
            return Ok(Config::default());
        }
        Err(err) => bail!("Failed to read config file {}: {err}", path.display()),
    };

    let config: Config = serde_json::from_str(&content)
        .map_err(|err| anyhow::anyhow!("Failed to parse config file {}: {err}", path.display()))?;

    validate_upstreams(&config)?;

    Ok(config)
}

pub(crate) fn validate_upstreams(config: &Config) -> anyhow::Result<()> {
    for (name, server) in &config.mcp_servers {
        if !upstream::is_valid_name(name) {
            bail!(
                "Invalid upstream server name '{name}': must be 1-100 characters of [A-Za-z0-9_-]"
            );
        }

        if server.command.trim().is_empty() {
            bail!("Upstream server '{name}' has an empty command");
        }
    }

    Ok(())
}
