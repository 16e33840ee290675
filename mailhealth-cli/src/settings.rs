//! Loading [`ToolboxConfig`] from an optional TOML file plus flag overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use mailhealth_toolbox::ToolboxConfig;

/// Read `path` (all sections optional) or start from defaults, then apply overrides.
pub fn load(
    path: Option<&Path>,
    scanner_url: Option<&str>,
    nameserver: Option<IpAddr>,
) -> Result<ToolboxConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<ToolboxConfig>(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => ToolboxConfig::default(),
    };

    if let Some(url) = scanner_url {
        config.scanner.base_url = url.to_string();
    }
    if let Some(ip) = nameserver {
        config.dns.nameserver = Some(ip);
    }

    config.validate()?;
    Ok(config)
}
