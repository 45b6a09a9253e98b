use serde::Deserialize;
use std::collections::BTreeMap;

/// Host configuration. Every section is optional.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    /// Name used in exit annotations, e.g. "plugin-host exit code 2"
    #[serde(default = "default_host_id")]
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    /// Register the builtin plugins (echo, cat, pwd, exit, help)
    #[serde(default = "default_builtins")]
    pub builtins: bool,
    /// Names hidden from listing and dispatch, in addition to `_`-prefixed ones
    #[serde(default)]
    pub reserved: Vec<String>,
    /// alias = "target"
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_host_id() -> String {
    "plugin-host".to_string()
}

fn default_builtins() -> bool {
    true
}

fn default_log_filter() -> String {
    "plugin_host=info".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            id: default_host_id(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            builtins: default_builtins(),
            reserved: Vec::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML, expanding environment variables like ${PLUGIN_HOST_ID}
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
