//! Command registry: maps command names to plugins.
//!
//! Built once at startup (builtins, externally supplied plugins, configured
//! aliases and reserved names), then moved into the `Dispatcher`, which
//! only ever reads it.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{FnPlugin, Plugin};
use crate::config::CommandsConfig;
use crate::error::{RegistryError, ScriptError};
use crate::sandbox::Sandbox;

/// Prefix marking internal helper units that are never dispatchable.
pub const RESERVED_PREFIX: char = '_';

#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn Plugin>>,
    aliases: BTreeMap<String, String>,
    reserved: BTreeSet<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under its own name, replacing any earlier one.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.commands.insert(name.clone(), plugin).is_some() {
            warn!("Plugin '{name}' registered twice, keeping the latest");
        } else {
            debug!("Registered plugin '{name}'");
        }
    }

    pub fn register_fn<F>(&mut self, name: &str, description: &str, body: F)
    where
        F: Fn(&mut Sandbox<'_>) -> Result<(), ScriptError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnPlugin::new(name, description, body)));
    }

    /// Makes `alias` dispatch to the registered command `target`.
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<(), RegistryError> {
        if !self.commands.contains_key(target) {
            return Err(RegistryError::UnknownTarget {
                alias: alias.to_string(),
                target: target.to_string(),
            });
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Hides `name` from listing and dispatch.
    pub fn reserve(&mut self, name: &str) {
        self.reserved.insert(name.to_string());
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        name.starts_with(RESERVED_PREFIX) || self.reserved.contains(name)
    }

    /// Applies reserved names and aliases from the configuration.
    pub fn apply(&mut self, config: &CommandsConfig) -> Result<(), RegistryError> {
        for name in &config.reserved {
            self.reserve(name);
        }
        for (alias, target) in &config.aliases {
            self.alias(alias, target)?;
        }
        Ok(())
    }

    /// Looks up a dispatchable command, following aliases.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        if self.is_reserved(name) {
            return None;
        }
        let target = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        if self.is_reserved(target) {
            return None;
        }
        self.commands.get(target).cloned()
    }

    /// All dispatchable names (commands and aliases), sorted.
    pub fn names(&self) -> Vec<String> {
        self.commands
            .keys()
            .chain(self.aliases.keys())
            .filter(|name| self.resolve(name).is_some())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Visible command names paired with descriptions, sorted by name.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let plugin = self.resolve(&name)?;
                let description = match self.aliases.get(&name) {
                    Some(target) => format!("alias for {target}"),
                    None => plugin.description().to_string(),
                };
                Some((name, description))
            })
            .collect()
    }

    /// Number of dispatchable names.
    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[&str]) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        for name in names {
            registry.register_fn(name, &format!("{name} command"), |_| Ok(()));
        }
        registry
    }

    #[test]
    fn test_names_are_sorted() {
        let registry = registry_with(&["zeta", "alpha", "mid"]);
        assert_eq!(registry.names(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_reserved_prefix_is_hidden() {
        let registry = registry_with(&["_init", "run"]);
        assert_eq!(registry.names(), vec!["run"]);
        assert!(registry.resolve("_init").is_none());
    }

    #[test]
    fn test_configured_reserved_name_is_hidden() {
        let mut registry = registry_with(&["boot", "run"]);
        registry.reserve("boot");
        assert_eq!(registry.names(), vec!["run"]);
        assert!(registry.resolve("boot").is_none());
    }

    #[test]
    fn test_alias_resolves_and_is_listed() {
        let mut registry = registry_with(&["list"]);
        registry.alias("ls", "list").unwrap();
        assert_eq!(registry.resolve("ls").unwrap().name(), "list");
        assert_eq!(registry.names(), vec!["list", "ls"]);
        let described = registry.describe();
        assert_eq!(described[1], ("ls".to_string(), "alias for list".to_string()));
    }

    #[test]
    fn test_alias_to_unknown_target_fails() {
        let mut registry = registry_with(&["list"]);
        let err = registry.alias("ls", "lst").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot alias \"ls\" to unknown command \"lst\""
        );
    }

    #[test]
    fn test_alias_to_reserved_target_is_hidden() {
        let mut registry = registry_with(&["_helper"]);
        registry.alias("helper", "_helper").unwrap();
        assert!(registry.resolve("helper").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = registry_with(&["dup"]);
        registry.register_fn("dup", "second", |_| Ok(()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("dup").unwrap().description(), "second");
    }

    #[test]
    fn test_apply_config() {
        let mut registry = registry_with(&["help", "secret"]);
        let config = CommandsConfig {
            builtins: true,
            reserved: vec!["secret".to_string()],
            aliases: BTreeMap::from([("?".to_string(), "help".to_string())]),
        };
        registry.apply(&config).unwrap();
        assert_eq!(registry.names(), vec!["?", "help"]);
    }
}
