pub mod system;
pub mod text;

use std::sync::Arc;

use super::CommandRegistry;

pub use system::{ExitPlugin, HelpPlugin, PwdPlugin};
pub use text::{CatPlugin, EchoPlugin};

/// Registers every builtin plugin.
pub fn register_all(registry: &mut CommandRegistry) {
    registry.register(Arc::new(EchoPlugin));
    registry.register(Arc::new(CatPlugin));
    registry.register(Arc::new(PwdPlugin));
    registry.register(Arc::new(ExitPlugin));
    registry.register(Arc::new(HelpPlugin));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let mut registry = CommandRegistry::new();
        register_all(&mut registry);
        assert_eq!(registry.names(), vec!["cat", "echo", "exit", "help", "pwd"]);
    }
}
