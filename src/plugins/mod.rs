pub mod builtin;
pub mod registry;

use crate::error::ScriptError;
use crate::sandbox::Sandbox;

/// A plugin command that the host dispatches as if it were builtin.
///
/// Builtins and externally supplied plugins all implement this trait.
/// The dispatcher calls `run()` inside a fresh sandbox; everything the
/// plugin does to host state goes through the `Sandbox` it is handed.
pub trait Plugin: Send + Sync {
    /// Command name the plugin is registered under (e.g. "echo").
    fn name(&self) -> &str;

    /// One-line description shown by `help` and in unknown-command hints.
    fn description(&self) -> &str {
        ""
    }

    /// Runs the plugin. Returning `Err` ends the invocation as a failure,
    /// or as an exit when the error came from `Sandbox::exit`.
    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError>;
}

/// A plugin backed by a closure.
pub struct FnPlugin<F> {
    name: String,
    description: String,
    body: F,
}

impl<F> FnPlugin<F>
where
    F: Fn(&mut Sandbox<'_>) -> Result<(), ScriptError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            body,
        }
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut Sandbox<'_>) -> Result<(), ScriptError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError> {
        (self.body)(sandbox)
    }
}

pub use registry::CommandRegistry;
