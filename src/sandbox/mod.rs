//! Per-invocation execution scope.
//!
//! Every dispatch builds a fresh [`Scope`] seeded with `argv0`/`argv`,
//! hands the plugin a [`Sandbox`] over that scope and the host, and drops
//! the whole scope once the plugin is done, however it finished. The
//! `Sandbox` is the only door from plugin code to host state; interceptor
//! installation, registry mutation and teardown are not reachable from it.

pub mod reconcile;

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::dispatch::{Dispatcher, Invocation, Outcome};
use crate::error::{DispatchError, ScriptError};
use crate::host::console::ConsoleWriter;
use crate::host::{ChannelId, Host, OpenMode, StreamId, VirtualFs};
use crate::plugins::Plugin;

pub use reconcile::{reconcile, ReconcileReport, ResourceSnapshot};

/// A scope variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

/// A command defined by a plugin inside its own scope.
pub type LocalCommand =
    Arc<dyn Fn(&mut Sandbox<'_>, &[String]) -> Result<(), ScriptError> + Send + Sync>;

/// Variables and local commands of one invocation.
#[derive(Default)]
pub struct Scope {
    variables: HashMap<String, Value>,
    commands: HashMap<String, LocalCommand>,
}

impl Scope {
    fn seeded(invocation: &Invocation) -> Self {
        let mut scope = Scope::default();
        scope.set("argv0", invocation.command.as_str());
        scope.set("argv", invocation.args.clone());
        scope
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.variables.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn define(&mut self, name: &str, command: LocalCommand) {
        self.commands.insert(name.to_string(), command);
    }

    fn command(&self, name: &str) -> Option<LocalCommand> {
        self.commands.get(name).cloned()
    }

    /// Number of variables plus local commands.
    pub fn len(&self) -> usize {
        self.variables.len() + self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The plugin's view of the host for the duration of one invocation.
pub struct Sandbox<'a> {
    host: &'a mut Host,
    dispatcher: &'a Dispatcher,
    scope: &'a mut Scope,
}

impl<'a> Sandbox<'a> {
    /// The command name this invocation was dispatched under.
    pub fn argv0(&self) -> &str {
        match self.scope.get("argv0") {
            Some(Value::Scalar(name)) => name,
            _ => "",
        }
    }

    /// Positional arguments, as seeded (plugins may overwrite `argv`).
    pub fn argv(&self) -> &[String] {
        match self.scope.get("argv") {
            Some(Value::List(args)) => args,
            _ => &[],
        }
    }

    pub fn scope(&self) -> &Scope {
        &*self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut *self.scope
    }

    // ── Console ──────────────────────────────────────────

    pub fn write(&mut self, stream: StreamId, data: &str) -> io::Result<()> {
        self.host.console.write(stream, data)
    }

    /// Writes `line` plus a newline to stdout.
    pub fn puts(&mut self, line: &str) -> io::Result<()> {
        self.write(StreamId::Stdout, line)?;
        self.write(StreamId::Stdout, "\n")
    }

    /// Writes `line` plus a newline to stderr.
    pub fn eputs(&mut self, line: &str) -> io::Result<()> {
        self.write(StreamId::Stderr, line)?;
        self.write(StreamId::Stderr, "\n")
    }

    pub fn stdout(&mut self) -> ConsoleWriter<'_> {
        self.host.console.writer(StreamId::Stdout)
    }

    pub fn stderr(&mut self) -> ConsoleWriter<'_> {
        self.host.console.writer(StreamId::Stderr)
    }

    pub fn flush(&mut self, stream: StreamId) -> io::Result<()> {
        self.host.console.flush(stream)
    }

    pub fn clear(&mut self, stream: StreamId) -> io::Result<()> {
        self.host.console.clear(stream)
    }

    // ── Termination ──────────────────────────────────────

    /// Requests host termination. Inside a dispatch this is always
    /// intercepted; the returned error must be propagated:
    ///
    /// ```ignore
    /// return Err(sandbox.exit(2));
    /// ```
    ///
    /// A dropped error does not cancel the request: the dispatcher still
    /// reports the exit, with the output written up to this call.
    #[must_use = "an intercepted exit must be returned as the plugin's error"]
    pub fn exit(&mut self, code: impl Into<Option<i32>>) -> ScriptError {
        self.host.exit(code.into())
    }

    // ── Channels and mounts ──────────────────────────────

    pub fn open(&mut self, path: impl AsRef<Path>, mode: OpenMode) -> Result<ChannelId, ScriptError> {
        let path = path.as_ref();
        self.host.open(path, mode).map_err(|e| {
            ScriptError::msg(format!("couldn't open \"{}\": {e}", path.display()))
        })
    }

    pub fn read(&mut self, channel: ChannelId) -> Result<String, ScriptError> {
        Ok(self.host.channels.read_to_string(channel)?)
    }

    pub fn write_channel(&mut self, channel: ChannelId, data: &str) -> Result<(), ScriptError> {
        Ok(self.host.channels.write(channel, data.as_bytes())?)
    }

    pub fn close(&mut self, channel: ChannelId) -> Result<(), ScriptError> {
        Ok(self.host.channels.close(channel)?)
    }

    pub fn mount(&mut self, point: impl Into<PathBuf>, fs: Arc<dyn VirtualFs>) -> Result<(), ScriptError> {
        Ok(self.host.mounts.mount(point, fs)?)
    }

    pub fn unmount(&mut self, point: impl AsRef<Path>) -> Result<(), ScriptError> {
        Ok(self.host.mounts.unmount(point.as_ref())?)
    }

    // ── Working directory ────────────────────────────────

    pub fn cwd(&self) -> Result<PathBuf, ScriptError> {
        Ok(self.host.cwd()?)
    }

    pub fn chdir(&mut self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        let path = path.as_ref();
        self.host.chdir(path).map_err(|e| {
            ScriptError::msg(format!("couldn't change working directory to \"{}\": {e}", path.display()))
        })
    }

    // ── Commands ─────────────────────────────────────────

    /// Defines a command visible only inside this invocation.
    pub fn define<F>(&mut self, name: &str, command: F)
    where
        F: Fn(&mut Sandbox<'_>, &[String]) -> Result<(), ScriptError> + Send + Sync + 'static,
    {
        self.scope.define(name, Arc::new(command));
    }

    /// Calls a command defined with [`Sandbox::define`].
    pub fn call(&mut self, name: &str, args: &[String]) -> Result<(), ScriptError> {
        let command = self
            .scope
            .command(name)
            .ok_or_else(|| ScriptError::msg(format!("invalid command name \"{name}\"")))?;
        (*command)(self, args)
    }

    /// Dispatches another registered command in its own nested sandbox.
    pub fn invoke(&mut self, name: &str, args: &[String]) -> Result<Outcome, DispatchError> {
        self.dispatcher.execute(self.host, name, args)
    }

    /// Visible command names with their descriptions, sorted by name.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.dispatcher.registry().describe()
    }
}

/// Runs `plugin` in a fresh scope and destroys the scope afterwards.
///
/// A panic inside the plugin is caught and returned as a failure so the
/// caller's teardown always runs. While the plugin runs, the process panic
/// hook is replaced by one that only logs, so the panic report never
/// reaches the real console; the previous hook is put back afterwards.
pub fn run_in_scope(
    plugin: &dyn Plugin,
    host: &mut Host,
    dispatcher: &Dispatcher,
    invocation: &Invocation,
) -> Result<(), ScriptError> {
    let mut scope = Scope::seeded(invocation);
    let result = {
        let mut sandbox = Sandbox {
            host,
            dispatcher,
            scope: &mut scope,
        };
        let previous_hook = panic::take_hook();
        panic::set_hook(Box::new(|info| debug!("Plugin panic contained: {info}")));
        let caught = panic::catch_unwind(AssertUnwindSafe(|| plugin.run(&mut sandbox)));
        panic::set_hook(previous_hook);
        caught.unwrap_or_else(|payload| Err(ScriptError::from_panic(payload)))
    };
    debug!(
        "Destroying scope of {} ({} binding(s))",
        invocation.command,
        scope.len()
    );
    drop(scope);
    result
}
