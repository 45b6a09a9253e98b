//! Command dispatch and outcome normalization.
//!
//! `Dispatcher::execute` resolves a command, then wraps the plugin run in
//! the full isolation sequence:
//!
//! 1. snapshot channels, mounts and working directory
//! 2. install output capture, then exit interception
//! 3. run the plugin in a fresh scope (panics are caught)
//! 4. reconcile leaks and restore the working directory
//! 5. remove exit interception, then output capture
//! 6. normalize the result and captured text into an [`Outcome`]
//!
//! Steps 4 and 5 run on every path; nothing in step 3 can skip them. An
//! exit requested in step 3 decides the outcome even when the plugin
//! dropped the error and kept going; output written after the request is
//! discarded.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CommandFailure, DispatchError, ScriptError};
use crate::host::Host;
use crate::plugins::CommandRegistry;
use crate::sandbox::{reconcile, run_in_scope, ResourceSnapshot};

/// One call: the name the caller used plus its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
}

/// The normalized result of one invocation.
///
/// `text` always holds the trimmed console output, prefixed by the error
/// message or exit annotation on failure paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { text: String },
    Exit { code: i32, text: String },
    Error { message: String, text: String },
}

impl Outcome {
    pub fn text(&self) -> &str {
        match self {
            Outcome::Success { text } | Outcome::Exit { text, .. } | Outcome::Error { text, .. } => {
                text
            }
        }
    }

    /// Exit code 0 counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. } | Outcome::Exit { code: 0, .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Outcome::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Projects the outcome onto the caller-facing success/failure split.
    pub fn into_result(self) -> Result<String, CommandFailure> {
        match self {
            Outcome::Success { text } | Outcome::Exit { code: 0, text } => Ok(text),
            Outcome::Exit { code, text } => Err(CommandFailure {
                message: text,
                exit_code: Some(code),
            }),
            Outcome::Error { text, .. } => Err(CommandFailure {
                message: text,
                exit_code: None,
            }),
        }
    }

    fn normalize(host_id: &str, result: Result<(), ScriptError>, captured: &str) -> Self {
        let captured = captured.trim();
        match result {
            Ok(()) => Outcome::Success {
                text: captured.to_string(),
            },
            Err(ScriptError::Exit { code: 0, .. }) => Outcome::Exit {
                code: 0,
                text: captured.to_string(),
            },
            Err(ScriptError::Exit { code, .. }) => Outcome::Exit {
                code,
                text: prefix_line(&format!("{host_id} exit code {code}"), captured),
            },
            Err(ScriptError::Failed { message }) => Outcome::Error {
                text: prefix_line(&message, captured),
                message,
            },
        }
    }
}

fn prefix_line(head: &str, body: &str) -> String {
    format!("{head}\n{body}").trim().to_string()
}

pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    host_id: String,
}

impl Dispatcher {
    /// `host_id` names the host in exit annotations ("<host_id> exit code 2").
    pub fn new(registry: CommandRegistry, host_id: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(registry),
            host_id: host_id.into(),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Runs `name` with `args` in an isolated sandbox on `host`.
    ///
    /// Fails only when the command is unknown; every plugin result,
    /// including errors and exit requests, comes back as an `Outcome`.
    pub fn execute(
        &self,
        host: &mut Host,
        name: &str,
        args: &[String],
    ) -> Result<Outcome, DispatchError> {
        let plugin = self
            .registry
            .resolve(name)
            .ok_or_else(|| DispatchError::UnknownCommand {
                name: name.to_string(),
                valid: self.registry.names(),
            })?;

        let invocation = Invocation {
            command: name.to_string(),
            args: args.to_vec(),
        };
        debug!("Dispatching {} {:?}", invocation.command, invocation.args);

        let snapshot = ResourceSnapshot::take(host);
        let capture = host.console.intercept();
        let exit = host.exit_hooks.intercept();

        let result = run_in_scope(plugin.as_ref(), host, self, &invocation);

        let report = reconcile(host, &snapshot);
        if !report.is_clean() {
            info!(
                "Command '{}' leaked {} channel(s) and {} mount(s), released",
                invocation.command,
                report.closed.len(),
                report.unmounted.len()
            );
        }
        let requested_exit = host.exit_hooks.restore(exit);
        let mut captured = host.console.restore(capture);

        let result = match requested_exit {
            Some(ScriptError::Exit { code, message }) => {
                if !matches!(result, Err(ScriptError::Exit { .. })) {
                    warn!(
                        "Command '{}' ignored its exit request (code {code})",
                        invocation.command
                    );
                }
                captured = message;
                Err(ScriptError::Exit {
                    code,
                    message: captured.clone(),
                })
            }
            _ => result,
        };

        let outcome = Outcome::normalize(&self.host_id, result, &captured);
        debug!(
            "Command '{}' finished: success={}",
            invocation.command,
            outcome.is_success()
        );
        Ok(outcome)
    }

    /// Like [`Dispatcher::execute`], projected onto success text or a
    /// failure (unknown command, plugin error, nonzero exit).
    pub fn run(&self, host: &mut Host, name: &str, args: &[String]) -> Result<String, CommandFailure> {
        self.execute(host, name, args)?.into_result()
    }
}
