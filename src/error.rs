//! Error types crossing the plugin / dispatcher boundary.
//!
//! A plugin ends early through exactly one channel, [`ScriptError`].
//! Whether it failed or asked the host to terminate is carried by the
//! variant, never by the message text.

use std::any::Any;

use thiserror::Error;

/// Why a plugin stopped before returning normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The plugin raised an error.
    #[error("{message}")]
    Failed { message: String },

    /// The plugin requested process termination while the exit
    /// interceptor was installed. `message` holds the trimmed console
    /// output captured up to that point.
    #[error("{message}")]
    Exit { code: i32, message: String },
}

impl ScriptError {
    /// Shorthand for a plain plugin failure.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// The intercepted exit code, if this error came from an exit request.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            Self::Failed { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message } | Self::Exit { message, .. } => message,
        }
    }

    /// Converts a panic payload caught around a plugin into a failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::msg(format!("plugin panicked: {detail}"))
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<anyhow::Error> for ScriptError {
    fn from(err: anyhow::Error) -> Self {
        // An exit request wrapped by a plugin's own `?` must stay an exit.
        match err.downcast::<ScriptError>() {
            Ok(script_err) => script_err,
            Err(err) => Self::msg(format!("{err:#}")),
        }
    }
}

/// Errors raised by the dispatcher before any plugin code runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{}", unknown_command_message(.name, .valid))]
    UnknownCommand { name: String, valid: Vec<String> },
}

fn unknown_command_message(name: &str, valid: &[String]) -> String {
    if valid.is_empty() {
        format!("unknown command \"{name}\": no commands are registered")
    } else {
        format!(
            "unknown command \"{name}\": must be one of {}",
            valid.join(", ")
        )
    }
}

/// Errors raised while building the command registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cannot alias \"{alias}\" to unknown command \"{target}\"")]
    UnknownTarget { alias: String, target: String },
}

/// A failed invocation as seen by the caller of `Dispatcher::run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandFailure {
    pub message: String,
    /// Set when the plugin requested a nonzero exit.
    pub exit_code: Option<i32>,
}

impl From<DispatchError> for CommandFailure {
    fn from(err: DispatchError) -> Self {
        Self {
            message: err.to_string(),
            exit_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_only_on_exit_variant() {
        assert_eq!(ScriptError::msg("boom").exit_code(), None);
        let exit = ScriptError::Exit {
            code: 3,
            message: String::new(),
        };
        assert_eq!(exit.exit_code(), Some(3));
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_exit_tag() {
        let original = ScriptError::Exit {
            code: 2,
            message: "oops".to_string(),
        };
        let wrapped = anyhow::Error::new(original.clone());
        assert_eq!(ScriptError::from(wrapped), original);
    }

    #[test]
    fn test_anyhow_plain_error_becomes_failure() {
        let err = anyhow::anyhow!("disk full");
        assert_eq!(ScriptError::from(err), ScriptError::msg("disk full"));
    }

    #[test]
    fn test_anyhow_context_is_kept_in_message() {
        use anyhow::Context;
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("inner")).context("outer");
        let script_err = ScriptError::from(err.unwrap_err());
        assert_eq!(script_err.message(), "outer: inner");
    }

    #[test]
    fn test_panic_payload_str_and_string() {
        let err = ScriptError::from_panic(Box::new("bad state"));
        assert_eq!(err.message(), "plugin panicked: bad state");
        let err = ScriptError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.message(), "plugin panicked: owned");
        let err = ScriptError::from_panic(Box::new(42_u8));
        assert_eq!(err.message(), "plugin panicked: unknown panic payload");
    }

    #[test]
    fn test_unknown_command_message_lists_names() {
        let err = DispatchError::UnknownCommand {
            name: "nope".to_string(),
            valid: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "unknown command \"nope\": must be one of a, b");
    }

    #[test]
    fn test_unknown_command_message_empty_registry() {
        let err = DispatchError::UnknownCommand {
            name: "nope".to_string(),
            valid: vec![],
        };
        assert_eq!(
            err.to_string(),
            "unknown command \"nope\": no commands are registered"
        );
    }
}
