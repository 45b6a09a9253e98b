//! Builtins that talk to the host: `pwd`, `exit` and `help`.

use crate::error::ScriptError;
use crate::plugins::Plugin;
use crate::sandbox::Sandbox;

/// Prints the current working directory.
pub struct PwdPlugin;

impl Plugin for PwdPlugin {
    fn name(&self) -> &str {
        "pwd"
    }

    fn description(&self) -> &str {
        "Print the working directory"
    }

    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError> {
        let cwd = sandbox.cwd()?;
        sandbox.puts(&cwd.display().to_string())?;
        Ok(())
    }
}

/// Requests termination with an optional code.
///
/// Inside the host this never ends the process: the request becomes the
/// invocation's exit outcome.
pub struct ExitPlugin;

impl Plugin for ExitPlugin {
    fn name(&self) -> &str {
        "exit"
    }

    fn description(&self) -> &str {
        "Finish with an exit code (default 0)"
    }

    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError> {
        let code = match sandbox.argv() {
            [] => None,
            [code] => Some(code.parse::<i32>().map_err(|_| {
                ScriptError::msg(format!("expected integer but got \"{code}\""))
            })?),
            _ => return Err(ScriptError::msg("usage: exit ?CODE?")),
        };
        Err(sandbox.exit(code))
    }
}

/// Lists the visible commands with their descriptions.
pub struct HelpPlugin;

impl Plugin for HelpPlugin {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "List available commands"
    }

    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError> {
        let commands = sandbox.commands();
        let width = commands.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        for (name, description) in commands {
            let line = format!("{name:<width$}  {description}");
            sandbox.puts(line.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use crate::dispatch::{Dispatcher, Outcome};
    use crate::host::{Console, ExitHooks, Host, MemorySink};
    use crate::plugins::builtin::register_all;
    use crate::plugins::CommandRegistry;

    fn no_real_exit(code: i32) -> ! {
        panic!("host would have exited with {code}")
    }

    fn setup() -> (Dispatcher, Host) {
        let mut registry = CommandRegistry::new();
        register_all(&mut registry);
        registry.alias("quit", "exit").unwrap();
        let host = Host {
            exit_hooks: ExitHooks::with_primitive(no_real_exit),
            ..Host::with_console(Console::with_sink(MemorySink::new()))
        };
        (Dispatcher::new(registry, "test-host"), host)
    }

    #[test]
    #[serial]
    fn test_pwd_prints_cwd() {
        let (dispatcher, mut host) = setup();
        let text = dispatcher.run(&mut host, "pwd", &[]).unwrap();
        assert_eq!(text, std::env::current_dir().unwrap().display().to_string());
    }

    #[test]
    #[serial]
    fn test_exit_default_code_is_success() {
        let (dispatcher, mut host) = setup();
        let outcome = dispatcher.execute(&mut host, "exit", &[]).unwrap();
        assert_eq!(outcome, Outcome::Exit { code: 0, text: String::new() });
        assert!(outcome.is_success());
    }

    #[test]
    #[serial]
    fn test_exit_with_code_through_alias() {
        let (dispatcher, mut host) = setup();
        let failure = dispatcher
            .run(&mut host, "quit", &["7".to_string()])
            .unwrap_err();
        assert_eq!(failure.exit_code, Some(7));
        assert_eq!(failure.message, "test-host exit code 7");
    }

    #[test]
    #[serial]
    fn test_exit_rejects_bad_code() {
        let (dispatcher, mut host) = setup();
        let failure = dispatcher
            .run(&mut host, "exit", &["seven".to_string()])
            .unwrap_err();
        assert_eq!(failure.message, "expected integer but got \"seven\"");
        assert_eq!(failure.exit_code, None);
    }

    #[test]
    #[serial]
    fn test_help_lists_commands() {
        let (dispatcher, mut host) = setup();
        let text = dispatcher.run(&mut host, "help", &[]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("cat "));
        assert!(text.contains("quit  alias for exit"));
        assert!(text.contains("echo  Print the arguments separated by spaces"));
    }
}
