//! Builtins that print text: `echo` and `cat`.

use crate::error::ScriptError;
use crate::host::{OpenMode, StreamId};
use crate::plugins::Plugin;
use crate::sandbox::Sandbox;

/// Prints its arguments separated by single spaces.
pub struct EchoPlugin;

impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Print the arguments separated by spaces"
    }

    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError> {
        let line = sandbox.argv().join(" ");
        sandbox.puts(&line)?;
        Ok(())
    }
}

/// Prints the contents of each file argument.
///
/// Paths under a mount point are read from the mounted filesystem.
pub struct CatPlugin;

impl Plugin for CatPlugin {
    fn name(&self) -> &str {
        "cat"
    }

    fn description(&self) -> &str {
        "Print the contents of files"
    }

    fn run(&self, sandbox: &mut Sandbox<'_>) -> Result<(), ScriptError> {
        if sandbox.argv().is_empty() {
            return Err(ScriptError::msg("usage: cat PATH..."));
        }
        for path in sandbox.argv().to_vec() {
            let channel = sandbox.open(&path, OpenMode::Read)?;
            let contents = sandbox.read(channel)?;
            sandbox.close(channel)?;
            sandbox.write(StreamId::Stdout, &contents)?;
        }
        Ok(())
    }
}
