//! Process-wide state that plugins can disturb.
//!
//! The [`Host`] owns the console, the exit primitive, the open channels and
//! the mount table. Plugins reach all of it only through a `Sandbox`, which
//! is what lets the dispatcher snapshot, intercept and restore it around
//! every invocation.

pub mod channels;
pub mod console;
pub mod exit;
pub mod vfs;

use std::io;
use std::path::{Path, PathBuf};

pub use channels::{ChannelId, ChannelTable, OpenMode};
pub use console::{Console, ConsoleSink, MemorySink, StdConsole, StreamId};
pub use exit::{ExitHooks, ExitPrimitive};
pub use vfs::{MemoryFs, MountTable, VirtualFs};

#[derive(Default)]
pub struct Host {
    pub console: Console,
    pub exit_hooks: ExitHooks,
    pub channels: ChannelTable,
    pub mounts: MountTable,
}

impl Host {
    /// A host attached to the real console and `std::process::exit`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host writing unintercepted output to `console` instead of the
    /// real standard streams.
    pub fn with_console(console: Console) -> Self {
        Self {
            console,
            ..Self::default()
        }
    }

    /// Opens `path`, served by a mounted filesystem when it lies under a
    /// mount point and by the real filesystem otherwise.
    pub fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<ChannelId> {
        match self.mounts.resolve(path) {
            Some((fs, relative)) => self.channels.open_virtual(fs, &relative, mode),
            None => self.channels.open_file(path, mode),
        }
    }

    pub fn cwd(&self) -> io::Result<PathBuf> {
        std::env::current_dir()
    }

    pub fn chdir(&mut self, path: &Path) -> io::Result<()> {
        std::env::set_current_dir(path)
    }

    /// Requests process termination; see [`ExitHooks::request`].
    #[must_use = "an intercepted exit must be returned as the plugin's error"]
    pub fn exit(&mut self, code: Option<i32>) -> crate::error::ScriptError {
        self.exit_hooks.request(code, self.console.captured())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_open_routes_to_mounted_fs() {
        let mut host = Host::with_console(Console::with_sink(MemorySink::new()));
        host.mounts
            .mount("/mem", Arc::new(MemoryFs::new().with_file("greeting", "hi")))
            .unwrap();
        let id = host.open(Path::new("/mem/greeting"), OpenMode::Read).unwrap();
        assert_eq!(host.channels.read_to_string(id).unwrap(), "hi");
        host.channels.close(id).unwrap();
    }

    #[test]
    fn test_open_falls_back_to_real_fs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("real.txt");
        std::fs::write(&path, "disk").unwrap();

        let mut host = Host::with_console(Console::with_sink(MemorySink::new()));
        host.mounts.mount("/mem", Arc::new(MemoryFs::new())).unwrap();
        let id = host.open(&path, OpenMode::Read).unwrap();
        assert_eq!(host.channels.read_to_string(id).unwrap(), "disk");
    }

    #[test]
    fn test_exit_carries_trimmed_capture() {
        fn no_exit(code: i32) -> ! {
            panic!("unexpected real exit {code}")
        }
        let mut host = Host {
            exit_hooks: ExitHooks::with_primitive(no_exit),
            ..Host::with_console(Console::with_sink(MemorySink::new()))
        };
        let capture = host.console.intercept();
        let exit = host.exit_hooks.intercept();
        host.console.write(StreamId::Stdout, "\n bye \n").unwrap();

        let err = host.exit(Some(1));
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.message(), "bye");

        assert_eq!(host.exit_hooks.restore(exit), Some(err));
        let _ = host.console.restore(capture);
    }
}
