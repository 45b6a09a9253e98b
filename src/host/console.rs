//! Host console with stackable output capture.
//!
//! The console forwards writes to a base [`ConsoleSink`] (the real
//! stdout/stderr by default). Installing a capture layer with
//! [`Console::intercept`] diverts both streams into an in-memory buffer
//! until the matching [`Console::restore`]. Layers nest: only the top one
//! receives writes.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

/// One of the two standard console streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Stdout,
    Stderr,
}

/// Where console output goes when nothing is capturing it.
pub trait ConsoleSink: Send {
    fn write(&mut self, stream: StreamId, data: &str) -> io::Result<()>;

    fn flush(&mut self, stream: StreamId) -> io::Result<()>;

    /// Clears the visible console, if the sink has such a notion.
    fn clear(&mut self, _stream: StreamId) -> io::Result<()> {
        Ok(())
    }
}

/// The process's real standard streams.
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write(&mut self, stream: StreamId, data: &str) -> io::Result<()> {
        match stream {
            StreamId::Stdout => io::stdout().lock().write_all(data.as_bytes()),
            StreamId::Stderr => io::stderr().lock().write_all(data.as_bytes()),
        }
    }

    fn flush(&mut self, stream: StreamId) -> io::Result<()> {
        match stream {
            StreamId::Stdout => io::stdout().flush(),
            StreamId::Stderr => io::stderr().flush(),
        }
    }

    fn clear(&mut self, stream: StreamId) -> io::Result<()> {
        // ANSI: erase display, cursor home
        self.write(stream, "\x1b[2J\x1b[1;1H")?;
        self.flush(stream)
    }
}

/// In-memory sink, shared through cheap clones.
///
/// Used when the host is embedded somewhere without a terminal, and in tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    contents: Arc<Mutex<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, both streams interleaved.
    pub fn contents(&self) -> String {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConsoleSink for MemorySink {
    fn write(&mut self, _stream: StreamId, data: &str) -> io::Result<()> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(data);
        Ok(())
    }

    fn flush(&mut self, _stream: StreamId) -> io::Result<()> {
        Ok(())
    }

    fn clear(&mut self, _stream: StreamId) -> io::Result<()> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Proof of an installed capture layer. Hand it back to
/// [`Console::restore`] to remove the layer.
#[derive(Debug)]
#[must_use = "a capture layer stays installed until its token is restored"]
pub struct CaptureToken {
    id: u64,
}

struct CaptureLayer {
    id: u64,
    buffer: String,
}

pub struct Console {
    base: Box<dyn ConsoleSink>,
    layers: Vec<CaptureLayer>,
    next_id: u64,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// A console writing to the real standard streams.
    pub fn new() -> Self {
        Self::with_sink(StdConsole)
    }

    pub fn with_sink(sink: impl ConsoleSink + 'static) -> Self {
        Self {
            base: Box::new(sink),
            layers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn write(&mut self, stream: StreamId, data: &str) -> io::Result<()> {
        match self.layers.last_mut() {
            Some(layer) => {
                layer.buffer.push_str(data);
                Ok(())
            }
            None => self.base.write(stream, data),
        }
    }

    /// Accepted as a no-op while captured.
    pub fn flush(&mut self, stream: StreamId) -> io::Result<()> {
        if self.is_intercepted() {
            return Ok(());
        }
        self.base.flush(stream)
    }

    /// Accepted as a no-op while captured.
    pub fn clear(&mut self, stream: StreamId) -> io::Result<()> {
        if self.is_intercepted() {
            return Ok(());
        }
        self.base.clear(stream)
    }

    /// Installs a fresh, empty capture layer on top of the stack.
    pub fn intercept(&mut self) -> CaptureToken {
        self.next_id += 1;
        let id = self.next_id;
        self.layers.push(CaptureLayer {
            id,
            buffer: String::new(),
        });
        CaptureToken { id }
    }

    /// Removes the layer installed by `token` and returns what it captured.
    ///
    /// Layers stacked above it are discarded first so the console ends up
    /// exactly as it was before the matching `intercept`.
    pub fn restore(&mut self, token: CaptureToken) -> String {
        let Some(pos) = self.layers.iter().position(|l| l.id == token.id) else {
            warn!("Ignoring stale console capture token {}", token.id);
            return String::new();
        };
        let above = self.layers.len() - pos - 1;
        if above > 0 {
            warn!("Discarding {above} unreleased console capture layer(s)");
        }
        self.layers.truncate(pos + 1);
        self.layers
            .pop()
            .map(|layer| layer.buffer)
            .unwrap_or_default()
    }

    /// Contents of the active capture buffer, or `""` when not capturing.
    pub fn captured(&self) -> &str {
        self.layers
            .last()
            .map(|layer| layer.buffer.as_str())
            .unwrap_or("")
    }

    pub fn is_intercepted(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn writer(&mut self, stream: StreamId) -> ConsoleWriter<'_> {
        ConsoleWriter {
            console: self,
            stream,
            pending: Vec::new(),
        }
    }
}

/// `std::io::Write` adapter over one console stream.
///
/// A UTF-8 sequence split across two `write` calls is held back until it
/// is complete. Invalid bytes become U+FFFD.
pub struct ConsoleWriter<'a> {
    console: &'a mut Console,
    stream: StreamId,
    /// Bytes of an incomplete trailing UTF-8 sequence.
    pending: Vec<u8>,
}

impl ConsoleWriter<'_> {
    /// Decodes as much of `pending` as possible, leaving only an
    /// incomplete trailing sequence behind.
    fn decode_pending(&mut self) -> String {
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }
}

impl Write for ConsoleWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        let text = self.decode_pending();
        if !text.is_empty() {
            self.console.write(self.stream, &text)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush(self.stream)
    }
}

impl Drop for ConsoleWriter<'_> {
    fn drop(&mut self) {
        // Whatever is left can no longer be completed
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            if let Err(e) = self.console.write(self.stream, &rest) {
                warn!("Dropping {} undecodable console byte(s): {e}", self.pending.len());
            }
        }
    }
}
