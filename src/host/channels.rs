//! Open stream handles ("channels") owned by the host.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::vfs::VirtualFs;

/// Identifier of an open channel. Displays as `chanN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    /// Create or append.
    Append,
}

impl OpenMode {
    fn readable(self) -> bool {
        matches!(self, OpenMode::Read)
    }
}

enum Backing {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
    /// Fully buffered; written back to `fs` on close unless read-only.
    Virtual {
        fs: Arc<dyn VirtualFs>,
        path: PathBuf,
        data: Vec<u8>,
        cursor: usize,
    },
}

struct Channel {
    target: PathBuf,
    mode: OpenMode,
    backing: Backing,
}

#[derive(Default)]
pub struct ChannelTable {
    open: BTreeMap<ChannelId, Channel>,
    next_id: u64,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_file(&mut self, path: &Path, mode: OpenMode) -> io::Result<ChannelId> {
        let backing = match mode {
            OpenMode::Read => Backing::Reader(BufReader::new(File::open(path)?)),
            OpenMode::Write => Backing::Writer(BufWriter::new(File::create(path)?)),
            OpenMode::Append => Backing::Writer(BufWriter::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
        };
        Ok(self.insert(path, mode, backing))
    }

    /// Opens `path` (relative to the filesystem's mount point) on `fs`.
    pub fn open_virtual(
        &mut self,
        fs: Arc<dyn VirtualFs>,
        path: &Path,
        mode: OpenMode,
    ) -> io::Result<ChannelId> {
        let data = match mode {
            OpenMode::Read => fs.read(path)?,
            OpenMode::Write => Vec::new(),
            OpenMode::Append if fs.exists(path) => fs.read(path)?,
            OpenMode::Append => Vec::new(),
        };
        let backing = Backing::Virtual {
            fs,
            path: path.to_path_buf(),
            cursor: 0,
            data,
        };
        Ok(self.insert(path, mode, backing))
    }

    fn insert(&mut self, target: &Path, mode: OpenMode, backing: Backing) -> ChannelId {
        self.next_id += 1;
        let id = ChannelId(self.next_id);
        debug!("Opened {id} on {} ({mode:?})", target.display());
        self.open.insert(
            id,
            Channel {
                target: target.to_path_buf(),
                mode,
                backing,
            },
        );
        id
    }

    fn get_mut(&mut self, id: ChannelId) -> io::Result<&mut Channel> {
        self.open.get_mut(&id).ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("can not find channel named \"{id}\""))
        })
    }

    /// Reads everything remaining on a readable channel.
    pub fn read_to_string(&mut self, id: ChannelId) -> io::Result<String> {
        let channel = self.get_mut(id)?;
        if !channel.mode.readable() {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("channel \"{id}\" wasn't opened for reading"),
            ));
        }
        match &mut channel.backing {
            Backing::Reader(reader) => {
                let mut out = String::new();
                reader.read_to_string(&mut out)?;
                Ok(out)
            }
            Backing::Virtual { data, cursor, .. } => {
                let rest = String::from_utf8_lossy(&data[*cursor..]).into_owned();
                *cursor = data.len();
                Ok(rest)
            }
            Backing::Writer(_) => unreachable!("writers are never readable"),
        }
    }

    pub fn write(&mut self, id: ChannelId, bytes: &[u8]) -> io::Result<()> {
        let channel = self.get_mut(id)?;
        if channel.mode.readable() {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("channel \"{id}\" wasn't opened for writing"),
            ));
        }
        match &mut channel.backing {
            Backing::Writer(writer) => writer.write_all(bytes),
            Backing::Virtual { data, .. } => {
                data.extend_from_slice(bytes);
                Ok(())
            }
            Backing::Reader(_) => unreachable!("readers are never writable"),
        }
    }

    /// Closes a channel. The channel is removed from the table even when
    /// flushing its pending output fails; the flush error is returned.
    pub fn close(&mut self, id: ChannelId) -> io::Result<()> {
        let channel = self.open.remove(&id).ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("can not find channel named \"{id}\""))
        })?;
        debug!("Closing {id} on {}", channel.target.display());
        match channel.backing {
            Backing::Reader(_) => Ok(()),
            Backing::Writer(mut writer) => writer.flush(),
            Backing::Virtual { fs, path, data, .. } => {
                if channel.mode.readable() {
                    Ok(())
                } else {
                    fs.write(&path, &data)
                }
            }
        }
    }

    pub fn ids(&self) -> BTreeSet<ChannelId> {
        self.open.keys().copied().collect()
    }

    /// What a channel was opened on, for diagnostics.
    pub fn target(&self, id: ChannelId) -> Option<&Path> {
        self.open.get(&id).map(|c| c.target.as_path())
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::vfs::MemoryFs;

    #[test]
    fn test_ids_are_sequential_and_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut table = ChannelTable::new();
        let a = table.open_file(&path, OpenMode::Write).unwrap();
        table.close(a).unwrap();
        let b = table.open_file(&path, OpenMode::Read).unwrap();
        assert_eq!(a.to_string(), "chan1");
        assert_eq!(b.to_string(), "chan2");
    }

    #[test]
    fn test_file_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut table = ChannelTable::new();

        let w = table.open_file(&path, OpenMode::Write).unwrap();
        table.write(w, b"line one\n").unwrap();
        table.close(w).unwrap();

        let a = table.open_file(&path, OpenMode::Append).unwrap();
        table.write(a, b"line two\n").unwrap();
        table.close(a).unwrap();

        let r = table.open_file(&path, OpenMode::Read).unwrap();
        assert_eq!(table.read_to_string(r).unwrap(), "line one\nline two\n");
        table.close(r).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ChannelTable::new();
        let err = table
            .open_file(&dir.path().join("absent"), OpenMode::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(table.is_empty());
    }

    #[test]
    fn test_mode_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut table = ChannelTable::new();
        let w = table.open_file(&path, OpenMode::Write).unwrap();
        let err = table.read_to_string(w).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        table.close(w).unwrap();

        let r = table.open_file(&path, OpenMode::Read).unwrap();
        let err = table.write(r, b"x").unwrap_err();
        assert!(err.to_string().contains("wasn't opened for writing"));
    }

    #[test]
    fn test_unknown_channel() {
        let mut table = ChannelTable::new();
        let err = table.close(ChannelId(99)).unwrap_err();
        assert_eq!(err.to_string(), "can not find channel named \"chan99\"");
    }

    #[test]
    fn test_virtual_channel_writes_back_on_close() {
        let fs = Arc::new(MemoryFs::new().with_file("log", "a"));
        let mut table = ChannelTable::new();

        let id = table
            .open_virtual(fs.clone(), Path::new("log"), OpenMode::Append)
            .unwrap();
        table.write(id, b"b").unwrap();
        // Not visible until close
        assert_eq!(fs.read(Path::new("log")).unwrap(), b"a");
        table.close(id).unwrap();
        assert_eq!(fs.read(Path::new("log")).unwrap(), b"ab");

        let id = table
            .open_virtual(fs.clone(), Path::new("log"), OpenMode::Read)
            .unwrap();
        assert_eq!(table.read_to_string(id).unwrap(), "ab");
        assert_eq!(table.read_to_string(id).unwrap(), "");
        table.close(id).unwrap();
    }

    #[test]
    fn test_virtual_close_after_unmount_reports_error_but_removes_channel() {
        let fs = Arc::new(MemoryFs::new());
        let mut table = ChannelTable::new();
        let id = table
            .open_virtual(fs.clone(), Path::new("out"), OpenMode::Write)
            .unwrap();
        table.write(id, b"data").unwrap();
        fs.unmount().unwrap();
        let err = table.close(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(table.is_empty());
    }
}
