//! Virtual filesystems and the host mount table.
//!
//! A mount makes a [`VirtualFs`] visible under a mount point; paths below
//! that point are served by the filesystem instead of the real disk
//! (see `Host::open`).

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// A filesystem that can be mounted into the host.
///
/// Paths passed to `read`/`write`/`exists` are relative to the mount point.
pub trait VirtualFs: Send + Sync {
    /// Short type name shown in logs (e.g. `"memory"`).
    fn kind(&self) -> &str;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Called once when the filesystem is removed from the mount table.
    fn unmount(&self) -> io::Result<()>;
}

fn not_mounted() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "filesystem is not mounted")
}

/// Filesystem kept entirely in memory.
pub struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    detached: AtomicBool,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            detached: AtomicBool::new(false),
        }
    }

    /// Builder-style helper to preload a file.
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), contents.into());
        self
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn check_attached(&self) -> io::Result<()> {
        if self.is_detached() {
            return Err(not_mounted());
        }
        Ok(())
    }
}

impl VirtualFs for MemoryFs {
    fn kind(&self) -> &str {
        "memory"
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.check_attached()?;
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no such file in memory filesystem"))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.check_attached()?;
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        !self.is_detached()
            && self
                .files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(path)
    }

    fn unmount(&self) -> io::Result<()> {
        if self.detached.swap(true, Ordering::SeqCst) {
            return Err(not_mounted());
        }
        Ok(())
    }
}

struct Mounted {
    /// Unique per `mount` call, so a point reused for a new filesystem is
    /// told apart from the one mounted there earlier.
    generation: u64,
    fs: Arc<dyn VirtualFs>,
}

/// All currently mounted virtual filesystems, keyed by mount point.
#[derive(Default)]
pub struct MountTable {
    mounts: BTreeMap<PathBuf, Mounted>,
    next_generation: u64,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&mut self, point: impl Into<PathBuf>, fs: Arc<dyn VirtualFs>) -> io::Result<()> {
        let point = point.into();
        if self.mounts.contains_key(&point) {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} is already a mount point", point.display()),
            ));
        }
        self.next_generation += 1;
        debug!(
            "Mounting {} filesystem at {} (generation {})",
            fs.kind(),
            point.display(),
            self.next_generation
        );
        self.mounts.insert(
            point,
            Mounted {
                generation: self.next_generation,
                fs,
            },
        );
        Ok(())
    }

    /// Removes the mount at `point`.
    ///
    /// The entry is gone afterwards even if the filesystem reports an
    /// error from its own `unmount`; that error is returned.
    pub fn unmount(&mut self, point: &Path) -> io::Result<()> {
        let Mounted { fs, .. } = self.mounts.remove(point).ok_or_else(|| {
            io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a mount point", point.display()),
            )
        })?;
        debug!("Unmounting {} filesystem at {}", fs.kind(), point.display());
        fs.unmount()
    }

    pub fn points(&self) -> BTreeSet<PathBuf> {
        self.mounts.keys().cloned().collect()
    }

    /// Mount points with the generation of the filesystem mounted there.
    pub fn generations(&self) -> BTreeMap<PathBuf, u64> {
        self.mounts
            .iter()
            .map(|(point, mounted)| (point.clone(), mounted.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Finds the filesystem serving `path`, using the longest matching
    /// mount point. Returns the filesystem and the path relative to it.
    pub fn resolve(&self, path: &Path) -> Option<(Arc<dyn VirtualFs>, PathBuf)> {
        self.mounts
            .iter()
            .filter(|(point, _)| path.starts_with(point))
            .max_by_key(|(point, _)| point.components().count())
            .and_then(|(point, mounted)| {
                let relative = path.strip_prefix(point).ok()?.to_path_buf();
                Some((Arc::clone(&mounted.fs), relative))
            })
    }
}
