//! Resource snapshot and leak reconciliation.
//!
//! A snapshot records which channels and mounts exist (and the working
//! directory) before a plugin runs. Reconciling against it closes and
//! unmounts whatever the plugin left behind. Reconciliation never fails:
//! every problem is logged and counted, and the remaining leaks are still
//! processed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::host::{ChannelId, Host};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub channels: BTreeSet<ChannelId>,
    /// Mount points with their mount generation.
    pub mounts: BTreeMap<PathBuf, u64>,
    /// `None` when the working directory could not be read.
    pub cwd: Option<PathBuf>,
}

impl ResourceSnapshot {
    pub fn take(host: &Host) -> Self {
        let cwd = match host.cwd() {
            Ok(cwd) => Some(cwd),
            Err(e) => {
                warn!("Cannot read working directory, it will not be restored: {e}");
                None
            }
        };
        Self {
            channels: host.channels.ids(),
            mounts: host.mounts.generations(),
            cwd,
        }
    }

    /// Channels open now that were not open at snapshot time.
    pub fn leaked_channels(&self, host: &Host) -> Vec<ChannelId> {
        host.channels
            .ids()
            .difference(&self.channels)
            .copied()
            .collect()
    }

    /// Mount points whose current filesystem was not mounted at snapshot
    /// time, including points reused for a different filesystem.
    pub fn leaked_mounts(&self, host: &Host) -> Vec<PathBuf> {
        host.mounts
            .generations()
            .into_iter()
            .filter(|(point, generation)| self.mounts.get(point) != Some(generation))
            .map(|(point, _)| point)
            .collect()
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub closed: Vec<ChannelId>,
    pub unmounted: Vec<PathBuf>,
    pub cwd_restored: bool,
    /// Close, unmount or chdir operations that reported an error.
    pub failures: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.closed.is_empty() && self.unmounted.is_empty() && !self.cwd_restored
    }
}

/// Returns the host to the state captured in `before`.
///
/// Channels are closed before mounts are removed so that virtual channels
/// can still write back to their filesystem.
pub fn reconcile(host: &mut Host, before: &ResourceSnapshot) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for id in before.leaked_channels(host) {
        if let Err(e) = host.channels.close(id) {
            warn!("Failed to close leaked channel {id}: {e}");
            report.failures += 1;
        }
        report.closed.push(id);
    }

    for point in before.leaked_mounts(host) {
        if let Err(e) = host.mounts.unmount(&point) {
            warn!("Failed to unmount leaked filesystem at {}: {e}", point.display());
            report.failures += 1;
        }
        report.unmounted.push(point);
    }

    if let Some(ref cwd) = before.cwd {
        match host.cwd() {
            Ok(now) if &now == cwd => {}
            _ => {
                if let Err(e) = host.chdir(cwd) {
                    warn!("Failed to restore working directory {}: {e}", cwd.display());
                    report.failures += 1;
                } else {
                    report.cwd_restored = true;
                }
            }
        }
    }

    if !report.is_clean() {
        debug!(
            "Reconciled {} channel(s), {} mount(s), cwd restored: {}",
            report.closed.len(),
            report.unmounted.len(),
            report.cwd_restored
        );
    }
    report
}
