//! State shared by shell commands.

use std::sync::Arc;

use sdcard_daemon::SdCardDaemon;
use sdcard_daemon::sim::SimulatedSlot;

use crate::fs_utils::CardFs;

/// What command handlers operate on.
#[derive(Debug)]
pub struct ShellContext {
    /// Readiness-gated file access under the mount root.
    pub fs: CardFs,
    /// The daemon owning the card.
    pub daemon: Arc<SdCardDaemon>,
    /// Simulated slot, when running without hardware.
    pub slot: Option<SimulatedSlot>,
}

impl ShellContext {
    /// Build a context whose file helpers follow the daemon's readiness.
    #[must_use]
    pub fn new(
        mount_root: impl Into<std::path::PathBuf>,
        daemon: Arc<SdCardDaemon>,
        slot: Option<SimulatedSlot>,
    ) -> Self {
        Self {
            fs: CardFs::new(mount_root, Arc::clone(&daemon)),
            daemon,
            slot,
        }
    }
}
