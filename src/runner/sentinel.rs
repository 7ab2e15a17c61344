//! Filesystem overrides: a file named after an event kind (e.g. `HARD_SHUTDOWN`) in the
//! sentinel directory is consumed once per runner tick and turned into that event.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::events::EventKind;

/// Source stamped on events raised from sentinel files.
pub const SENTINEL_SOURCE: &str = "SENTINEL";

#[derive(Debug, Clone)]
pub struct SentinelDir {
    dir: PathBuf,
}

impl SentinelDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Removes every recognised sentinel file and returns its event kinds:
    /// `HARD_SHUTDOWN` first, so a mode switch raised in the same poll cannot discard it,
    /// then the rest in name order.
    ///
    /// Unrecognised files are left alone. A sentinel that cannot be removed is skipped
    /// so it is not raised again on every tick.
    pub fn poll(&self) -> Vec<EventKind> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut found: Vec<(EventKind, PathBuf)> = entries
            .flatten()
            .filter_map(|e| {
                let kind = e.file_name().to_str()?.parse::<EventKind>().ok()?;
                Some((kind, e.path()))
            })
            .collect();
        found.sort_by_key(|(kind, path)| (*kind != EventKind::HardShutdown, path.clone()));

        let mut kinds = Vec::with_capacity(found.len());
        for (kind, path) in found {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(%kind, "sentinel override consumed");
                    kinds.push(kind);
                }
                Err(err) => warn!(file = %path.display(), error = %err, "sentinel not removable; ignored"),
            }
        }
        if kinds.is_empty() {
            debug!(dir = %self.dir.display(), "no sentinels");
        }
        kinds
    }

    /// Places a sentinel for `kind`; the running device picks it up on its next tick.
    pub fn request(&self, kind: EventKind) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(kind.as_str());
        std::fs::write(&path, b"")?;
        Ok(path)
    }
}
