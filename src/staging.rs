// Staged swap files next to the target
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use tempfile::{Builder, TempPath};

use crate::defaults::STAGED_PREFIX;
use crate::error::Result;
use crate::interrupt::{register_cleanup, with_signals_blocked, CleanupRegistration};
use crate::{debug, warn};

/// A uniquely named file in the target's directory, so it can be renamed
/// over the target atomically. Removed on drop and on interruption unless
/// persisted.
#[derive(Debug)]
pub struct StagedFile {
    // Dropped first: the file goes before the signal handler forgets it
    path: TempPath,
    _cleanup: CleanupRegistration,
}

impl StagedFile {
    /// Create an empty staged file (mode 0600) in `dir`
    pub fn create_in(dir: &Path) -> Result<Self> {
        with_signals_blocked(|| {
            let path = Builder::new()
                .prefix(STAGED_PREFIX)
                .tempfile_in(dir)?
                .into_temp_path();
            let cleanup = register_cleanup(&path)?;
            debug!("staged {}", path.display());
            Ok(Self {
                path,
                _cleanup: cleanup,
            })
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename over `target`, replacing it in one step
    pub fn persist(self, target: &Path) -> Result<()> {
        let StagedFile { path, _cleanup } = self;
        path.persist(target).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Staged files left behind in `dir` by an earlier run that died hard
pub fn find_orphans(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}*",
        Pattern::escape(&dir.to_string_lossy()),
        STAGED_PREFIX
    );

    let mut orphans = Vec::new();
    let entries = match glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Invalid pattern {}: {}", pattern, e);
            return Ok(orphans);
        }
    };
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot read {}: {}", e.path().display(), e);
                continue;
            }
        };
        if fs::symlink_metadata(&path)?.is_file() {
            orphans.push(path);
        }
    }
    orphans.sort();
    Ok(orphans)
}
