// Swap file resource: status queries and idempotent primitives
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::attributes::FileAttributes;
use crate::defaults::{MIB, MODE, PRIORITY_MAX, PRIORITY_MIN};
use crate::error::{Result, SwapError};
use crate::helpers::unescape_path;
use crate::host::Host;
use crate::strategy::{self, AllocationMethod};
use crate::{debug, info, warn};

/// Swap priority in [-1, 32767]. -1 lets the kernel pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority(i32);

impl Priority {
    pub const SYSTEM: Priority = Priority(-1);

    pub fn new(value: i32) -> Result<Self> {
        if (PRIORITY_MIN..=PRIORITY_MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SwapError::Validation(format!(
                "priority is not between {} and {}",
                PRIORITY_MIN, PRIORITY_MAX
            )))
        }
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn is_system_assigned(&self) -> bool {
        self.0 < 0
    }
}

/// Snapshot of a swap file, always read fresh from the system
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapStatus {
    pub exists: bool,
    pub size_bytes: Option<u64>,
    pub is_formatted: bool,
    pub is_active: bool,
    pub priority: Option<i32>,
}

/// One line of `swapon --show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSwap {
    pub path: PathBuf,
    /// `None` when the priority column is missing or unparsable
    pub priority: Option<i32>,
}

/// What `activate` has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Not active: swapon
    Activate,
    /// Active with the wrong or an unknown priority: swapoff, then swapon
    Reactivate,
    /// Already active as requested
    Keep,
}

/// Decide how to reach "active at `requested`".
///
/// Negative priorities are kernel-assigned, so two negative values are
/// equivalent; only a concrete priority on either side can force a cycle.
pub fn plan_activation(is_active: bool, current: Option<i32>, requested: Priority) -> Activation {
    let requested = requested.get();
    match (is_active, current) {
        (false, _) => Activation::Activate,
        (true, None) => Activation::Reactivate,
        (true, Some(current)) if requested != current && (requested >= 0 || current >= 0) => {
            Activation::Reactivate
        }
        (true, Some(_)) => Activation::Keep,
    }
}

/// Parse `swapon --show=NAME,PRIO --noheadings --raw`
pub fn parse_swapon(output: &str) -> Vec<ActiveSwap> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (name, priority) = match line.rsplit_once(char::is_whitespace) {
                Some((name, prio)) => (name.trim_end(), prio.parse().ok()),
                None => (line, None),
            };
            Some(ActiveSwap {
                path: PathBuf::from(unescape_path(name)),
                priority,
            })
        })
        .collect()
}

/// Drop `.`/trailing separators, then resolve symlinks when the path still
/// exists, so both sides of a path comparison are treated alike
fn normalize(path: &Path) -> PathBuf {
    let cleaned: PathBuf = path.components().collect();
    fs::canonicalize(&cleaned).unwrap_or(cleaned)
}

/// Currently active swap areas
pub fn active_swaps(host: &Host) -> Result<Vec<ActiveSwap>> {
    let out = host.run_checked(&["swapon", "--show=NAME,PRIO", "--noheadings", "--raw"])?;
    Ok(parse_swapon(&out.stdout))
}

/// A swap file at a fixed path. Owns no state besides the path: every query
/// goes to the system.
pub struct SwapFile<'h> {
    path: PathBuf,
    host: &'h Host,
}

impl<'h> SwapFile<'h> {
    pub fn new<P: Into<PathBuf>>(host: &'h Host, path: P) -> Self {
        Self {
            path: path.into(),
            host,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn size(&self) -> Result<Option<u64>> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// True when the file carries a swap signature
    pub fn is_formatted(&self) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        let path = self.path_str();
        let out = self.host.run(&["blkid", "-s", "TYPE", "-o", "value", &path])?;
        // Exit 2: nothing recognised on the file
        match out.code {
            0 => Ok(out.stdout.trim() == "swap"),
            2 => Ok(false),
            _ => Err(SwapError::command("blkid", &out)),
        }
    }

    fn active_entry(&self) -> Result<Option<ActiveSwap>> {
        if !self.exists() {
            return Ok(None);
        }
        let own = normalize(&self.path);
        Ok(active_swaps(self.host)?
            .into_iter()
            .find(|swap| normalize(&swap.path) == own))
    }

    pub fn is_active(&self) -> Result<bool> {
        Ok(self.active_entry()?.is_some())
    }

    /// Live priority, `None` when inactive
    pub fn priority(&self) -> Result<Option<i32>> {
        Ok(self.active_entry()?.and_then(|swap| swap.priority))
    }

    pub fn status(&self) -> Result<SwapStatus> {
        let active = self.active_entry()?;
        Ok(SwapStatus {
            exists: self.exists(),
            size_bytes: self.size()?,
            is_formatted: self.is_formatted()?,
            is_active: active.is_some(),
            priority: active.and_then(|swap| swap.priority),
        })
    }

    /// Fill an empty (or missing) file with `size_mib` MiB.
    ///
    /// The exit code of the allocation tool is not trusted: the resulting size
    /// is checked, since e.g. `btrfs filesystem mkswapfile` exits 0 with a
    /// zero-length file when the filesystem is full.
    pub fn allocate(&self, size_mib: u64, method_override: Option<AllocationMethod>) -> Result<()> {
        let probe = self.host.probe();
        let fstype = probe.filesystem_type(&self.path);
        let kernel = probe.kernel_version();
        let allocation = strategy::select(fstype.as_deref(), &kernel, method_override)?;
        info!(
            "{}: allocating {} MiB with {} (fs={}, kernel={})",
            self.path.display(),
            size_mib,
            allocation.method,
            fstype.as_deref().unwrap_or("unknown"),
            kernel
        );

        let path = self.path_str();
        if allocation.method == AllocationMethod::FilesystemNative {
            // mkswapfile refuses to overwrite
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .mode(MODE)
                .open(&self.path)?;
            if allocation.no_cow {
                debug!("{}: clearing copy-on-write", path);
                self.host.run_checked(&["chattr", "+C", &path])?;
            }
        }

        let argv = allocation.method.argv(size_mib, &self.path);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        self.host.run_checked(&argv)?;

        let expected = size_mib * MIB;
        let actual = self.size()?.unwrap_or(0);
        if actual != expected {
            return Err(SwapError::SizeMismatch {
                path: self.path.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Write a swap signature unless one is already there
    pub fn format(&self) -> Result<bool> {
        if self.is_formatted()? {
            debug!("{}: already formatted", self.path.display());
            return Ok(false);
        }
        info!("{}: mkswap", self.path.display());
        self.host.run_checked(&["mkswap", &self.path_str()])?;
        Ok(true)
    }

    /// Make the file an active swap area at `priority`
    pub fn activate(&self, priority: Priority) -> Result<bool> {
        let active = self.active_entry()?;
        let current = active.as_ref().and_then(|swap| swap.priority);

        match plan_activation(active.is_some(), current, priority) {
            Activation::Keep => {
                debug!("{}: already active (priority {:?})", self.path.display(), current);
                return Ok(false);
            }
            Activation::Reactivate => {
                info!(
                    "{}: priority {:?} -> {}, reactivating",
                    self.path.display(),
                    current,
                    priority.get()
                );
                self.deactivate()?;
            }
            Activation::Activate => {}
        }

        let path = self.path_str();
        let prio = priority.get().to_string();
        let argv: Vec<&str> = if priority.is_system_assigned() {
            vec!["swapon", &path]
        } else {
            vec!["swapon", "-p", &prio, &path]
        };
        info!("{}: swapon (priority {})", path, priority.get());
        self.host.run_checked(&argv)?;
        Ok(true)
    }

    pub fn deactivate(&self) -> Result<bool> {
        if !self.is_active()? {
            debug!("{}: not active", self.path.display());
            return Ok(false);
        }

        info!("{}: swapoff", self.path.display());
        let out = self.host.run(&["swapoff", &self.path_str()])?;
        if out.success() {
            return Ok(true);
        }
        if !self.is_active()? {
            warn!("{}: deactivated concurrently", self.path.display());
            return Ok(false);
        }
        Err(SwapError::command("swapoff", &out))
    }

    /// Delete the file. Refuses while it is an active swap area.
    pub fn remove(&self) -> Result<bool> {
        if !self.exists() {
            debug!("{}: does not exist", self.path.display());
            return Ok(false);
        }
        if self.is_active()? {
            return Err(SwapError::Race(format!(
                "{} is an active swap area, refusing to remove it",
                self.path.display()
            )));
        }

        info!("{}: removing", self.path.display());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{}: vanished before removal", self.path.display());
                Ok(false)
            }
            Err(e) => match fs::symlink_metadata(&self.path) {
                Ok(meta) if meta.is_dir() => Err(SwapError::Race(format!(
                    "{} was replaced by a directory",
                    self.path.display()
                ))),
                _ => Err(e.into()),
            },
        }
    }

    /// root:root, 0600, swapfile_t
    pub fn sync_permissions(&self) -> Result<bool> {
        self.host
            .attributes()
            .apply(&self.path, &FileAttributes::swap_file())
    }

    /// Read-only counterpart of `sync_permissions`
    pub fn permissions_differ(&self) -> Result<bool> {
        if !self.exists() {
            return Ok(true);
        }
        self.host
            .attributes()
            .differs(&self.path, &FileAttributes::swap_file())
    }
}
