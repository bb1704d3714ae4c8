// Filesystem and kernel detection
// SPDX-License-Identifier: GPL-3.0-or-later

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sys::statfs::{statfs, BTRFS_SUPER_MAGIC, EXT4_SUPER_MAGIC, TMPFS_MAGIC, XFS_SUPER_MAGIC};

use crate::defaults::MOUNT_TABLE;
use crate::helpers::unescape_path;
use crate::{debug, warn};

/// Kernel release as dotted integers. Missing components compare as 0,
/// so `5.0` == `5.0.0`.
#[derive(Debug, Clone, Default)]
pub struct KernelVersion(Vec<u32>);

impl KernelVersion {
    pub fn new(parts: &[u32]) -> Self {
        Self(parts.to_vec())
    }

    /// Parse a release string such as `6.8.0-45-generic`.
    /// Each component keeps its leading digits; parsing stops at the first
    /// component without any.
    pub fn parse(release: &str) -> Self {
        let mut parts = Vec::new();
        for component in release.trim().split('.') {
            let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
            match digits.parse() {
                Ok(n) => parts.push(n),
                Err(_) => break,
            }
            if digits.len() != component.len() {
                break;
            }
        }
        Self(parts)
    }

    /// Release of the running kernel
    pub fn running() -> Self {
        match nix::sys::utsname::uname() {
            Ok(uts) => Self::parse(&uts.release().to_string_lossy()),
            Err(e) => {
                warn!("Cannot read kernel release: {}", e);
                Self::default()
            }
        }
    }

    fn component(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl PartialEq for KernelVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KernelVersion {}

impl PartialOrd for KernelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KernelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Answers "what filesystem is this path on" and "which kernel is running"
#[derive(Debug, Clone)]
pub struct FilesystemProbe {
    mount_table: PathBuf,
    kernel: Option<KernelVersion>,
}

impl Default for FilesystemProbe {
    fn default() -> Self {
        Self {
            mount_table: PathBuf::from(MOUNT_TABLE),
            kernel: None,
        }
    }
}

impl FilesystemProbe {
    /// Probe reading an alternative mount table
    pub fn with_mount_table<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.mount_table = path.into();
        self
    }

    /// Pin the kernel version instead of asking uname(2)
    pub fn with_kernel(mut self, kernel: KernelVersion) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn kernel_version(&self) -> KernelVersion {
        self.kernel.clone().unwrap_or_else(KernelVersion::running)
    }

    /// Filesystem type backing `path`, lowercased. `None` means unknown and
    /// callers fall back to the default allocation strategy.
    pub fn filesystem_type<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        let mount_point = find_mount_point(path.as_ref());

        match fs::read_to_string(&self.mount_table) {
            Ok(table) => {
                // btrfs subvolumes have their own st_dev without a mount entry
                let fstype = lookup_mount_table(&table, &mount_point).or_else(|| {
                    debug!(
                        "{} not in {}, using statfs",
                        mount_point.display(),
                        self.mount_table.display()
                    );
                    statfs_type(&mount_point)
                });
                debug!("{} is on {:?} ({:?})", path.as_ref().display(), mount_point, fstype);
                fstype
            }
            Err(e) => {
                debug!("Cannot read {}: {}, using statfs", self.mount_table.display(), e);
                statfs_type(&mount_point)
            }
        }
    }
}

/// Walk upwards from `path` until a mount boundary: the device id changes
/// or the directory is its own parent.
pub fn find_mount_point(path: &Path) -> PathBuf {
    let mut current = existing_ancestor(path);

    loop {
        let parent = match current.parent() {
            Some(p) => p.to_path_buf(),
            None => return current,
        };
        let (cur_meta, parent_meta) = match (fs::metadata(&current), fs::metadata(&parent)) {
            (Ok(c), Ok(p)) => (c, p),
            _ => return current,
        };
        if cur_meta.dev() != parent_meta.dev() || cur_meta.ino() == parent_meta.ino() {
            return current;
        }
        current = parent;
    }
}

/// Closest ancestor (or the path itself) that exists, with symlinks resolved
fn existing_ancestor(path: &Path) -> PathBuf {
    let mut candidate = Some(path);
    while let Some(p) = candidate {
        if let Ok(resolved) = fs::canonicalize(p) {
            return resolved;
        }
        candidate = p.parent();
    }
    PathBuf::from("/")
}

/// Find the filesystem type of `mount_point` in /proc/mounts content.
/// Later entries shadow earlier ones (over-mounts).
pub fn lookup_mount_table(table: &str, mount_point: &Path) -> Option<String> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some((unescape_path(target), fstype))
        })
        .filter(|(target, _)| Path::new(target) == mount_point)
        .last()
        .map(|(_, fstype)| fstype.to_lowercase())
}

fn statfs_type(path: &Path) -> Option<String> {
    let fs_type = statfs(path).ok()?.filesystem_type();
    let name = if fs_type == BTRFS_SUPER_MAGIC {
        "btrfs"
    } else if fs_type == XFS_SUPER_MAGIC {
        "xfs"
    } else if fs_type == EXT4_SUPER_MAGIC {
        // ext2/3/4 share the magic number
        "ext4"
    } else if fs_type == TMPFS_MAGIC {
        "tmpfs"
    } else {
        return None;
    };
    Some(name.to_string())
}
