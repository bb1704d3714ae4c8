// Allocation strategy selection
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::defaults::{BTRFS_MIN_KERNEL, EXT4_FALLOCATE_KERNEL, XFS_FALLOCATE_KERNEL};
use crate::error::{Result, SwapError};
use crate::probe::KernelVersion;

/// How the bytes of a new swap file get onto disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMethod {
    /// `dd` from /dev/zero. Works everywhere, writes every block.
    ZeroFill,
    /// `fallocate`. Fast, but some kernels reject the result as having holes.
    SparsePreallocate,
    /// `btrfs filesystem mkswapfile`. Creates, sizes and formats in one go.
    FilesystemNative,
}

impl AllocationMethod {
    /// Command line for a file of `size_mib` MiB at `path`
    pub fn argv(&self, size_mib: u64, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy().into_owned();
        match self {
            AllocationMethod::ZeroFill => vec![
                "dd".to_string(),
                "if=/dev/zero".to_string(),
                format!("of={}", path),
                "bs=1M".to_string(),
                format!("count={}", size_mib),
            ],
            AllocationMethod::SparsePreallocate => vec![
                "fallocate".to_string(),
                "--length".to_string(),
                format!("{}MiB", size_mib),
                path,
            ],
            AllocationMethod::FilesystemNative => vec![
                "btrfs".to_string(),
                "filesystem".to_string(),
                "mkswapfile".to_string(),
                "--size".to_string(),
                format!("{}m", size_mib),
                path,
            ],
        }
    }

    /// Name of the tool, as accepted by `create_cmd`
    pub fn command_name(&self) -> &'static str {
        match self {
            AllocationMethod::ZeroFill => "dd",
            AllocationMethod::SparsePreallocate => "fallocate",
            AllocationMethod::FilesystemNative => "btrfs",
        }
    }
}

impl FromStr for AllocationMethod {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dd" => Ok(AllocationMethod::ZeroFill),
            "fallocate" => Ok(AllocationMethod::SparsePreallocate),
            "btrfs" => Ok(AllocationMethod::FilesystemNative),
            other => Err(SwapError::Validation(format!(
                "create_cmd must be one of [dd,fallocate,btrfs], got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

/// Outcome of strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub method: AllocationMethod,
    /// Clear copy-on-write on the file before allocating
    pub no_cow: bool,
}

/// Pick an allocation method for a filesystem and kernel.
///
/// | fs    | kernel    | method             | no_cow |
/// |-------|-----------|--------------------|--------|
/// | btrfs | >= 5.0    | sparse-preallocate | yes    |
/// | btrfs | < 5.0     | error              |        |
/// | xfs   | >= 4.18   | sparse-preallocate | no     |
/// | ext4  | >= 5.11   | sparse-preallocate | no     |
/// | other | any       | zero-fill          | no     |
///
/// An explicit override skips the table. No-CoW is then still required on
/// btrfs, except for the native method which handles it itself.
pub fn select(
    fstype: Option<&str>,
    kernel: &KernelVersion,
    explicit: Option<AllocationMethod>,
) -> Result<Allocation> {
    let is_btrfs = fstype == Some("btrfs");

    if let Some(method) = explicit {
        if method == AllocationMethod::FilesystemNative && !is_btrfs {
            return Err(SwapError::Capability(format!(
                "create_cmd btrfs requires a btrfs filesystem, found {}",
                fstype.unwrap_or("unknown")
            )));
        }
        return Ok(Allocation {
            method,
            no_cow: is_btrfs && method != AllocationMethod::FilesystemNative,
        });
    }

    let at_least = |min: [u32; 3]| *kernel >= KernelVersion::new(&min);

    let allocation = match fstype {
        Some("btrfs") if at_least(BTRFS_MIN_KERNEL) => Allocation {
            method: AllocationMethod::SparsePreallocate,
            no_cow: true,
        },
        Some("btrfs") => {
            return Err(SwapError::Capability(format!(
                "kernel version >= 5 required for swap on btrfs (running {})",
                kernel
            )))
        }
        Some("xfs") if at_least(XFS_FALLOCATE_KERNEL) => Allocation {
            method: AllocationMethod::SparsePreallocate,
            no_cow: false,
        },
        Some("ext4") if at_least(EXT4_FALLOCATE_KERNEL) => Allocation {
            method: AllocationMethod::SparsePreallocate,
            no_cow: false,
        },
        _ => Allocation {
            method: AllocationMethod::ZeroFill,
            no_cow: false,
        },
    };
    Ok(allocation)
}
