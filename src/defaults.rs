// Centralised fixed values.
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Config keys fall back to these via `config.get("key").unwrap_or(DEFAULT)`.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

// ── Desired state ────────────────────────────────────────────────────────────

pub const SWAP_FILE_PATH: &str = "/swapfile";
pub const PRIORITY: i32 = -1;
pub const PRIORITY_MIN: i32 = -1;
pub const PRIORITY_MAX: i32 = 32767;
/// Unit assumed when a size string has no suffix
pub const SIZE_DEFAULT_UNIT: char = 'G';

// ── Staging ──────────────────────────────────────────────────────────────────

/// Marker prefix of staged files, so orphans can be recognised
pub const STAGED_PREFIX: &str = ".swap_file";

// ── Allocation thresholds (kernel release from which the fast path is safe) ──

pub const BTRFS_MIN_KERNEL: [u32; 3] = [5, 0, 0];
pub const XFS_FALLOCATE_KERNEL: [u32; 3] = [4, 18, 0];
pub const EXT4_FALLOCATE_KERNEL: [u32; 3] = [5, 11, 0];

// ── Attributes ───────────────────────────────────────────────────────────────

pub const OWNER: &str = "root";
pub const GROUP: &str = "root";
pub const MODE: u32 = 0o600;
pub const SELINUX_TYPE: &str = "swapfile_t";

// ── System paths ─────────────────────────────────────────────────────────────

pub const MOUNT_TABLE: &str = "/proc/mounts";
pub const SELINUX_ENFORCE: &str = "/sys/fs/selinux/enforce";
