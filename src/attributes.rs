// Ownership, mode and SELinux label of the swap file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use nix::unistd::{chown, Gid, Group, Uid, User};

use crate::defaults::{GROUP, MODE, OWNER, SELINUX_ENFORCE, SELINUX_TYPE};
use crate::error::{Result, SwapError};
use crate::helpers::{Executor, SystemExecutor};
use crate::{debug, info};

/// Desired file attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub owner: String,
    pub group: String,
    pub mode: u32,
    /// SELinux type component, only enforced when SELinux is enabled
    pub selinux_type: Option<String>,
}

impl FileAttributes {
    /// root:root 0600 swapfile_t
    pub fn swap_file() -> Self {
        Self {
            owner: OWNER.to_string(),
            group: GROUP.to_string(),
            mode: MODE,
            selinux_type: Some(SELINUX_TYPE.to_string()),
        }
    }
}

/// Brings a file's attributes in line, touching only what differs
pub trait AttributeSync {
    /// Whether `apply` would change anything. Read-only.
    fn differs(&self, path: &Path, attrs: &FileAttributes) -> Result<bool>;

    /// Apply the differing attributes, returning whether anything changed
    fn apply(&self, path: &Path, attrs: &FileAttributes) -> Result<bool>;
}

/// What needs to change on a file
#[derive(Debug, Default, PartialEq, Eq)]
struct AttributeDiff {
    ownership: Option<(Uid, Gid)>,
    mode: Option<u32>,
    label: Option<String>,
}

impl AttributeDiff {
    fn is_empty(&self) -> bool {
        self.ownership.is_none() && self.mode.is_none() && self.label.is_none()
    }
}

/// Applies attributes with chown(2), chmod(2) and `chcon`
#[derive(Debug, Clone, Copy)]
pub struct SystemAttributes {
    selinux: bool,
}

impl Default for SystemAttributes {
    fn default() -> Self {
        Self {
            selinux: Path::new(SELINUX_ENFORCE).exists(),
        }
    }
}

impl SystemAttributes {
    fn diff(&self, path: &Path, attrs: &FileAttributes) -> Result<AttributeDiff> {
        let meta = fs::metadata(path)?;
        let mut diff = AttributeDiff::default();

        let uid = User::from_name(&attrs.owner)
            .map_err(io::Error::from)?
            .ok_or_else(|| SwapError::Validation(format!("unknown user {}", attrs.owner)))?
            .uid;
        let gid = Group::from_name(&attrs.group)
            .map_err(io::Error::from)?
            .ok_or_else(|| SwapError::Validation(format!("unknown group {}", attrs.group)))?
            .gid;
        if meta.uid() != uid.as_raw() || meta.gid() != gid.as_raw() {
            diff.ownership = Some((uid, gid));
        }

        if meta.mode() & 0o7777 != attrs.mode {
            diff.mode = Some(attrs.mode);
        }

        if let (true, Some(wanted)) = (self.selinux, attrs.selinux_type.as_deref()) {
            let current = selinux_type_of(path)?;
            if current.as_deref() != Some(wanted) {
                diff.label = Some(wanted.to_string());
            }
        }

        Ok(diff)
    }
}

impl AttributeSync for SystemAttributes {
    fn differs(&self, path: &Path, attrs: &FileAttributes) -> Result<bool> {
        Ok(!self.diff(path, attrs)?.is_empty())
    }

    fn apply(&self, path: &Path, attrs: &FileAttributes) -> Result<bool> {
        let diff = self.diff(path, attrs)?;
        if diff.is_empty() {
            debug!("{}: attributes already correct", path.display());
            return Ok(false);
        }

        if let Some((uid, gid)) = diff.ownership {
            info!("{}: chown {}:{}", path.display(), attrs.owner, attrs.group);
            chown(path, Some(uid), Some(gid)).map_err(io::Error::from)?;
        }
        if let Some(mode) = diff.mode {
            info!("{}: chmod {:o}", path.display(), mode);
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        if let Some(label) = diff.label {
            info!("{}: chcon -t {}", path.display(), label);
            let path_str = path.to_string_lossy();
            let out = SystemExecutor.run(&["chcon", "-t", &label, &path_str])?;
            if !out.success() {
                return Err(SwapError::command("chcon", &out));
            }
        }
        Ok(true)
    }
}

/// Type component of the file's SELinux context, e.g. `swapfile_t`
fn selinux_type_of(path: &Path) -> Result<Option<String>> {
    let path_str = path.to_string_lossy();
    let out = SystemExecutor.run(&["stat", "--format=%C", &path_str])?;
    if !out.success() {
        return Err(SwapError::command("stat", &out));
    }
    Ok(parse_context_type(&out.stdout))
}

fn parse_context_type(context: &str) -> Option<String> {
    context.trim().split(':').nth(2).map(str::to_string)
}
