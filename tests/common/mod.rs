// Simulated host for integration tests
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Models the external tools against real files in a temporary directory:
// allocation writes real (sparse) files, mkswap writes a signature that blkid
// reads back, and swapon/swapoff keep an in-memory table of active areas.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use swap_file::attributes::{AttributeSync, FileAttributes};
use swap_file::defaults::MIB;
use swap_file::helpers::{self, CmdOutput, Executor};
use swap_file::probe::{find_mount_point, FilesystemProbe, KernelVersion};
use swap_file::Host;

const SIGNATURE: &[u8] = b"SWAPSPACE2";
const SIGNATURE_OFFSET: u64 = 4096 - 10;

#[derive(Default)]
struct SimState {
    /// Canonical path -> priority
    active: BTreeMap<PathBuf, i32>,
    next_auto_priority: i32,
    short_write: bool,
    /// Swapoff of this path also deletes the staged files next to it
    steal_staged_on: Option<PathBuf>,
    calls: Vec<String>,
}

/// Executor standing in for dd, fallocate, btrfs, chattr, mkswap, blkid,
/// swapon and swapoff
#[derive(Clone, Default)]
pub struct SimExecutor {
    state: Arc<Mutex<SimState>>,
}

fn ok(stdout: impl Into<String>) -> CmdOutput {
    CmdOutput {
        code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn fail(code: i32, stderr: &str) -> CmdOutput {
    CmdOutput {
        code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn canonical(path: &str) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path))
}

fn has_signature(path: &str) -> bool {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buf = [0u8; 10];
    file.seek(SeekFrom::Start(SIGNATURE_OFFSET)).is_ok()
        && file.read_exact(&mut buf).is_ok()
        && buf == SIGNATURE
}

fn write_signature(path: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(SIGNATURE_OFFSET))?;
    file.write_all(SIGNATURE)
}

/// Overwrite with `len` bytes of zeroes
fn zero_fill(path: &str, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(len)
}

impl SimExecutor {
    pub fn new() -> Self {
        let sim = Self::default();
        sim.state.lock().unwrap().next_auto_priority = -2;
        sim
    }

    /// Make the next allocations "succeed" while writing only half the file
    pub fn set_short_write(&self, on: bool) {
        self.state.lock().unwrap().short_write = on;
    }

    /// Act like a concurrent `cleanup` run: once `target` is switched off,
    /// the staged files in its directory disappear
    pub fn steal_staged_on_swapoff(&self, target: &Path) {
        self.state.lock().unwrap().steal_staged_on = Some(fs::canonicalize(target).unwrap());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Calls that would change the system
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !(c.starts_with("blkid ") || c.starts_with("swapon --show")))
            .collect()
    }

    pub fn active_priority(&self, path: &Path) -> Option<i32> {
        let path = fs::canonicalize(path).ok()?;
        self.state.lock().unwrap().active.get(&path).copied()
    }

    /// Put `path` in the active table directly, as if activated outside
    pub fn mark_active(&self, path: &Path, priority: i32) {
        let path = fs::canonicalize(path).unwrap();
        self.state.lock().unwrap().active.insert(path, priority);
    }

    fn dispatch(&self, argv: &[&str]) -> CmdOutput {
        let mut state = self.state.lock().unwrap();
        let short = state.short_write;
        let written = |mib: u64| if short { mib * MIB / 2 } else { mib * MIB };

        match argv {
            ["dd", "if=/dev/zero", of, "bs=1M", count] => {
                let path = of.trim_start_matches("of=");
                let mib: u64 = count.trim_start_matches("count=").parse().unwrap();
                match zero_fill(path, written(mib)) {
                    Ok(()) => ok(""),
                    Err(e) => fail(1, &e.to_string()),
                }
            }
            ["fallocate", "--length", length, path] => {
                let mib: u64 = length.trim_end_matches("MiB").parse().unwrap();
                match OpenOptions::new().write(true).open(path) {
                    Ok(file) => match file.set_len(written(mib)) {
                        Ok(()) => ok(""),
                        Err(e) => fail(1, &e.to_string()),
                    },
                    Err(e) => fail(1, &e.to_string()),
                }
            }
            ["btrfs", "filesystem", "mkswapfile", "--size", size, path] => {
                if Path::new(path).exists() {
                    return fail(1, "ERROR: file exists");
                }
                let mib: u64 = size.trim_end_matches('m').parse().unwrap();
                let result = zero_fill(path, written(mib)).and_then(|()| write_signature(path));
                match result {
                    Ok(()) => ok(""),
                    Err(e) => fail(1, &e.to_string()),
                }
            }
            ["chattr", "+C", path] => {
                if Path::new(path).is_file() {
                    ok("")
                } else {
                    fail(1, "chattr: No such file or directory")
                }
            }
            ["mkswap", path] => {
                let len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                if len < 40 * 1024 {
                    return fail(1, "mkswap: swap space needs to be at least 40 KiB");
                }
                match write_signature(path) {
                    Ok(()) => ok(""),
                    Err(e) => fail(1, &e.to_string()),
                }
            }
            ["blkid", "-s", "TYPE", "-o", "value", path] => {
                if has_signature(path) {
                    ok("swap\n")
                } else {
                    fail(2, "")
                }
            }
            ["swapon", "--show=NAME,PRIO", "--noheadings", "--raw"] => {
                let listing: String = state
                    .active
                    .iter()
                    .map(|(path, prio)| format!("{} {}\n", path.display(), prio))
                    .collect();
                ok(listing)
            }
            ["swapon", "-p", prio, path] => {
                let prio = prio.parse().unwrap();
                swapon(&mut state, path, prio)
            }
            ["swapon", path] => {
                let prio = state.next_auto_priority;
                let out = swapon(&mut state, path, prio);
                if out.success() {
                    state.next_auto_priority -= 1;
                }
                out
            }
            ["swapoff", path] => {
                let key = canonical(path);
                if state.active.remove(&key).is_none() {
                    return fail(255, "swapoff: Invalid argument");
                }
                if state.steal_staged_on.as_ref() == Some(&key) {
                    let dir = key.parent().unwrap();
                    for orphan in swap_file::staging::find_orphans(dir).unwrap() {
                        fs::remove_file(orphan).unwrap();
                    }
                }
                ok("")
            }
            _ => fail(127, "unknown command"),
        }
    }
}

fn swapon(state: &mut SimState, path: &str, prio: i32) -> CmdOutput {
    if !has_signature(path) {
        return fail(255, "swapon: read swap header failed");
    }
    let key = canonical(path);
    if state.active.contains_key(&key) {
        return fail(255, "swapon: Device or resource busy");
    }
    state.active.insert(key, prio);
    ok("")
}

impl Executor for SimExecutor {
    fn run(&self, argv: &[&str]) -> helpers::Result<CmdOutput> {
        self.state.lock().unwrap().calls.push(argv.join(" "));
        Ok(self.dispatch(argv))
    }
}

/// Treats a file as correct when its mode is 0600, and fixes only the mode.
/// Ownership and labels need root and are not simulated.
#[derive(Clone, Default)]
pub struct ModeOnlyAttributes {
    applied: Arc<Mutex<Vec<PathBuf>>>,
}

impl ModeOnlyAttributes {
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().unwrap().clone()
    }
}

impl AttributeSync for ModeOnlyAttributes {
    fn differs(&self, path: &Path, attrs: &FileAttributes) -> swap_file::Result<bool> {
        Ok(fs::metadata(path)?.permissions().mode() & 0o7777 != attrs.mode)
    }

    fn apply(&self, path: &Path, attrs: &FileAttributes) -> swap_file::Result<bool> {
        if !self.differs(path, attrs)? {
            return Ok(false);
        }
        fs::set_permissions(path, fs::Permissions::from_mode(attrs.mode))?;
        self.applied.lock().unwrap().push(path.to_path_buf());
        Ok(true)
    }
}

/// A scratch directory plus a simulated host that believes it is on `fstype`
pub struct Sim {
    pub dir: tempfile::TempDir,
    pub exec: SimExecutor,
    pub attrs: ModeOnlyAttributes,
    pub host: Host,
}

impl Sim {
    pub fn new(fstype: &str) -> Self {
        Self::with_kernel(fstype, "6.8.0")
    }

    pub fn with_kernel(fstype: &str, kernel: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mounts");
        let mount = find_mount_point(dir.path());
        fs::write(
            &table,
            format!("/dev/sim {} {} rw,relatime 0 0\n", mount.display(), fstype),
        )
        .unwrap();

        let exec = SimExecutor::new();
        let attrs = ModeOnlyAttributes::default();
        let host = Host::new(
            Box::new(exec.clone()),
            Box::new(attrs.clone()),
            FilesystemProbe::default()
                .with_mount_table(table)
                .with_kernel(KernelVersion::parse(kernel)),
        );
        Self {
            dir,
            exec,
            attrs,
            host,
        }
    }

    /// Canonical path of `name` inside the scratch directory
    pub fn path(&self, name: &str) -> PathBuf {
        fs::canonicalize(self.dir.path()).unwrap().join(name)
    }

    pub fn path_str(&self, name: &str) -> String {
        self.path(name).to_string_lossy().into_owned()
    }

    /// Staged files still lying around
    pub fn leftovers(&self) -> Vec<PathBuf> {
        swap_file::staging::find_orphans(&fs::canonicalize(self.dir.path()).unwrap()).unwrap()
    }
}
