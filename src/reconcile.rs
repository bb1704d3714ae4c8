// Desired-state reconciliation of a swap file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SwapError};
use crate::helpers::expand_path;
use crate::host::Host;
use crate::interrupt::InterruptGuard;
use crate::size::SizeSpec;
use crate::staging::{find_orphans, StagedFile};
use crate::strategy::AllocationMethod;
use crate::swapfile::{plan_activation, Activation, Priority, SwapFile};
use crate::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Present,
    Absent,
}

impl FromStr for State {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "present" => Ok(State::Present),
            "absent" => Ok(State::Absent),
            other => Err(SwapError::Validation(format!(
                "state must be present or absent, got '{}'",
                other
            ))),
        }
    }
}

/// Validated request. Every field is checked at construction, so nothing
/// is touched on disk for a bad request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    path: PathBuf,
    state: State,
    size: Option<SizeSpec>,
    priority: Priority,
    method: Option<AllocationMethod>,
}

impl DesiredState {
    pub fn new(
        path: &str,
        state: State,
        size: Option<&str>,
        priority: i32,
        create_cmd: Option<&str>,
    ) -> Result<Self> {
        let path = resolve_path(path)?;
        let priority = Priority::new(priority)?;
        let size = size.map(SizeSpec::parse).transpose()?;
        let method = create_cmd.map(str::parse::<AllocationMethod>).transpose()?;

        if state == State::Present {
            match &size {
                None => {
                    return Err(SwapError::Validation(
                        "size is required when state is present".to_string(),
                    ))
                }
                Some(size) if size.mib() == 0 => {
                    return Err(SwapError::Validation(format!(
                        "size '{}' rounds to 0 MiB",
                        size.as_str()
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            path,
            state,
            size,
            priority,
            method,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn size(&self) -> Option<&SizeSpec> {
        self.size.as_ref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn method(&self) -> Option<AllocationMethod> {
        self.method
    }
}

/// Expand `~` and variables, require an absolute path, resolve symlinks and
/// refuse anything that exists but is not a regular file.
pub fn resolve_path(raw: &str) -> Result<PathBuf> {
    let expanded = expand_path(raw.trim());
    let path = Path::new(&expanded);
    if !path.is_absolute() {
        return Err(SwapError::Validation(format!(
            "Path must be an absolute path, got '{}'",
            raw
        )));
    }

    let resolved = canonicalize_lenient(path)?;
    match fs::metadata(&resolved) {
        Ok(meta) if !meta.is_file() => Err(SwapError::Validation(format!(
            "{} exists and is not a regular file",
            resolved.display()
        ))),
        Ok(_) => Ok(resolved),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(resolved),
        Err(e) => Err(e.into()),
    }
}

/// Canonicalize the longest existing prefix and append the rest as is
fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match fs::canonicalize(&existing) {
            Ok(mut resolved) => {
                for name in tail.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    // A `..` in the missing part, give up on resolving
                    _ => return Ok(path.components().collect()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Result of a run. Size and priority are read back from the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub changed: bool,
    pub path: PathBuf,
    pub size_bytes: Option<u64>,
    pub priority: Option<i32>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "changed={}", self.changed)?;
        write!(f, "path={}", self.path.display())?;
        if let Some(size) = self.size_bytes {
            write!(f, "\nsize={}", size)?;
        }
        if let Some(priority) = self.priority {
            write!(f, "\npriority={}", priority)?;
        }
        Ok(())
    }
}

/// Drives a swap file towards a `DesiredState`.
///
/// In check mode only read-only queries are issued, and `changed` is what a
/// real run against the same system would report.
pub struct Reconciler<'h> {
    host: &'h Host,
    check_mode: bool,
}

impl<'h> Reconciler<'h> {
    pub fn new(host: &'h Host, check_mode: bool) -> Self {
        Self { host, check_mode }
    }

    pub fn run(&self, desired: &DesiredState) -> Result<Outcome> {
        let _guard = if self.check_mode {
            None
        } else {
            Some(InterruptGuard::acquire()?)
        };

        let target = SwapFile::new(self.host, desired.path());
        let changed = match desired.state() {
            State::Present => self.present(&target, desired)?,
            State::Absent => self.absent(&target)?,
        };

        Ok(Outcome {
            changed,
            path: desired.path().to_path_buf(),
            size_bytes: target.size()?,
            priority: target.priority()?,
        })
    }

    fn present(&self, target: &SwapFile, desired: &DesiredState) -> Result<bool> {
        let size = desired.size().ok_or_else(|| {
            SwapError::Validation("size is required when state is present".to_string())
        })?;
        let dir = target
            .path()
            .parent()
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| {
                SwapError::Validation(format!(
                    "directory of {} does not exist",
                    target.path().display()
                ))
            })?;

        let mut changed = false;
        let current = target.size()?;
        if current != Some(size.bytes()) {
            if self.check_mode {
                info!(
                    "(check) {}: would create {} (currently {})",
                    target.path().display(),
                    size,
                    current.map_or_else(|| "missing".to_string(), |b| format!("{} bytes", b))
                );
                return Ok(true);
            }
            self.restage(target, dir, size, desired)?;
            changed = true;
        } else {
            debug!("{}: size matches {}", target.path().display(), size);
        }

        if self.check_mode {
            let activation =
                plan_activation(target.is_active()?, target.priority()?, desired.priority());
            let formatted = target.is_formatted()?;
            let perms = target.permissions_differ()?;
            if !formatted || perms || activation != Activation::Keep {
                info!(
                    "(check) {}: would update (formatted={}, permissions differ={}, activation={:?})",
                    target.path().display(),
                    formatted,
                    perms,
                    activation
                );
                changed = true;
            }
            return Ok(changed);
        }

        changed |= target.format()?;
        changed |= target.sync_permissions()?;
        changed |= target.activate(desired.priority())?;
        Ok(changed)
    }

    /// Build and validate a new swap file next to the target, then rename
    /// it into place. The old file stays untouched unless every step worked.
    fn restage(
        &self,
        target: &SwapFile,
        dir: &Path,
        size: &SizeSpec,
        desired: &DesiredState,
    ) -> Result<()> {
        let staged = StagedFile::create_in(dir)?;
        let candidate = SwapFile::new(self.host, staged.path());

        let validated = candidate
            .allocate(size.mib(), desired.method())
            .and_then(|()| candidate.format())
            .and_then(|_| candidate.activate(desired.priority()))
            .and_then(|_| candidate.deactivate());
        if let Err(e) = validated {
            if let Err(off) = candidate.deactivate() {
                warn!("{}: {}", candidate.path().display(), off);
            }
            return Err(e);
        }

        self.replace_target(target, staged)
    }

    /// Rename `staged` over the target. If the rename fails, an old file
    /// that was active goes back into service at its previous priority.
    fn replace_target(&self, target: &SwapFile, staged: StagedFile) -> Result<()> {
        let previous = target.priority()?;
        let deactivated = target.deactivate()?;
        info!(
            "{}: replacing with {}",
            target.path().display(),
            staged.path().display()
        );

        let err = match staged.persist(target.path()) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if deactivated {
            let priority = previous
                .filter(|p| *p >= 0)
                .and_then(|p| Priority::new(p).ok())
                .unwrap_or(Priority::SYSTEM);
            warn!(
                "{}: replacement failed, reactivating at priority {}",
                target.path().display(),
                priority.get()
            );
            if let Err(on) = target.activate(priority) {
                warn!("{}: {}", target.path().display(), on);
            }
        }
        Err(err)
    }

    fn absent(&self, target: &SwapFile) -> Result<bool> {
        if self.check_mode {
            let changed = target.is_active()? || target.exists();
            if changed {
                info!("(check) {}: would deactivate and remove", target.path().display());
            }
            return Ok(changed);
        }

        let deactivated = target.deactivate()?;
        let removed = target.remove()?;
        Ok(deactivated || removed)
    }

    /// Deactivate and remove staged files left in `dir` by interrupted runs.
    /// Returns the affected paths.
    pub fn cleanup_orphans(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let orphans = find_orphans(dir)?;
        if self.check_mode {
            for orphan in &orphans {
                info!("(check) would remove {}", orphan.display());
            }
            return Ok(orphans);
        }

        let _guard = InterruptGuard::acquire()?;
        for orphan in &orphans {
            let file = SwapFile::new(self.host, orphan);
            file.deactivate()?;
            file.remove()?;
        }
        Ok(orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeSync, FileAttributes};
    use crate::helpers::{CmdOutput, Executor};
    use crate::probe::{FilesystemProbe, KernelVersion};
    use std::sync::{Arc, Mutex};

    /// Fails every command and remembers it was asked
    #[derive(Default, Clone)]
    struct Forbidden {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Executor for Forbidden {
        fn run(&self, argv: &[&str]) -> crate::helpers::Result<CmdOutput> {
            self.calls.lock().unwrap().push(argv.join(" "));
            Ok(CmdOutput {
                code: 99,
                stdout: String::new(),
                stderr: "no commands expected".to_string(),
            })
        }
    }

    struct NoAttributes;

    impl AttributeSync for NoAttributes {
        fn differs(&self, _: &Path, _: &FileAttributes) -> Result<bool> {
            Ok(false)
        }
        fn apply(&self, _: &Path, _: &FileAttributes) -> Result<bool> {
            Ok(false)
        }
    }

    fn host(exec: &Forbidden) -> Host {
        Host::new(
            Box::new(exec.clone()),
            Box::new(NoAttributes),
            FilesystemProbe::default()
                .with_mount_table("/nonexistent/mounts")
                .with_kernel(KernelVersion::parse("6.8")),
        )
    }

    fn tmp_path(dir: &tempfile::TempDir, name: &str) -> String {
        fs::canonicalize(dir.path())
            .unwrap()
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!("present".parse::<State>().unwrap(), State::Present);
        assert_eq!("absent".parse::<State>().unwrap(), State::Absent);
        assert!(matches!("gone".parse::<State>(), Err(SwapError::Validation(_))));
    }

    #[test]
    fn test_desired_state_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_path(&dir, "swapfile");
        let invalid = |r: Result<DesiredState>| matches!(r, Err(SwapError::Validation(_)));

        assert!(invalid(DesiredState::new(&path, State::Present, None, -1, None)));
        assert!(invalid(DesiredState::new(&path, State::Present, Some("0"), -1, None)));
        assert!(invalid(DesiredState::new(&path, State::Present, Some("0.4M"), -1, None)));
        assert!(invalid(DesiredState::new(&path, State::Present, Some("1Q"), -1, None)));
        assert!(invalid(DesiredState::new(&path, State::Present, Some("1G"), -2, None)));
        assert!(invalid(DesiredState::new(&path, State::Present, Some("1G"), -1, Some("cp"))));
        assert!(invalid(DesiredState::new("swapfile", State::Absent, None, -1, None)));

        // Size is optional for absent, but still validated when given
        assert!(DesiredState::new(&path, State::Absent, None, -1, None).is_ok());
        assert!(invalid(DesiredState::new(&path, State::Absent, Some("x"), -1, None)));

        let d = DesiredState::new(&path, State::Present, Some("1.5"), 10, Some("fallocate")).unwrap();
        assert_eq!(d.size().unwrap().mib(), 1536);
        assert_eq!(d.priority().get(), 10);
        assert_eq!(d.method(), Some(AllocationMethod::SparsePreallocate));
    }

    #[test]
    fn test_resolve_path() {
        let dir = tempfile::tempdir().unwrap();
        let real = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(real.join("data")).unwrap();
        std::os::unix::fs::symlink(real.join("data"), real.join("link")).unwrap();

        // Missing file under a symlinked directory
        let resolved = resolve_path(&format!("{}/link/swapfile", real.display())).unwrap();
        assert_eq!(resolved, real.join("data").join("swapfile"));

        // Missing directory chain
        let resolved = resolve_path(&format!("{}/a/b/swapfile", real.display())).unwrap();
        assert_eq!(resolved, real.join("a/b/swapfile"));

        let err = resolve_path(&real.join("data").to_string_lossy()).unwrap_err();
        assert!(matches!(err, SwapError::Validation(_)));
    }

    #[test]
    fn test_absent_on_missing_path_is_noop() {
        let _serial = crate::interrupt::TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let exec = Forbidden::default();
        let host = host(&exec);
        let desired = DesiredState::new(&tmp_path(&dir, "swapfile"), State::Absent, None, -1, None).unwrap();

        for check in [true, false] {
            let outcome = Reconciler::new(&host, check).run(&desired).unwrap();
            assert!(!outcome.changed);
            assert_eq!(outcome.size_bytes, None);
            assert_eq!(outcome.priority, None);
        }
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_check_mode_predicts_creation_without_commands() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Forbidden::default();
        let host = host(&exec);
        let path = tmp_path(&dir, "swapfile");
        let desired = DesiredState::new(&path, State::Present, Some("64M"), -1, None).unwrap();

        let outcome = Reconciler::new(&host, true).run(&desired).unwrap();
        assert!(outcome.changed);
        assert!(!Path::new(&path).exists());
        assert!(exec.calls.lock().unwrap().is_empty());
        assert!(find_orphans(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_fails() {
        let _serial = crate::interrupt::TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let exec = Forbidden::default();
        let host = host(&exec);
        let path = tmp_path(&dir, "nope/swapfile");
        let desired = DesiredState::new(&path, State::Present, Some("1G"), -1, None).unwrap();

        for check in [true, false] {
            let err = Reconciler::new(&host, check).run(&desired).unwrap_err();
            assert!(matches!(err, SwapError::Validation(_)));
        }
        assert!(!dir.path().join("nope").exists());
    }

    #[test]
    fn test_outcome_display() {
        let outcome = Outcome {
            changed: true,
            path: PathBuf::from("/swapfile"),
            size_bytes: Some(1024),
            priority: None,
        };
        assert_eq!(outcome.to_string(), "changed=true\npath=/swapfile\nsize=1024");
    }
}
