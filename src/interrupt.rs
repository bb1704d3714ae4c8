// Cleanup of staged files on SIGTERM/SIGHUP/SIGINT
// SPDX-License-Identifier: GPL-3.0-or-later
//
// The handler only touches atomics and async-signal-safe calls: unlink(2),
// sigaction(2), raise(2) and _exit(2). Paths are kept as leaked C strings in
// fixed slots so the handler never allocates or locks.

use std::ffi::CString;
use std::io;
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use signal_hook::consts::SIGINT;

use crate::debug;
use crate::error::{Result, SwapError};

const GUARDED: [Signal; 3] = [Signal::SIGTERM, Signal::SIGHUP, Signal::SIGINT];
/// A run stages one file at a time; the headroom is for several reconcilers
/// sharing a process
const MAX_STAGED: usize = 64;

static STAGED: [AtomicPtr<c_char>; MAX_STAGED] =
    [const { AtomicPtr::new(ptr::null_mut()) }; MAX_STAGED];

/// Disposition in force before the first guard, per entry of `GUARDED`.
/// Null when the signal was ignored and left alone.
static PREVIOUS: [AtomicPtr<SigAction>; 3] = [const { AtomicPtr::new(ptr::null_mut()) }; 3];

/// Number of live guards; handlers are installed by the first, restored by the last
static DEPTH: Mutex<usize> = Mutex::new(0);

/// Held by tests that touch handlers or staged-file slots, which are process-wide
#[cfg(test)]
pub(crate) static TEST_SERIAL: Mutex<()> = Mutex::new(());

/// Remove every registered staged file. Safe to call from a signal handler
/// and to call repeatedly.
pub fn run_cleanup() {
    for slot in &STAGED {
        let p = slot.load(Ordering::Acquire);
        if !p.is_null() {
            // SAFETY: non-null slots hold a live CString owned by a registration
            unsafe {
                libc::unlink(p);
            }
        }
    }
}

extern "C" fn on_signal(signum: c_int) {
    run_cleanup();

    for (i, sig) in GUARDED.iter().enumerate() {
        let prev = PREVIOUS[i].load(Ordering::Acquire);
        if !prev.is_null() {
            // SAFETY: the pointer comes from Box::into_raw and is only freed
            // after being swapped out of the slot
            unsafe {
                let _ = sigaction(*sig, &*prev);
            }
        }
    }

    if signum == SIGINT {
        // Die from SIGINT itself so the parent sees an interrupted child
        let _ = signal_hook::low_level::emulate_default_handler(SIGINT);
    }
    signal_hook::low_level::exit(1);
}

/// A staged path the signal handler will unlink. Deregisters on drop.
#[derive(Debug)]
pub struct CleanupRegistration {
    slot: usize,
}

/// Register `path` for removal on interruption
pub fn register_cleanup(path: &Path) -> Result<CleanupRegistration> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SwapError::Validation(format!("{} contains a NUL byte", path.display())))?;
    let raw = c_path.into_raw();

    for (slot, cell) in STAGED.iter().enumerate() {
        if cell
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("cleanup registered: {}", path.display());
            return Ok(CleanupRegistration { slot });
        }
    }

    // SAFETY: `raw` was never published
    drop(unsafe { CString::from_raw(raw) });
    Err(SwapError::Io(io::Error::other("too many staged files")))
}

impl Drop for CleanupRegistration {
    fn drop(&mut self) {
        let raw = STAGED[self.slot].swap(ptr::null_mut(), Ordering::AcqRel);
        if !raw.is_null() {
            // SAFETY: the slot owned this pointer and no longer publishes it
            drop(unsafe { CString::from_raw(raw) });
        }
    }
}

/// Run `f` with the guarded signals blocked on this thread, so a signal
/// cannot land between creating a staged file and registering it
pub fn with_signals_blocked<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut mask = SigSet::empty();
    for sig in GUARDED {
        mask.add(sig);
    }
    let mut old = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), Some(&mut old)).map_err(io::Error::from)?;
    let result = f();
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&old), None).map_err(io::Error::from)?;
    result
}

/// Scoped signal handlers. While at least one guard is alive, SIGTERM,
/// SIGHUP and SIGINT remove registered staged files, restore the previous
/// dispositions and terminate the process. Dropping the last guard restores
/// the previous dispositions.
#[derive(Debug)]
pub struct InterruptGuard {
    _private: (),
}

impl InterruptGuard {
    pub fn acquire() -> Result<Self> {
        let mut depth = DEPTH.lock().unwrap_or_else(|e| e.into_inner());
        if *depth == 0 {
            install()?;
        }
        *depth += 1;
        Ok(Self { _private: () })
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let mut depth = DEPTH.lock().unwrap_or_else(|e| e.into_inner());
        *depth = depth.saturating_sub(1);
        if *depth == 0 {
            restore();
        }
    }
}

fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    for (i, sig) in GUARDED.iter().enumerate() {
        // SAFETY: on_signal only performs async-signal-safe work
        let prev = match unsafe { sigaction(*sig, &action) } {
            Ok(prev) => prev,
            Err(e) => {
                restore();
                return Err(io::Error::from(e).into());
            }
        };
        if prev.handler() == SigHandler::SigIgn {
            // Ignored by whoever started us (e.g. nohup): keep it that way
            // SAFETY: restoring a disposition obtained from the kernel
            unsafe {
                let _ = sigaction(*sig, &prev);
            }
            continue;
        }
        PREVIOUS[i].store(Box::into_raw(Box::new(prev)), Ordering::Release);
    }
    debug!("interrupt handlers installed");
    Ok(())
}

fn restore() {
    for (i, sig) in GUARDED.iter().enumerate() {
        let prev = PREVIOUS[i].swap(ptr::null_mut(), Ordering::AcqRel);
        if prev.is_null() {
            continue;
        }
        // SAFETY: produced by Box::into_raw in install() and now unpublished
        let prev = unsafe { Box::from_raw(prev) };
        // SAFETY: restoring a disposition obtained from the kernel
        unsafe {
            let _ = sigaction(*sig, &prev);
        }
    }
    debug!("interrupt handlers restored");
}
