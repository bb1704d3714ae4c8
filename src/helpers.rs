// Helper utilities for swap-file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::env;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Cannot execute {0}: {1}")]
    Spawn(String, io::Error),
    #[error("Empty command line")]
    EmptyCommand,
    #[error("Not running as root")]
    NotRoot,
}

pub type Result<T> = std::result::Result<T, HelperError>;

/// Check if running as root
pub fn am_i_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(HelperError::NotRoot)
    }
}

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external tools. Synchronous, no timeout, inherits the environment.
pub trait Executor {
    fn run(&self, argv: &[&str]) -> Result<CmdOutput>;
}

/// Executor backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&self, argv: &[&str]) -> Result<CmdOutput> {
        let (program, args) = argv.split_first().ok_or(HelperError::EmptyCommand)?;
        crate::debug!("exec: {}", argv.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| HelperError::Spawn(program.to_string(), e))?;

        // Killed by a signal: report it the way a shell would
        let code = output
            .status
            .code()
            .or_else(|| output.status.signal().map(|s| 128 + s))
            .unwrap_or(-1);

        Ok(CmdOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Undo the escaping used by /proc/mounts (`\040`) and `swapon --raw` (`\x20`)
pub fn unescape_path(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let rest = &s[i + 1..];
            if let Some(hex) = rest.strip_prefix('x').and_then(|r| r.get(..2)) {
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b);
                    i += 4;
                    continue;
                }
            }
            if let Some(oct) = rest.get(..3) {
                if oct.bytes().all(|c| (b'0'..=b'7').contains(&c)) {
                    if let Ok(b) = u8::from_str_radix(oct, 8) {
                        out.push(b);
                        i += 4;
                        continue;
                    }
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references.
/// Unknown variables are left untouched.
pub fn expand_path(s: &str) -> String {
    let s = match s.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match env::var("HOME") {
            Ok(home) => format!("{}{}", home, rest),
            Err(_) => s.to_string(),
        },
        _ => s.to_string(),
    };

    let mut out = String::with_capacity(s.len());
    let mut rest = s.as_str();
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

// Logging macros
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        println!("INFO: {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        eprintln!("WARN: {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        eprintln!("ERRO: {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if std::env::var("DEBUG").is_ok() {
            eprintln!("DEBUG: {}", format!($($arg)*))
        }
    };
}
