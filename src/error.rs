// Error kinds surfaced by a reconciliation run
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use thiserror::Error;

use crate::helpers::CmdOutput;

#[derive(Error, Debug)]
pub enum SwapError {
    /// Bad path, size, priority or create command. Raised before any mutation.
    #[error("Invalid input: {0}")]
    Validation(String),
    /// The filesystem/kernel combination cannot hold a swap file this way
    #[error("Unsupported: {0}")]
    Capability(String),
    #[error("{program} failed (exit {code}): {stderr}")]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error(
        "Size of {} is {actual} bytes, expected {expected}. \
         You must have <swap file size> of free space",
        .path.display()
    )]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("Conflict: {0}")]
    Race(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, SwapError>;

impl SwapError {
    /// Build a `Command` error from a non-zero exit
    pub fn command(program: &str, output: &CmdOutput) -> Self {
        SwapError::Command {
            program: program.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        }
    }
}
