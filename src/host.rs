// The collaborators a reconciliation run talks to
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::attributes::{AttributeSync, SystemAttributes};
use crate::error::{Result, SwapError};
use crate::helpers::{CmdOutput, Executor, SystemExecutor};
use crate::probe::FilesystemProbe;

/// Process executor, attribute synchroniser and filesystem probe
pub struct Host {
    executor: Box<dyn Executor>,
    attributes: Box<dyn AttributeSync>,
    probe: FilesystemProbe,
}

impl Host {
    pub fn new(
        executor: Box<dyn Executor>,
        attributes: Box<dyn AttributeSync>,
        probe: FilesystemProbe,
    ) -> Self {
        Self {
            executor,
            attributes,
            probe,
        }
    }

    /// The real system
    pub fn system() -> Self {
        Self::new(
            Box::new(SystemExecutor),
            Box::new(SystemAttributes::default()),
            FilesystemProbe::default(),
        )
    }

    /// Run a command, whatever its exit code
    pub fn run(&self, argv: &[&str]) -> Result<CmdOutput> {
        Ok(self.executor.run(argv)?)
    }

    /// Run a command, turning a non-zero exit into `SwapError::Command`
    pub fn run_checked(&self, argv: &[&str]) -> Result<CmdOutput> {
        let out = self.run(argv)?;
        if out.success() {
            Ok(out)
        } else {
            Err(SwapError::command(argv.first().copied().unwrap_or_default(), &out))
        }
    }

    pub fn attributes(&self) -> &dyn AttributeSync {
        self.attributes.as_ref()
    }

    pub fn probe(&self) -> &FilesystemProbe {
        &self.probe
    }
}
