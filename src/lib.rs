// swap-file - Declarative swap file management for Linux
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod attributes;
pub mod config;
pub mod defaults;
pub mod error;
pub mod helpers;
pub mod host;
pub mod interrupt;
pub mod probe;
pub mod reconcile;
pub mod size;
pub mod staging;
pub mod strategy;
pub mod swapfile;

pub use error::{Result, SwapError};
pub use host::Host;
pub use reconcile::{DesiredState, Outcome, Reconciler, State};
