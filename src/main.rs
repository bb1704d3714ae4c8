// swap-file - Declarative swap file management for Linux
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use swap_file::config::Config;
use swap_file::defaults;
use swap_file::helpers::am_i_root;
use swap_file::swapfile::SwapFile;
use swap_file::{error, info};
use swap_file::{DesiredState, Host, Reconciler, State};

#[derive(Parser)]
#[command(name = "swap-file")]
#[command(about = "Create, resize, activate and remove a swap file")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure the swap file exists with the given size and is active
    Present {
        /// Swap file path (default: config `path`, then /swapfile)
        #[arg(long)]
        path: Option<String>,
        /// Size such as 512M, 2G or 1.5 (GiB when no unit is given)
        #[arg(long)]
        size: Option<String>,
        /// Priority in [-1, 32767], -1 lets the kernel decide
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i32>,
        /// Force the allocation tool: dd, fallocate or btrfs
        #[arg(long)]
        create_cmd: Option<String>,
        /// Report what would change without changing anything
        #[arg(long)]
        check: bool,
    },
    /// Make sure the swap file is inactive and removed
    Absent {
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        check: bool,
    },
    /// Show the current state of the swap file
    Status {
        #[arg(long)]
        path: Option<String>,
    },
    /// Remove staged files left behind by interrupted runs
    Cleanup {
        /// Directory to scan (default: directory of the swap file path)
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        check: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Present {
            path,
            size,
            priority,
            create_cmd,
            check,
        }) => present(path, size, priority, create_cmd, check),
        Some(Commands::Absent { path, check }) => absent(path, check),
        Some(Commands::Status { path }) => status(path),
        Some(Commands::Cleanup { dir, check }) => cleanup(dir, check),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            return;
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Flag, then config, then built-in default
fn swap_path(config: &Config, flag: Option<String>) -> String {
    flag.or_else(|| config.get("path").map(str::to_string))
        .unwrap_or_else(|| defaults::SWAP_FILE_PATH.to_string())
}

fn present(
    path: Option<String>,
    size: Option<String>,
    priority: Option<i32>,
    create_cmd: Option<String>,
    check: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !check {
        am_i_root()?;
    }
    let config = Config::load()?;

    let path = swap_path(&config, path);
    let size = size.or_else(|| config.get("size").map(str::to_string));
    let priority = match priority {
        Some(p) => p,
        None => config.get_as("priority")?.unwrap_or(defaults::PRIORITY),
    };
    let create_cmd = create_cmd.or_else(|| config.get("create_cmd").map(str::to_string));

    let desired = DesiredState::new(
        &path,
        State::Present,
        size.as_deref(),
        priority,
        create_cmd.as_deref(),
    )?;
    let host = Host::system();
    let outcome = Reconciler::new(&host, check).run(&desired)?;
    println!("{}", outcome);
    Ok(())
}

fn absent(path: Option<String>, check: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !check {
        am_i_root()?;
    }
    let config = Config::load()?;

    let path = swap_path(&config, path);
    let desired = DesiredState::new(&path, State::Absent, None, defaults::PRIORITY, None)?;
    let host = Host::system();
    let outcome = Reconciler::new(&host, check).run(&desired)?;
    println!("{}", outcome);
    Ok(())
}

fn status(path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let path = swap_file::reconcile::resolve_path(&swap_path(&config, path))?;

    let host = Host::system();
    let status = SwapFile::new(&host, &path).status()?;
    println!("path={}", path.display());
    println!("exists={}", status.exists);
    if let Some(size) = status.size_bytes {
        println!("size={}", size);
    }
    println!("formatted={}", status.is_formatted);
    println!("active={}", status.is_active);
    if let Some(priority) = status.priority {
        println!("priority={}", priority);
    }
    Ok(())
}

fn cleanup(dir: Option<PathBuf>, check: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !check {
        am_i_root()?;
    }
    let dir = match dir {
        Some(dir) => dir,
        None => {
            let config = Config::load()?;
            let path = swap_file::reconcile::resolve_path(&swap_path(&config, None))?;
            path.parent().unwrap_or(Path::new("/")).to_path_buf()
        }
    };

    let host = Host::system();
    let removed = Reconciler::new(&host, check).cleanup_orphans(&dir)?;
    if removed.is_empty() {
        info!("No staged files in {}", dir.display());
    }
    println!("changed={}", !removed.is_empty());
    for path in removed {
        println!("removed={}", path.display());
    }
    Ok(())
}
