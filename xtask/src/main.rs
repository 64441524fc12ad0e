//! Build automation tasks for the sqlpool workspace.
//!
//! Run with `cargo xtask <command>`.
//!
//! ## Available Commands
//!
//! - `ci`: Run all CI checks (format, lint, test, demo, doc)
//! - `fmt`: Check/apply code formatting
//! - `clippy`: Run clippy lints
//! - `test`: Run all tests
//! - `demo`: Run the mock-driver pool walkthrough
//! - `doc`: Generate documentation
//! - `clean`: Clean build artifacts
//! - `fuzz`: Run fuzz tests (requires cargo-fuzz + nightly)

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for sqlpool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, demo, doc)
    Ci,
    /// Run cargo fmt (--check by default, --fix to apply)
    Fmt {
        /// Apply formatting fixes
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on all targets
    Clippy {
        /// Apply clippy suggestions
        #[arg(long)]
        fix: bool,
    },
    /// Run all tests
    Test {
        /// Test a specific package
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Run the pool walkthrough against the mock driver
    Demo {
        /// `RUST_LOG` filter for the walkthrough's tracing output
        #[arg(long, default_value = "sqlpool=debug")]
        log: String,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Clean build artifacts
    Clean,
    /// Run fuzz tests (requires cargo-fuzz + nightly)
    Fuzz {
        /// Fuzz target to run
        #[arg(default_value = "connection_string")]
        target: String,
        /// Maximum runtime in seconds
        #[arg(long, default_value = "60")]
        max_time: u64,
        /// List available fuzz targets
        #[arg(long)]
        list: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh, false)?;
            clippy(&sh, false)?;
            test(&sh, None)?;
            demo(&sh, "sqlpool=warn")?;
            doc(&sh, false)?;
            println!("\n✅ All CI checks passed!");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy { fix } => clippy(&sh, fix)?,
        Command::Test { package } => test(&sh, package.as_deref())?,
        Command::Demo { log } => demo(&sh, &log)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Clean => clean(&sh)?,
        Command::Fuzz {
            target,
            max_time,
            list,
        } => fuzz(&sh, &target, max_time, list)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying formatting...");
        cmd!(sh, "cargo fmt --all").run()?;
        println!("✅ Formatting applied.");
    } else {
        println!("Checking formatting...");
        cmd!(sh, "cargo fmt --all -- --check").run()?;
        println!("✅ Formatting check passed.");
    }
    Ok(())
}

fn clippy(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        println!("Applying clippy suggestions...");
        cmd!(sh, "cargo clippy --workspace --all-targets --fix --allow-dirty").run()?;
        println!("✅ Clippy suggestions applied.");
    } else {
        println!("Running clippy...");
        cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
        println!("✅ Clippy check passed.");
    }
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>) -> Result<()> {
    println!("Running tests...");
    match package {
        Some(pkg) => cmd!(sh, "cargo test -p {pkg}").run()?,
        None => cmd!(sh, "cargo test --workspace").run()?,
    }
    println!("✅ All tests passed.");
    Ok(())
}

/// The walkthrough exits non-zero if any pool operation fails, so it doubles
/// as a smoke test of retry and replacement over the mock driver.
fn demo(sh: &Shell, log: &str) -> Result<()> {
    println!("Running mock pool walkthrough...");
    let _env = sh.push_env("RUST_LOG", log);
    cmd!(sh, "cargo run -p sqlpool-testing --example mock_pool").run()?;
    println!("✅ Walkthrough completed.");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("Generating documentation...");
    if open {
        cmd!(sh, "cargo doc --workspace --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --workspace --no-deps").run()?;
    }
    println!("✅ Documentation generated.");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ Clean complete.");
    Ok(())
}

fn fuzz(sh: &Shell, target: &str, max_time: u64, list: bool) -> Result<()> {
    let fuzz_dir = sh.current_dir().join("fuzz");
    if !fuzz_dir.exists() {
        bail!("Fuzz directory not found at {}", fuzz_dir.display());
    }

    if list {
        println!("Available fuzz targets:");
        for entry in fs::read_dir(fuzz_dir.join("fuzz_targets"))? {
            let entry = entry?;
            if let Some(name) = entry.path().file_stem() {
                println!("  - {}", name.to_string_lossy());
            }
        }
        return Ok(());
    }

    println!("Running fuzz target: {target}");
    println!("Max time: {max_time} seconds");

    // cargo-fuzz requires nightly
    let _dir = sh.push_dir(&fuzz_dir);
    let max_time_str = max_time.to_string();
    cmd!(
        sh,
        "cargo +nightly fuzz run {target} -- -max_total_time={max_time_str}"
    )
    .run()?;

    Ok(())
}
