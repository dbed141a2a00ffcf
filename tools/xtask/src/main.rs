//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::Command;

/// Attributes every library crate root must carry.
const REQUIRED_ROOT_ATTRIBUTES: [&str; 3] = [
    "#![forbid(unsafe_code)]",
    "#![deny(missing_docs)]",
    "#![deny(rust_2018_idioms)]",
];

#[derive(Parser)]
#[command(name = "xtask", about = "Lingo workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Generate coverage report
    Coverage,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Coverage => run_coverage(),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_lint()?;
    run_cmd("cargo", &["fmt", "--check"])?;
    run_cmd(
        "cargo",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )?;
    run_cmd("cargo", &["test", "--workspace"])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"])?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    for entry in std::fs::read_dir("crates").context("read crates/")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("lingo-") {
            anyhow::bail!("Crate '{name}' does not follow lingo-* naming");
        }
        check_root_attributes(&entry.path().join("src").join("lib.rs"))?;
    }

    println!("All conventions validated!");
    Ok(())
}

fn check_root_attributes(lib_rs: &Path) -> Result<()> {
    let source = std::fs::read_to_string(lib_rs)
        .with_context(|| format!("read {}", lib_rs.display()))?;
    let missing: Vec<_> = REQUIRED_ROOT_ATTRIBUTES
        .iter()
        .filter(|attr| !source.lines().any(|line| line.trim() == **attr))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("{} is missing {missing:?}", lib_rs.display());
    }
    Ok(())
}

fn run_coverage() -> Result<()> {
    run_cmd("cargo", &["llvm-cov", "--workspace", "--html"])?;
    println!("\nCoverage report: target/llvm-cov/html/index.html");
    Ok(())
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
