//! Test-first code generation engine.
//!
//! Drives an external generation collaborator through a
//! generate-execute-analyze loop: design tests, implement against them,
//! run the suite sandboxed, and retry with analysis feedback until green
//! or the iteration budget runs out.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use redgreen::core::conflict::{ConflictRegion, detect};
use redgreen::exit_codes;
use redgreen::io::config::{EngineConfig, load_config, write_config};
use redgreen::io::deps::PipManager;
use redgreen::io::generator::CommandGenerator;
use redgreen::io::sandbox::{PytestSandbox, SandboxConfig};
use redgreen::logging;
use redgreen::merge::{
    ConflictAdjudicator, Resolution, Strategy, apply_resolutions, resolve_agent, resolve_auto,
    resolve_user,
};
use redgreen::run::start_run;

#[derive(Parser)]
#[command(
    name = "redgreen",
    version,
    about = "Test-first generate-execute-retry engine"
)]
struct Cli {
    /// Path to the engine config file.
    #[arg(long, default_value = "redgreen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full loop for a feature described in plain text.
    Run {
        /// What to build, in plain language.
        goal: String,
        /// Project directory name; defaults to one derived from the goal.
        #[arg(long)]
        name: Option<String>,
    },
    /// Three-way merge two revisions of a file against their ancestor.
    Merge {
        ancestor: PathBuf,
        ours: PathBuf,
        theirs: PathBuf,
        /// Resolution strategy: auto, user or agent.
        #[arg(long, default_value = "auto")]
        strategy: String,
        /// Write the merged result here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a default redgreen.toml.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { goal, name } => cmd_run(&cli.config, &goal, name.as_deref()),
        Command::Merge {
            ancestor,
            ours,
            theirs,
            strategy,
            output,
        } => cmd_merge(&cli.config, &ancestor, &ours, &theirs, &strategy, output.as_deref()),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_run(config_path: &Path, goal: &str, name: Option<&str>) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let generator = command_generator(&cfg)?;
    let sandbox = PytestSandbox::new(SandboxConfig {
        python: cfg.python.clone(),
        deadline: Duration::from_secs(cfg.test_timeout_secs),
        output_cap: cfg.output_limit_bytes,
    });
    let manager = PipManager::new(
        cfg.python.clone(),
        Duration::from_secs(cfg.install_timeout_secs),
        cfg.output_limit_bytes,
    );

    let report = start_run(goal, name, &cfg, &generator, &sandbox, manager)?;
    for iteration in &report.iterations {
        let verdict = if iteration.succeeded { "pass" } else { "fail" };
        println!("iteration {}: {}", iteration.index, verdict);
    }
    println!(
        "{} after {} iteration(s), work dir: {}",
        if report.succeeded { "succeeded" } else { "exhausted budget" },
        report.iterations.len(),
        report.work_dir
    );
    println!("coverage: {}", report.coverage);
    Ok(if report.succeeded {
        exit_codes::OK
    } else {
        exit_codes::EXHAUSTED
    })
}

fn cmd_merge(
    config_path: &Path,
    ancestor_path: &Path,
    ours_path: &Path,
    theirs_path: &Path,
    strategy: &str,
    output: Option<&Path>,
) -> Result<i32> {
    let strategy = Strategy::from_name(strategy)?;
    let ancestor = read(ancestor_path)?;
    let ours = read(ours_path)?;
    let theirs = read(theirs_path)?;

    let regions = detect(&ancestor, &ours, &theirs);
    let resolutions = match strategy {
        Strategy::Auto => resolve_auto(&regions),
        Strategy::User => resolve_user(&regions, &mut StdinAdjudicator)?,
        Strategy::Agent => {
            let cfg = load_config(config_path)?;
            resolve_agent(&regions, &command_generator(&cfg)?)?
        }
    };
    let merged = apply_resolutions(&ancestor, &regions, &resolutions)?;

    eprintln!("{} conflict region(s) resolved", regions.len());
    match output {
        Some(path) => fs::write(path, merged)
            .with_context(|| format!("write merged file {}", path.display()))?,
        None => print!("{merged}"),
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &EngineConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn command_generator(cfg: &EngineConfig) -> Result<CommandGenerator> {
    CommandGenerator::new(
        cfg.generator_command.clone(),
        Duration::from_secs(cfg.generator_timeout_secs),
        cfg.output_limit_bytes,
    )
    .context("configure generator_command in redgreen.toml")
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Interactive adjudicator: shows both sides of each region on stderr and
/// reads `o` (ours) or `t` (theirs) from stdin.
struct StdinAdjudicator;

impl ConflictAdjudicator for StdinAdjudicator {
    fn adjudicate(&mut self, region: &ConflictRegion) -> Result<Resolution> {
        eprintln!("conflict at ancestor lines {}..{}:", region.start, region.end);
        eprintln!("--- ours ---\n{}", region.ours.join("\n"));
        eprintln!("--- theirs ---\n{}", region.theirs.join("\n"));

        let stdin = io::stdin();
        loop {
            eprint!("keep [o]urs or [t]heirs? ");
            io::stderr().flush().context("flush prompt")?;
            let mut line = String::new();
            let read = stdin
                .lock()
                .read_line(&mut line)
                .context("read adjudication choice")?;
            if read == 0 {
                anyhow::bail!("stdin closed before the conflict was adjudicated");
            }
            match line.trim() {
                "o" => {
                    return Ok(Resolution {
                        lines: region.ours.clone(),
                    });
                }
                "t" => {
                    return Ok(Resolution {
                        lines: region.theirs.clone(),
                    });
                }
                _ => eprintln!("please answer 'o' or 't'"),
            }
        }
    }
}
