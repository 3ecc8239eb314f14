//! Resolvent CLI
//!
//! - `resolvent run <program>`: resolve a program's query and print answers
//! - `resolvent check <program>`: validate a program without resolving it

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use resolvent_cli::program::Program;
use resolvent_cli::{load_config, run_program};
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "resolvent")]
#[command(author, version, about = "Resolvent: backward-chaining rule resolution over fact graphs")]
struct Cli {
    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the program's query and print every answer.
    Run {
        /// Program file (JSON: facts, rules, query)
        program: PathBuf,
        /// Reasoner configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write one Graphviz trace per query into this directory
        #[arg(long)]
        trace_dir: Option<PathBuf>,
        /// Stop after this many answers
        #[arg(long)]
        limit: Option<usize>,
        /// Print the rule applications behind each answer
        #[arg(long)]
        explain: bool,
    },

    /// Validate a program: facts are ground, rules are range restricted and
    /// stratified.
    Check {
        /// Program file (JSON: facts, rules, query)
        program: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            program,
            config,
            trace_dir,
            limit,
            explain,
        } => cmd_run(&program, config.as_deref(), trace_dir, limit, explain),
        Commands::Check { program } => cmd_check(&program),
    }
}

fn cmd_run(
    path: &Path,
    config: Option<&Path>,
    trace_dir: Option<PathBuf>,
    limit: Option<usize>,
    explain: bool,
) -> Result<()> {
    let mut config = load_config(config)?;
    if trace_dir.is_some() {
        config.trace_dir = trace_dir;
    }
    config.explain |= explain;
    let loaded = Program::load(path)?.build()?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = config.worker_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.enable_all().build().context("failed to start runtime")?;

    let report = runtime.block_on(run_program(&loaded, config, limit, |answer| {
        println!("{answer}");
    }))?;

    for (answer, lines) in report.answers.iter().zip(&report.derivations) {
        println!("{} {}", "explain".cyan().bold(), answer);
        if lines.is_empty() {
            println!("  {}", "stored facts only".dimmed());
        }
        for line in lines {
            println!("  {line}");
        }
    }

    match &report.summary {
        Some(summary) => {
            eprintln!("{} {}", "ok".green().bold(), summary);
            if let Some(trace) = &summary.trace {
                eprintln!("{} {}", "wrote".green().bold(), trace.display().to_string().bold());
            }
        }
        None => eprintln!(
            "{} stopped after {} answers",
            "info:".yellow().bold(),
            report.answers.len()
        ),
    }
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    println!("{} {}", "Checking".green().bold(), path.display());
    let program = Program::load(path)?;
    let loaded = program.build()?;
    let stats = loaded.store.stats();
    println!("  facts:      {}", stats.facts);
    println!("  concepts:   {}", stats.concepts);
    println!("  predicates: {}", stats.predicates);
    println!("  rules:      {}", loaded.rules.len());
    println!("  query:      {}", loaded.query);
    println!("{}", "Valid.".green());
    Ok(())
}
