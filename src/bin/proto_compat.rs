//! Protocol Buffers Compatibility CLI
//!
//! Compares a base and a candidate snapshot and reports changes that would
//! break peers running the other version.
//!
//! Usage:
//!   proto-compat check --base schemas/v1 --candidate schemas/v2
//!   proto-compat check --base v1.json --candidate v2.json --format jsonl
//!   proto-compat rules
//!   proto-compat config show
//!
//! Exit codes: 0 pass, 1 breaking changes, 2 input or internal error,
//! 3 configuration error, 4 run cancelled (verdict unknown).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proto_compat::rules::{Outcome, SeverityTable};
use proto_compat::{
    load_snapshot, render, CancellationToken, CheckConfig, Checker, CompatError, OutputFormat, RuleRegistry,
    Verdict,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_PASS: u8 = 0;
const EXIT_FAIL: u8 = 1;
const EXIT_INPUT: u8 = 2;
const EXIT_CONFIG: u8 = 3;
const EXIT_UNKNOWN: u8 = 4;

#[derive(Parser)]
#[command(name = "proto-compat")]
#[command(about = "Check two protobuf schema snapshots for wire compatibility")]
#[command(version)]
struct Cli {
    /// Extra config file layered over proto-compat.toml and the XDG config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a base snapshot against a candidate
    Check {
        /// Deployed snapshot (descriptor file or directory)
        #[arg(short, long)]
        base: PathBuf,

        /// Snapshot about to ship (descriptor file or directory)
        #[arg(short = 'n', long)]
        candidate: PathBuf,

        /// Output format (text, json, jsonl)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fail on advisory findings too
        #[arg(long)]
        treat_advisory_as_error: bool,

        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run only these rules (repeatable)
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Skip these rules (repeatable)
        #[arg(long = "skip-rule")]
        skip_rules: Vec<String>,
    },

    /// List the available rules
    Rules,

    /// Show or write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        #[arg(default_value = "proto-compat.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            let configuration = e
                .downcast_ref::<CompatError>()
                .map(CompatError::is_configuration_error)
                .unwrap_or(false);
            ExitCode::from(if configuration { EXIT_CONFIG } else { EXIT_INPUT })
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Commands::Check {
            base,
            candidate,
            format,
            output,
            treat_advisory_as_error,
            workers,
            rules,
            skip_rules,
        } => {
            let mut config = CheckConfig::load_from(cli.config.as_deref())?;
            config.treat_advisory_as_error |= treat_advisory_as_error;
            if workers.is_some() {
                config.workers = workers;
            }
            if !rules.is_empty() {
                config.rule_allowlist = rules;
            }
            config.rule_denylist.extend(skip_rules);
            let checker = Checker::new(config)?;

            let base = load_snapshot(&base).with_context(|| format!("loading base {}", base.display()))?;
            let candidate =
                load_snapshot(&candidate).with_context(|| format!("loading candidate {}", candidate.display()))?;
            info!(base = %base.checksum().short(), candidate = %candidate.checksum().short(), "snapshots loaded");

            let cancel = CancellationToken::new();
            watch_interrupt(cancel.clone());

            let report = checker.check_with_cancel(&base, &candidate, &cancel);
            let rendered = render(&report, format)?;
            write_output(output.as_deref(), &rendered)?;

            Ok(match report.verdict {
                Verdict::Pass => {
                    eprintln!("✅ Compatible ({} advisory)", report.advisory_count());
                    EXIT_PASS
                }
                Verdict::Fail => {
                    eprintln!("❌ {} breaking change(s) detected", report.breaking_count());
                    EXIT_FAIL
                }
                Verdict::Unknown => {
                    eprintln!("⚠️  Run cancelled - verdict unknown");
                    EXIT_UNKNOWN
                }
            })
        }

        Commands::Rules => {
            let registry = RuleRegistry::standard();
            let severities = SeverityTable::default();
            println!("📋 {} rules\n", registry.len());
            for rule in registry.rules() {
                let severity = severities.get(rule.id(), Outcome::Violation);
                println!("   {:<26} {:<9} {}", rule.id().to_string(), severity.to_string(), rule.description());
            }
            Ok(EXIT_PASS)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = CheckConfig::load_from(cli.config.as_deref())?;
                print!("{}", config.to_toml()?);
                Ok(EXIT_PASS)
            }
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
                }
                CheckConfig::default().save(&path)?;
                println!("✅ Wrote {}", path.display());
                Ok(EXIT_PASS)
            }
        },
    }
}

fn write_output(path: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("📝 Report written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Cancel the run on Ctrl-C; workers finish the type in hand and stop
fn watch_interrupt(cancel: CancellationToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "interrupt handling unavailable");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}
