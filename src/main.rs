//! CLI entrypoint: run R code in a live session and install packages after safety checks.

mod audit_log;
mod cache;
mod channel;
mod config;
mod confirm;
mod error;
mod registries;
mod service;
mod types;
mod validator;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rbridge_core::{CheckFactory, FetcherDefinition, PackageSafetyReport};
use tracing_subscriber::EnvFilter;

use channel::{Channel, MailboxChannel};
use config::RbridgeConfig;
use service::{BridgeService, InstallOptions, RunOptions};
use types::{ExecutionOutcome, InstallOutcome};

#[derive(Parser)]
#[command(
    name = "rbridge",
    version,
    about = "Run R code in a live session and install packages after safety checks"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run inline code, an .R script or an .Rmd/.qmd document; no input runs the active editor buffer
    Run {
        input: Option<String>,
        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Check and install one or more packages in the R session
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
        /// Do not ask for confirmation on risky or dangerous packages
        #[arg(long, short = 'y')]
        yes: bool,
        /// Install without running safety checks
        #[arg(long)]
        skip_checks: bool,
        /// Package source (cran or github); defaults to the configured source
        #[arg(long)]
        source: Option<String>,
    },
    /// Print the safety report for a package as JSON
    Check {
        package: String,
        #[arg(long)]
        source: Option<String>,
    },
    /// Show whether an R listener is attached to the mailbox
    Status,
}

/// Returns fetcher definitions wired into this application build.
pub(crate) fn app_fetcher_definitions() -> Vec<FetcherDefinition> {
    vec![
        rbridge_cran::fetcher_definition(),
        rbridge_github::fetcher_definition(),
    ]
}

/// Returns the check battery in execution order.
pub(crate) fn app_check_factories() -> Vec<CheckFactory> {
    vec![
        rbridge_check_blacklist::create_check,
        rbridge_check_registry_status::create_check,
        rbridge_check_maintenance::create_check,
        rbridge_check_dependencies::create_check,
        rbridge_check_popularity::create_check,
        rbridge_check_license::create_check,
    ]
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries R output and JSON reports; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    match run_cli(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = RbridgeConfig::load()?;

    match cli.command {
        Commands::Status => {
            let mailbox = MailboxChannel::new(config.mailbox_dir(), config.poll_interval());
            let listening = mailbox.is_listener_alive();
            println!(
                "listener: {}",
                if listening { "running" } else { "not running" }
            );
            println!("mailbox: {}", mailbox.dir().display());
            Ok(exit_code(listening))
        }
        Commands::Run { input, yes } => {
            let service = BridgeService::new(config)?;
            let outcome = service
                .run(input.as_deref(), RunOptions { assume_yes: yes })
                .await?;
            print_execution(&outcome);
            Ok(exit_code(outcome.status.is_success()))
        }
        Commands::Install {
            packages,
            yes,
            skip_checks,
            source,
        } => {
            let service = BridgeService::new(config)?;
            let outcome = service
                .install(
                    &packages,
                    InstallOptions {
                        assume_yes: yes,
                        skip_safety_checks: skip_checks,
                        source,
                    },
                )
                .await?;
            print_install(&outcome);
            Ok(exit_code(outcome.status.is_success()))
        }
        Commands::Check { package, source } => {
            let service = BridgeService::new(config)?;
            let report = service.check(&package, source.as_deref()).await?;
            let json = serde_json::to_string_pretty(&report)?;
            println!("{json}");
            Ok(exit_code(report.allow_installation))
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_execution(outcome: &ExecutionOutcome) {
    if let Some(output) = outcome.output.as_deref().filter(|text| !text.is_empty()) {
        println!("{output}");
    }
    if let Some(error) = outcome.error.as_deref() {
        eprintln!("R error: {error}");
    }
    match outcome.duration_ms {
        Some(ms) => eprintln!("status: {} ({ms} ms)", status_label(&outcome.status)),
        None => eprintln!("status: {}", status_label(&outcome.status)),
    }
}

fn print_install(outcome: &InstallOutcome) {
    for report in &outcome.reports {
        print_report_summary(report);
    }
    if !outcome.already_installed.is_empty() {
        eprintln!("already installed: {}", outcome.already_installed.join(", "));
    }
    if let Some(output) = outcome.output.as_deref().filter(|text| !text.is_empty()) {
        println!("{output}");
    }
    if let Some(error) = outcome.error.as_deref() {
        eprintln!("R error: {error}");
    }
    if outcome.submitted.is_empty() {
        eprintln!("status: {} (nothing to install)", status_label(&outcome.status));
    } else {
        eprintln!(
            "status: {} ({})",
            status_label(&outcome.status),
            outcome.submitted.join(", ")
        );
    }
}

fn print_report_summary(report: &PackageSafetyReport) {
    eprintln!("{}: {}", report.package, report.safety_level);
    for warning in &report.warnings {
        eprintln!("  warning: {warning}");
    }
    for recommendation in &report.recommendations {
        eprintln!("  hint: {recommendation}");
    }
}

fn status_label<T: serde::Serialize>(status: &T) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|value| value.as_str().map(ToOwned::to_owned))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn app_fetcher_definitions_cover_every_source() {
        let sources = app_fetcher_definitions()
            .iter()
            .map(|def| def.source.key())
            .collect::<Vec<_>>();
        assert_eq!(sources, vec!["cran", "github"]);
    }

    #[test]
    fn app_check_factories_register_full_battery() {
        let ids = app_check_factories()
            .into_iter()
            .map(|factory| factory().id())
            .collect::<Vec<_>>();
        assert_eq!(ids.len(), 6);
        assert!(ids.contains(&"blacklist"));
        assert!(ids.contains(&"license"));
    }

    #[test]
    fn install_parses_flags() {
        let cli = Cli::try_parse_from([
            "rbridge",
            "install",
            "dplyr",
            "r-lib/cli",
            "--source",
            "github",
            "--yes",
            "--skip-checks",
        ])
        .expect("parse install");
        match cli.command {
            Commands::Install {
                packages,
                yes,
                skip_checks,
                source,
            } => {
                assert_eq!(packages, vec!["dplyr".to_string(), "r-lib/cli".to_string()]);
                assert!(yes);
                assert!(skip_checks);
                assert_eq!(source.as_deref(), Some("github"));
            }
            _ => panic!("expected install command"),
        }
    }

    #[test]
    fn install_requires_a_package() {
        assert!(Cli::try_parse_from(["rbridge", "install"]).is_err());
    }

    #[test]
    fn status_labels_use_wire_vocabulary() {
        assert_eq!(status_label(&types::InstallStatus::Partial), "partial");
        assert_eq!(status_label(&channel::ExecutionStatus::Completed), "completed");
    }
}
