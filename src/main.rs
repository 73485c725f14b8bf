//! vpn-pki - PKI provisioning and client bundles for a VPN fleet
//!
//! Reads `vpn-pki.toml` (or `--config FILE`) and runs one of:
//!
//! - `provision`: create whatever identity material is missing, then distribute,
//!   render and export bundles for every client on the roster
//! - `export [NAME...]`: export already rendered bundles again
//! - `revoke NAME`: retire a client and refresh the CRL
//! - `status`: artifact presence, fingerprints and CRL signature check
//! - `check-config`: validate the configuration and print the roster
//!
//! Logs go to stderr (`RUST_LOG` overrides the level), the summary to stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vpn_pki::configs::{AppConfig, DEFAULT_CONFIG_PATH};
use vpn_pki::identity_store::WriteOutcome;
use vpn_pki::pipeline::{ClientStatus, Provisioner};

/// Idempotent PKI provisioning and client bundles for a VPN fleet
#[derive(Parser, Debug)]
#[command(name = "vpn-pki")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase log verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create missing identity material and (re)build every bundle
    Provision {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export rendered bundles to the export directory
    Export {
        /// Clients to export (default: the whole roster)
        names: Vec<String>,
    },

    /// Revoke a client's certificate and publish a new CRL
    Revoke {
        name: String,
    },

    /// Show artifact presence and fingerprints
    Status,

    /// Validate the configuration file
    CheckConfig,
}

/// Some clients failed; everything else succeeded.
const EXIT_PARTIAL: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::from_file(&cli.config)?;

    match cli.command {
        Commands::CheckConfig => {
            let roster = config.roster()?;
            println!("✓ {} is valid", cli.config.display());
            println!("  Backend: {:?}", config.issuer.backend);
            println!("  Store:   {}", config.paths.store_root.display());
            println!("  Clients: {}", roster.len());
            for name in roster.iter() {
                println!("    - {name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Provision { json } => {
            let roster = config.roster()?;
            let provisioner = Provisioner::from_config(config);
            let report = provisioner
                .provision(&roster)
                .context("Provisioning aborted")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for artifact in &report.artifacts {
                    println!("✓ {} ({:?})", artifact.artifact, artifact.outcome);
                }
                let written = report
                    .files
                    .iter()
                    .filter(|f| f.outcome == WriteOutcome::Written)
                    .count();
                println!("✓ {} files written, {} unchanged", written, report.files.len() - written);
                for (name, status) in &report.clients {
                    match status {
                        ClientStatus::Provisioned { bundle } => {
                            println!("✓ {name}: {}", bundle.display())
                        }
                        ClientStatus::Failed { stage, error } => {
                            println!("✗ {name}: {stage}: {error}")
                        }
                    }
                }
            }

            if report.failed_clients().is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_PARTIAL))
            }
        }
        Commands::Export { names } => {
            let names = if names.is_empty() {
                config.roster()?.iter().map(str::to_string).collect()
            } else {
                names
            };
            let provisioner = Provisioner::from_config(config);
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();

            let mut failed = false;
            for (name, result) in provisioner.export(&refs) {
                match result {
                    Ok(file) => println!("✓ {name}: {}", file.path.display()),
                    Err(e) => {
                        failed = true;
                        println!("✗ {name}: {e}");
                    }
                }
            }
            Ok(if failed {
                ExitCode::from(EXIT_PARTIAL)
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Revoke { name } => {
            let provisioner = Provisioner::from_config(config);
            let files = provisioner
                .retire(&name)
                .with_context(|| format!("Failed to revoke {name}"))?;
            println!("✓ {name} revoked, CRL refreshed");
            for file in files.iter().filter(|f| f.outcome == WriteOutcome::Written) {
                println!("✓ Updated {}", file.path.display());
            }
            if provisioner.config().roster()?.contains(&name) {
                println!("⚠ {name} is still on the roster; the next provision run issues a new identity");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let roster = config.roster()?;
            let provisioner = Provisioner::from_config(config);
            let status = provisioner.status(&roster)?;

            println!("Backend: {}", status.backend);
            for artifact in &status.artifacts {
                match &artifact.sha256 {
                    Some(sha) => println!("✓ {:<28} {}", artifact.artifact, sha),
                    None => println!("✗ {:<28} missing", artifact.artifact),
                }
            }
            match status.crl_valid {
                Some(true) => println!(
                    "✓ CRL signature valid ({} revoked)",
                    status.revoked.unwrap_or_default()
                ),
                Some(false) => println!("✗ CRL signature does not match the authority"),
                None => println!("✗ CRL not generated"),
            }
            match status.server_accepted {
                Some(true) => println!("✓ Server certificate passes CRL check"),
                Some(false) => println!("✗ Server certificate rejected with the CRL applied"),
                None => {}
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
