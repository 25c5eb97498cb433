// CLI module - command-line argument parsing and handlers
//
// Running with no subcommand starts the gateway. Subcommands:
// - config --show / --path / --reset: configuration management
// - usage summary|top|export: reports over the local usage database

use crate::config::{Config, VERSION};
use crate::usage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// crosswire - Anthropic-to-OpenAI translating gateway
#[derive(Parser)]
#[command(name = "crosswire")]
#[command(version = VERSION)]
#[command(about = "Expose the Anthropic Messages API in front of any OpenAI-compatible backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Reset config file to the commented template
        #[arg(long)]
        reset: bool,
    },

    /// Reports over the local usage database
    Usage {
        #[command(subcommand)]
        report: UsageReport,
    },
}

#[derive(Subcommand)]
pub enum UsageReport {
    /// Aggregate statistics for a window
    Summary {
        /// Window size in days
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Heaviest-use models
    Top {
        #[arg(long, default_value_t = 10)]
        limit: u32,

        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Dump rows as CSV
    Export {
        /// Output file
        path: PathBuf,

        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> bool {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { show, path, reset }) => {
            if path {
                handle_config_path();
            } else if reset {
                handle_config_reset();
            } else if show {
                handle_config_show();
            } else {
                println!("Usage: crosswire config [--show|--path|--reset]");
            }
            true
        }
        Some(Commands::Usage { report }) => {
            handle_usage(report);
            true
        }
        None => false,
    }
}

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Could not determine home directory"),
    }
}

fn handle_config_show() {
    let config = Config::from_env();
    println!("Effective configuration:");
    println!("  bind_addr:            {}", config.bind_addr);
    println!("  provider_base_url:    {}", config.provider_base_url);
    println!(
        "  provider_api_key:     {}",
        if config.provider_api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!(
        "  proxy_auth_key:       {}",
        if config.proxy_auth_key.is_some() {
            "(set)"
        } else {
            "(disabled)"
        }
    );
    for tier in &config.tiers {
        println!(
            "  tiers.{}:{}model={} endpoint={}",
            tier.tier,
            " ".repeat(13 - tier.tier.as_str().len()),
            tier.model,
            tier.endpoint.as_deref().unwrap_or("(global)")
        );
    }
    println!("  reasoning:            {}", config.reasoning.describe());
    println!("  track_usage:          {}", config.track_usage);
    println!("  usage_db_path:        {}", config.usage_db_path.display());
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Could not determine home directory");
        return;
    };
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            eprintln!("Failed to remove {}: {}", path.display(), e);
            return;
        }
    }
    Config::ensure_config_exists();
    println!("Config reset: {}", path.display());
}

fn handle_usage(report: UsageReport) {
    let config = Config::from_env();
    let db_path = &config.usage_db_path;

    if !db_path.exists() {
        eprintln!("No usage database at {}", db_path.display());
        return;
    }

    match report {
        UsageReport::Summary { days } => match usage::summary(db_path, days) {
            Ok(summary) => {
                println!("Usage over the last {} day(s):", days);
                println!("  requests:         {}", summary.requests);
                println!(
                    "  tokens:           {} in / {} out / {} thinking",
                    summary.input_tokens, summary.output_tokens, summary.thinking_tokens
                );
                println!("  estimated cost:   ${:.4}", summary.cost_usd);
                println!("  avg latency:      {:.0} ms", summary.avg_latency_ms);
                println!("  avg throughput:   {:.1} tok/s", summary.avg_tokens_per_sec);

                if let Ok(true) = usage::json_recommendation(db_path) {
                    println!();
                    println!(
                        "  note: recent requests carry substantial JSON payloads; \
                         a compact encoding (e.g. TOON) would reduce token spend"
                    );
                }
            }
            Err(e) => eprintln!("Failed to read usage database: {}", e),
        },
        UsageReport::Top { limit, days } => match usage::top_models(db_path, limit, days) {
            Ok(rows) => {
                println!(
                    "{:<40} {:>9} {:>14} {:>10}",
                    "model", "requests", "total tokens", "avg cost"
                );
                for row in rows {
                    println!(
                        "{:<40} {:>9} {:>14} {:>10.4}",
                        row.model, row.request_count, row.total_tokens, row.avg_cost
                    );
                }
            }
            Err(e) => eprintln!("Failed to read usage database: {}", e),
        },
        UsageReport::Export { path, days } => match usage::export_csv(db_path, &path, days) {
            Ok(count) => println!("Exported {} row(s) to {}", count, path.display()),
            Err(e) => eprintln!("Export failed: {}", e),
        },
    }
}
