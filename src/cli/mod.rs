//! CLI module for Market Meter
//!
//! Provides subcommands for running the metering runtime and inspecting costs:
//! - `serve`: background billing reconciliation and cache checkpoints
//! - `dashboard`: one-shot spend summary
//! - `estimate`: cost of a search before running it
//! - `pricing`: active per-call prices

pub mod dashboard;
pub mod estimate;
pub mod pricing;
pub mod serve;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// Market Meter - API usage metering and cost safety
#[derive(Parser)]
#[command(name = "market-meter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run billing reconciliation and cache checkpoints until stopped
    Serve,

    /// Refresh billing once and print the dashboard summary as JSON
    Dashboard,

    /// Estimate what a search will cost
    Estimate(estimate::EstimateArgs),

    /// Print the active pricing table
    Pricing,
}

/// Load `.env`, configuration and logging for a subcommand
fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);
    Ok(config)
}
