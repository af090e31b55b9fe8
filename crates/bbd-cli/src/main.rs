mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::analysis::{AnalyzeArgs, BbdComparisonArgs, SalaryEquivalentArgs};
use commands::sbloc::SblocArgs;
use commands::simulate::SimulateArgs;

/// Buy-Borrow-Die wealth strategy simulation
#[derive(Parser)]
#[command(
    name = "bbd",
    version,
    about = "Buy-Borrow-Die wealth strategy simulation",
    long_about = "Monte Carlo simulation of the Buy-Borrow-Die strategy: a securities \
                  portfolio backing an SBLOC that funds tax-free consumption, with \
                  margin-call risk, forced-liquidation mechanics, and a sell-to-fund \
                  counterfactual for comparison."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Monte Carlo simulation
    Simulate(SimulateArgs),
    /// Run the simulation plus metrics, sell strategy, and estate comparison
    Analyze(AnalyzeArgs),
    /// Deterministic single-path SBLOC projection over a known return path
    Sbloc(SblocArgs),
    /// Pre-tax salary equivalent of a tax-free withdrawal
    SalaryEquivalent(SalaryEquivalentArgs),
    /// BBD-vs-Sell net estate comparison
    BbdComparison(BbdComparisonArgs),
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Simulate(args) => commands::simulate::run_simulate(args),
        Commands::Analyze(args) => commands::analysis::run_analyze(args),
        Commands::Sbloc(args) => commands::sbloc::run_sbloc(args),
        Commands::SalaryEquivalent(args) => commands::analysis::run_salary_equivalent(args),
        Commands::BbdComparison(args) => commands::analysis::run_bbd_comparison(args),
    };

    match result {
        Ok(value) => output::format_output(&cli.output, &value),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            process::exit(1);
        }
    }
}
