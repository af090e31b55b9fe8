use clap::Args;
use serde_json::Value;

use bbd_core::analysis::{
    calculate_bbd_comparison, calculate_metrics_summary, calculate_salary_equivalent,
    calculate_sell_strategy, BbdComparisonInput, SalaryEquivalentInput, SellStrategyConfig,
};
use bbd_core::config::SimulationConfig;
use bbd_core::simulation::run_simulation;

use crate::input;

/// Arguments for the full analysis report
#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to JSON or YAML config file
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for the salary-equivalent calculator
#[derive(Args)]
pub struct SalaryEquivalentArgs {
    /// Path to JSON input file
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for the BBD-vs-Sell estate comparison
#[derive(Args)]
pub struct BbdComparisonArgs {
    /// Path to JSON input file
    #[arg(long)]
    pub input: Option<String>,
}

/// Run the simulation and every downstream analysis in one report.
pub fn run_analyze(args: AnalyzeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let config: SimulationConfig = input::load(&args.input, "analyze")?;

    let simulation = run_simulation(&config)?;
    let metrics = calculate_metrics_summary(&simulation.result, &config)?;
    let sell_strategy = calculate_sell_strategy(
        &SellStrategyConfig::from(&config),
        &simulation.result.yearly_percentiles,
    )?;

    let last = simulation
        .result
        .yearly_percentiles
        .last()
        .ok_or("simulation output has no yearly percentile rows")?;
    let comparison = calculate_bbd_comparison(&BbdComparisonInput {
        terminal_portfolio: last.portfolio_value.p50,
        terminal_loan: last.loan_balance.p50,
        cost_basis: config.initial_value * config.cost_basis_ratio,
        capital_gains_rate: config.capital_gains_rate,
    });

    Ok(serde_json::json!({
        "simulation": simulation,
        "metrics": metrics,
        "sell_strategy": sell_strategy,
        "bbd_comparison": comparison,
    }))
}

pub fn run_salary_equivalent(
    args: SalaryEquivalentArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let input: SalaryEquivalentInput = input::load(&args.input, "salary-equivalent")?;
    let result = calculate_salary_equivalent(&input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_bbd_comparison(
    args: BbdComparisonArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let input: BbdComparisonInput = input::load(&args.input, "bbd-comparison")?;
    let result = calculate_bbd_comparison(&input);
    Ok(serde_json::to_value(result)?)
}
