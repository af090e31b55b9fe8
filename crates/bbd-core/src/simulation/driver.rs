//! Monte Carlo driver: N independent trajectories, merged by iteration
//! index, reduced into percentile bands, summary statistics, margin-call
//! probabilities, and the estate analysis.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::analysis::estate::{calculate_estate_analysis, EstateAnalysis};
use crate::analysis::margin_calls::{aggregate_margin_call_events, MarginCallProbability};
use crate::config::{SblocConfig, SimulationConfig};
use crate::returns::ReturnModel;
use crate::sbloc::{self, SblocState, StepInput};
use crate::stats::{mean, median_sorted, percentile_band, sample_std_dev};
use crate::types::{with_metadata, ComputationOutput, Percentiles};
use crate::BbdResult;

use super::runner::{SimulationHooks, TaskRunner};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Percentile bands of one simulated year's cross-section.
/// Index 0 is t = 0; index y is the state after year y.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearlyPercentiles {
    pub year: u32,
    pub portfolio_value: Percentiles,
    pub loan_balance: Percentiles,
    pub ltv: Percentiles,
}

/// Loan-side trajectory bands over the horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SblocTrajectory {
    pub loan_balance: Vec<Percentiles>,
    pub cumulative_interest: Vec<Percentiles>,
    pub cumulative_withdrawals: Vec<Percentiles>,
}

/// Descriptive statistics over terminal net worth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Share of iterations ending strictly above the initial value, 0-100.
    pub success_rate: f64,
    pub failed_iterations: u32,
    /// Iterations that produced a non-finite state and were zeroed out.
    pub invariant_breaches: u32,
}

/// Everything a run produces. The caller owns it; the engine retains nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    /// Terminal net worth (portfolio minus loan, floored at 0) per iteration.
    pub terminal_values: Vec<f64>,
    pub yearly_percentiles: Vec<YearlyPercentiles>,
    pub statistics: SummaryStatistics,
    pub sbloc_trajectory: SblocTrajectory,
    pub margin_call_stats: Vec<MarginCallProbability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estate_analysis: Option<EstateAnalysis>,
    /// Seed the run actually used; echo it back to reproduce an unseeded run.
    pub master_seed: u64,
}

// ---------------------------------------------------------------------------
// Per-iteration trajectory
// ---------------------------------------------------------------------------

struct IterationOutcome {
    portfolio: Vec<f64>,
    loan: Vec<f64>,
    ltv: Vec<f64>,
    cumulative_interest: Vec<f64>,
    cumulative_withdrawals: Vec<f64>,
    terminal_net_worth: f64,
    liquidation_years: Vec<u32>,
    failed: bool,
    breached: bool,
}

fn run_iteration(
    iteration: usize,
    config: &SimulationConfig,
    sbloc_config: &SblocConfig,
    model: &ReturnModel,
) -> BbdResult<IterationOutcome> {
    let horizon = config.time_horizon as usize;
    let path = model.sample_path(iteration);

    let mut portfolio = Vec::with_capacity(horizon + 1);
    let mut loan = Vec::with_capacity(horizon + 1);
    let mut ltv = Vec::with_capacity(horizon + 1);
    let mut cumulative_interest = Vec::with_capacity(horizon + 1);
    let mut cumulative_withdrawals = Vec::with_capacity(horizon + 1);
    let mut liquidation_years = Vec::new();

    let mut state =
        SblocState::initial(config.initial_value, config.initial_loc_balance, sbloc_config)?;
    let mut failed = false;
    let mut breached = false;
    let mut interest_total = 0.0;
    let mut withdrawal_total = 0.0;

    // A portfolio that starts at or over its max LTV is margin-called
    // before the first market year.
    if state.current_ltv >= sbloc_config.max_ltv {
        if sbloc::liquidate(&mut state, sbloc_config, 0).is_some() {
            liquidation_years.push(0);
        }
        state.refresh(sbloc_config);
        if state.net_worth() <= 0.0 {
            failed = true;
        }
    }

    push_snapshot(
        &state,
        interest_total,
        withdrawal_total,
        &mut portfolio,
        &mut loan,
        &mut ltv,
        &mut cumulative_interest,
        &mut cumulative_withdrawals,
    );

    for year in 1..=config.time_horizon {
        if failed {
            push_snapshot(
                &state,
                interest_total,
                withdrawal_total,
                &mut portfolio,
                &mut loan,
                &mut ltv,
                &mut cumulative_interest,
                &mut cumulative_withdrawals,
            );
            continue;
        }

        let withdrawal = grown_withdrawal(config, year);
        let input = StepInput {
            year_return: path[(year - 1) as usize],
            withdrawal,
            dividend_yield: config.dividend_yield,
            dividend_tax_rate: config.dividend_tax_rate,
            current_year: year,
        };
        let outcome = if config.withdraw_monthly {
            sbloc::step_year_monthly(&state, sbloc_config, &input)?
        } else {
            sbloc::step_year(&state, sbloc_config, &input)?
        };

        state = outcome.state;
        interest_total += outcome.interest_charged;
        withdrawal_total += outcome.withdrawal_made;
        if outcome.liquidation.is_some() {
            liquidation_years.push(year);
        }

        // Arithmetic catastrophe: zero the iteration out, keep the run alive.
        if !state.portfolio_value.is_finite() || !state.loan_balance.is_finite() {
            breached = true;
            failed = true;
            state.portfolio_value = 0.0;
            state.loan_balance = 0.0;
            state.refresh(sbloc_config);
        } else if outcome.portfolio_failed {
            failed = true;
        }

        push_snapshot(
            &state,
            interest_total,
            withdrawal_total,
            &mut portfolio,
            &mut loan,
            &mut ltv,
            &mut cumulative_interest,
            &mut cumulative_withdrawals,
        );

        if failed {
            // Subsequent years carry a terminal zero portfolio; the loan
            // stays where it ended.
            state.portfolio_value = 0.0;
            state.refresh(sbloc_config);
        }
    }

    let terminal_net_worth = if failed {
        0.0
    } else {
        state.net_worth().max(0.0)
    };

    Ok(IterationOutcome {
        portfolio,
        loan,
        ltv,
        cumulative_interest,
        cumulative_withdrawals,
        terminal_net_worth,
        liquidation_years,
        failed,
        breached,
    })
}

#[allow(clippy::too_many_arguments)]
fn push_snapshot(
    state: &SblocState,
    interest_total: f64,
    withdrawal_total: f64,
    portfolio: &mut Vec<f64>,
    loan: &mut Vec<f64>,
    ltv: &mut Vec<f64>,
    cumulative_interest: &mut Vec<f64>,
    cumulative_withdrawals: &mut Vec<f64>,
) {
    portfolio.push(state.portfolio_value);
    loan.push(state.loan_balance);
    ltv.push(state.current_ltv);
    cumulative_interest.push(interest_total);
    cumulative_withdrawals.push(withdrawal_total);
}

/// Inflation-adjusted withdrawal for a simulation year, 0 before start_year.
fn grown_withdrawal(config: &SimulationConfig, year: u32) -> f64 {
    if year < config.sbloc.start_year {
        return 0.0;
    }
    let growth_years = year - config.sbloc.start_year;
    config.annual_withdrawal * (1.0 + config.annual_withdrawal_raise).powi(growth_years as i32)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run the full Monte Carlo simulation with default hooks.
pub fn run_simulation(
    config: &SimulationConfig,
) -> BbdResult<ComputationOutput<SimulationOutput>> {
    run_simulation_with_hooks(config, &SimulationHooks::default())
}

/// Run the full Monte Carlo simulation with progress/cancellation hooks.
pub fn run_simulation_with_hooks(
    config: &SimulationConfig,
    hooks: &SimulationHooks,
) -> BbdResult<ComputationOutput<SimulationOutput>> {
    let start = Instant::now();
    let mut warnings = config.validate()?;
    let sbloc_config = config.effective_sbloc();

    let master_seed = match config.seed {
        Some(seed) => seed,
        None => StdRng::from_entropy().gen(),
    };
    let model = ReturnModel::new(config, master_seed)?;

    // Fail fast on an invalid initial state before any fan-out.
    SblocState::initial(config.initial_value, config.initial_loc_balance, &sbloc_config)?;

    let n = config.iterations as usize;
    let runner = TaskRunner::auto(n);
    let progress_stride = n.div_ceil(config.time_horizon as usize);
    let outcomes = runner.run(n, progress_stride, hooks, |i| {
        run_iteration(i, config, &sbloc_config, &model)
    })?;

    let output = aggregate(config, outcomes, master_seed);
    if output.statistics.invariant_breaches > 0 {
        warnings.push(format!(
            "{} iterations produced non-finite states and were zeroed out",
            output.statistics.invariant_breaches
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Buy-Borrow-Die Monte Carlo Simulation",
        &serde_json::json!({
            "iterations": config.iterations,
            "time_horizon": config.time_horizon,
            "withdraw_monthly": config.withdraw_monthly,
            "compounding": sbloc_config.compounding,
            "master_seed": master_seed,
            "seeded": config.seed.is_some(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn aggregate(
    config: &SimulationConfig,
    outcomes: Vec<IterationOutcome>,
    master_seed: u64,
) -> SimulationOutput {
    let n = outcomes.len();
    let horizon = config.time_horizon as usize;

    let terminal_values: Vec<f64> = outcomes.iter().map(|o| o.terminal_net_worth).collect();
    let failed_iterations = outcomes.iter().filter(|o| o.failed).count() as u32;
    let invariant_breaches = outcomes.iter().filter(|o| o.breached).count() as u32;

    // Per-year cross-sections, one pre-sized column per year.
    let mut yearly_percentiles = Vec::with_capacity(horizon + 1);
    let mut loan_bands = Vec::with_capacity(horizon + 1);
    let mut interest_bands = Vec::with_capacity(horizon + 1);
    let mut withdrawal_bands = Vec::with_capacity(horizon + 1);
    let mut column = vec![0.0_f64; n];
    for year in 0..=horizon {
        let portfolio_value = band_of(&outcomes, &mut column, |o| o.portfolio[year]);
        let loan_balance = band_of(&outcomes, &mut column, |o| o.loan[year]);
        let ltv = band_of(&outcomes, &mut column, |o| o.ltv[year]);
        loan_bands.push(loan_balance);
        interest_bands.push(band_of(&outcomes, &mut column, |o| {
            o.cumulative_interest[year]
        }));
        withdrawal_bands.push(band_of(&outcomes, &mut column, |o| {
            o.cumulative_withdrawals[year]
        }));
        yearly_percentiles.push(YearlyPercentiles {
            year: year as u32,
            portfolio_value,
            loan_balance,
            ltv,
        });
    }

    let mut sorted_terminals = terminal_values.clone();
    sorted_terminals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let successes = terminal_values
        .iter()
        .filter(|&&v| v > config.initial_value)
        .count();
    let statistics = SummaryStatistics {
        mean: mean(&sorted_terminals),
        median: median_sorted(&sorted_terminals),
        std_dev: sample_std_dev(&sorted_terminals),
        min: sorted_terminals[0],
        max: sorted_terminals[n - 1],
        success_rate: 100.0 * successes as f64 / n as f64,
        failed_iterations,
        invariant_breaches,
    };

    let liquidation_years: Vec<Vec<u32>> = outcomes
        .iter()
        .map(|o| o.liquidation_years.clone())
        .collect();
    let margin_call_stats = aggregate_margin_call_events(&liquidation_years, config.time_horizon);

    let estate_analysis = if config.capital_gains_rate > 0.0
        || config.estate_tax_exemption.is_some()
    {
        let last = &yearly_percentiles[horizon];
        Some(calculate_estate_analysis(
            last.portfolio_value.p50,
            last.loan_balance.p50,
            config.cost_basis(),
            config.capital_gains_rate,
            config.estate_tax_exemption,
        ))
    } else {
        None
    };

    SimulationOutput {
        terminal_values,
        yearly_percentiles,
        statistics,
        sbloc_trajectory: SblocTrajectory {
            loan_balance: loan_bands,
            cumulative_interest: interest_bands,
            cumulative_withdrawals: withdrawal_bands,
        },
        margin_call_stats,
        estate_analysis,
        master_seed,
    }
}

fn band_of<F>(outcomes: &[IterationOutcome], column: &mut [f64], extract: F) -> Percentiles
where
    F: Fn(&IterationOutcome) -> f64,
{
    for (slot, outcome) in column.iter_mut().zip(outcomes.iter()) {
        *slot = extract(outcome);
    }
    percentile_band(column)
}
