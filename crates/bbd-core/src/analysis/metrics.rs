//! Performance metrics over a finished simulation: CAGR, TWRR,
//! cross-sectional volatility, success rate, and the salary equivalent of
//! tax-free borrowed consumption.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::BbdError;
use crate::simulation::SimulationOutput;
use crate::stats::sample_std_dev;
use crate::types::{with_metadata, ComputationOutput};
use crate::BbdResult;

// ---------------------------------------------------------------------------
// Point metrics
// ---------------------------------------------------------------------------

/// Compound annual growth rate `(end/start)^(1/years) - 1`.
///
/// Defined only for positive `start` and at least one year; a wiped-out
/// terminal value returns exactly -1.
pub fn calculate_cagr(start: f64, end: f64, years: u32) -> BbdResult<f64> {
    if years == 0 {
        return Err(BbdError::ConfigInvalid {
            field: "years".into(),
            reason: "CAGR requires at least one year".into(),
        });
    }
    if !(start > 0.0) || !start.is_finite() {
        return Err(BbdError::ConfigInvalid {
            field: "start".into(),
            reason: "CAGR requires a positive starting value".into(),
        });
    }
    if end <= 0.0 {
        return Ok(-1.0);
    }
    Ok((end / start).powf(1.0 / f64::from(years)) - 1.0)
}

/// Time-weighted rate of return from a sequence of period returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twrr {
    /// `prod(1 + r_i) - 1` over the whole span.
    pub cumulative: f64,
    /// Annualized geometric mean per period.
    pub annualized: f64,
}

pub fn calculate_twrr(period_returns: &[f64]) -> BbdResult<Twrr> {
    if period_returns.is_empty() {
        return Err(BbdError::InsufficientData(
            "TWRR requires at least one period return".into(),
        ));
    }
    let growth: f64 = period_returns.iter().map(|r| 1.0 + r).product();
    let cumulative = growth - 1.0;
    let annualized = if growth <= 0.0 {
        -1.0
    } else {
        growth.powf(1.0 / period_returns.len() as f64) - 1.0
    };
    Ok(Twrr {
        cumulative,
        annualized,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalaryEquivalentInput {
    pub annual_withdrawal: f64,
    pub effective_income_tax_rate: f64,
}

/// The pre-tax salary matching a tax-free withdrawal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryEquivalent {
    pub salary_equivalent: f64,
    pub tax_savings: f64,
}

pub fn calculate_salary_equivalent(
    input: &SalaryEquivalentInput,
) -> BbdResult<SalaryEquivalent> {
    if !(input.effective_income_tax_rate >= 0.0 && input.effective_income_tax_rate < 1.0) {
        return Err(BbdError::ConfigInvalid {
            field: "effective_income_tax_rate".into(),
            reason: "must be in [0, 1)".into(),
        });
    }
    if !(input.annual_withdrawal >= 0.0) {
        return Err(BbdError::ConfigInvalid {
            field: "annual_withdrawal".into(),
            reason: "cannot be negative".into(),
        });
    }
    let salary_equivalent = input.annual_withdrawal / (1.0 - input.effective_income_tax_rate);
    Ok(SalaryEquivalent {
        salary_equivalent,
        tax_savings: salary_equivalent - input.annual_withdrawal,
    })
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub median_terminal_value: f64,
    pub mean_terminal_value: f64,
    /// CAGR of the median terminal value.
    pub cagr: f64,
    /// CAGR of the mean terminal value, for callers that prefer it.
    pub mean_cagr: f64,
    /// Sample stddev of per-iteration annualized returns. A cross-sectional
    /// spread, not a period-return volatility.
    pub annualized_volatility: f64,
    /// TWRR extracted from the median portfolio path.
    pub twrr: Twrr,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_equivalent: Option<SalaryEquivalent>,
    /// Cumulative margin-call probability at the horizon, 0-100.
    pub margin_call_risk: f64,
}

/// Reduce a simulation output into the headline metrics.
pub fn calculate_metrics_summary(
    output: &SimulationOutput,
    config: &SimulationConfig,
) -> BbdResult<ComputationOutput<MetricsSummary>> {
    let start = Instant::now();
    let mut warnings = Vec::new();

    if output.terminal_values.is_empty() {
        return Err(BbdError::InsufficientData(
            "Simulation output has no terminal values".into(),
        ));
    }
    let years = config.time_horizon;

    let median_terminal_value = output.statistics.median;
    let mean_terminal_value = output.statistics.mean;
    let cagr = calculate_cagr(config.initial_value, median_terminal_value, years)?;
    let mean_cagr = calculate_cagr(config.initial_value, mean_terminal_value, years)?;

    // Per-iteration annualized returns; wiped-out iterations contribute -1
    let annualized: Vec<f64> = output
        .terminal_values
        .iter()
        .map(|&terminal| {
            if terminal <= 0.0 {
                -1.0
            } else {
                (terminal / config.initial_value).powf(1.0 / f64::from(years)) - 1.0
            }
        })
        .collect();
    let annualized_volatility = sample_std_dev(&annualized);

    let twrr = calculate_twrr(&median_path_returns(output))?;

    let salary_equivalent = if config.annual_withdrawal > 0.0 {
        Some(calculate_salary_equivalent(&SalaryEquivalentInput {
            annual_withdrawal: config.annual_withdrawal,
            effective_income_tax_rate: config.effective_income_tax_rate,
        })?)
    } else {
        None
    };

    let margin_call_risk = output
        .margin_call_stats
        .last()
        .map(|m| m.cumulative_probability)
        .unwrap_or(0.0);

    if output.statistics.failed_iterations > 0 {
        warnings.push(format!(
            "{} of {} iterations depleted before the horizon",
            output.statistics.failed_iterations,
            output.terminal_values.len()
        ));
    }

    let summary = MetricsSummary {
        median_terminal_value,
        mean_terminal_value,
        cagr,
        mean_cagr,
        annualized_volatility,
        twrr,
        success_rate: output.statistics.success_rate,
        salary_equivalent,
        margin_call_risk,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "BBD Metrics Summary",
        &serde_json::json!({
            "initial_value": config.initial_value,
            "time_horizon": config.time_horizon,
            "iterations": output.terminal_values.len(),
            "cagr_basis": "median",
        }),
        warnings,
        elapsed,
        summary,
    ))
}

/// Year-over-year returns of the median portfolio path. Stops at the first
/// year the median path hits zero.
fn median_path_returns(output: &SimulationOutput) -> Vec<f64> {
    let path: Vec<f64> = output
        .yearly_percentiles
        .iter()
        .map(|y| y.portfolio_value.p50)
        .collect();
    let mut returns = Vec::with_capacity(path.len().saturating_sub(1));
    for pair in path.windows(2) {
        if pair[0] <= 0.0 {
            break;
        }
        returns.push(pair[1] / pair[0] - 1.0);
    }
    returns
}
