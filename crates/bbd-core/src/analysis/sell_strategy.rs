//! Counterfactual "sell assets for income" strategy.
//!
//! Replays the BBD simulation's percentile portfolio paths (the same market
//! realizations, not fresh draws) under sell-to-fund rules, so that the
//! difference between strategies is attributable to taxes and interest
//! rather than luck. Nine trajectories: the five percentile paths plus four
//! 50% interpolations between adjacent pairs.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::BbdError;
use crate::simulation::YearlyPercentiles;
use crate::stats::percentile_band;
use crate::types::{with_metadata, ComputationOutput, Percentiles};
use crate::BbdResult;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// The slice of the simulation config the sell strategy needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellStrategyConfig {
    pub initial_value: f64,
    pub cost_basis_ratio: f64,
    pub annual_withdrawal: f64,
    #[serde(default)]
    pub annual_withdrawal_raise: f64,
    #[serde(default)]
    pub start_year: u32,
    #[serde(default)]
    pub dividend_yield: f64,
    #[serde(default)]
    pub dividend_tax_rate: f64,
    #[serde(default)]
    pub capital_gains_rate: f64,
}

impl From<&SimulationConfig> for SellStrategyConfig {
    fn from(config: &SimulationConfig) -> Self {
        SellStrategyConfig {
            initial_value: config.initial_value,
            cost_basis_ratio: config.cost_basis_ratio,
            annual_withdrawal: config.annual_withdrawal,
            annual_withdrawal_raise: config.annual_withdrawal_raise,
            start_year: config.sbloc.start_year,
            dividend_yield: config.dividend_yield,
            dividend_tax_rate: config.dividend_tax_rate,
            capital_gains_rate: config.capital_gains_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One replayed trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellScenario {
    /// Which market path this scenario replayed, e.g. "P25" or "P25-P50".
    pub path: String,
    pub terminal_value: f64,
    pub lifetime_taxes: f64,
    pub depleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depletion_year: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellStrategyResult {
    pub scenarios: Vec<SellScenario>,
    /// Percentiles of terminal value over the nine scenarios.
    pub terminal_values: Percentiles,
    /// Percentiles of lifetime taxes over the nine scenarios.
    pub lifetime_taxes: Percentiles,
    /// Share of the nine scenarios that depleted, 0-100.
    pub depletion_probability: f64,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Replay the sell-to-fund strategy over the BBD percentile bands.
pub fn calculate_sell_strategy(
    config: &SellStrategyConfig,
    yearly_percentiles: &[YearlyPercentiles],
) -> BbdResult<ComputationOutput<SellStrategyResult>> {
    let start = Instant::now();

    if yearly_percentiles.len() < 2 {
        return Err(BbdError::InsufficientData(
            "At least two yearly percentile rows required (t=0 and one year)".into(),
        ));
    }
    if !(config.initial_value > 0.0) || !config.initial_value.is_finite() {
        return Err(BbdError::ConfigInvalid {
            field: "initial_value".into(),
            reason: "must be a positive finite number".into(),
        });
    }
    if !(config.cost_basis_ratio > 0.0 && config.cost_basis_ratio <= 1.0) {
        return Err(BbdError::ConfigInvalid {
            field: "cost_basis_ratio".into(),
            reason: "must be in (0, 1]".into(),
        });
    }

    let scenarios: Vec<SellScenario> = percentile_paths(yearly_percentiles)
        .into_iter()
        .map(|(label, path)| replay_path(config, &label, &path))
        .collect();

    let mut terminals: Vec<f64> = scenarios.iter().map(|s| s.terminal_value).collect();
    let mut taxes: Vec<f64> = scenarios.iter().map(|s| s.lifetime_taxes).collect();
    let depleted = scenarios.iter().filter(|s| s.depleted).count();
    let result = SellStrategyResult {
        terminal_values: percentile_band(&mut terminals),
        lifetime_taxes: percentile_band(&mut taxes),
        depletion_probability: 100.0 * depleted as f64 / scenarios.len() as f64,
        scenarios,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sell-to-Fund Withdrawal Strategy",
        &serde_json::json!({
            "initial_value": config.initial_value,
            "cost_basis_ratio": config.cost_basis_ratio,
            "capital_gains_rate": config.capital_gains_rate,
            "paths": 9,
            "market_path_source": "bbd_yearly_percentiles",
        }),
        Vec::new(),
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Path construction
// ---------------------------------------------------------------------------

/// The nine labeled market paths: five percentile value-paths and four
/// midpoint interpolations, ordered worst to best.
fn percentile_paths(bands: &[YearlyPercentiles]) -> Vec<(String, Vec<f64>)> {
    let extract = |pick: fn(&Percentiles) -> f64| -> Vec<f64> {
        bands.iter().map(|y| pick(&y.portfolio_value)).collect()
    };
    let base: [(&str, Vec<f64>); 5] = [
        ("P10", extract(|p| p.p10)),
        ("P25", extract(|p| p.p25)),
        ("P50", extract(|p| p.p50)),
        ("P75", extract(|p| p.p75)),
        ("P90", extract(|p| p.p90)),
    ];

    let mut paths = Vec::with_capacity(9);
    for window in 0..base.len() {
        paths.push((base[window].0.to_string(), base[window].1.clone()));
        if window + 1 < base.len() {
            let (lo_label, lo) = &base[window];
            let (hi_label, hi) = &base[window + 1];
            let mid: Vec<f64> = lo
                .iter()
                .zip(hi.iter())
                .map(|(a, b)| 0.5 * (a + b))
                .collect();
            paths.push((format!("{lo_label}-{hi_label}"), mid));
        }
    }
    paths
}

/// Year-over-year implied returns of a portfolio value path.
fn implied_returns(path: &[f64]) -> Vec<f64> {
    path.windows(2)
        .map(|pair| {
            if pair[0] > 0.0 {
                pair[1] / pair[0] - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

fn replay_path(config: &SellStrategyConfig, label: &str, path: &[f64]) -> SellScenario {
    let returns = implied_returns(path);
    let mut portfolio = config.initial_value;
    let mut cost_basis = config.initial_value * config.cost_basis_ratio;
    let mut lifetime_taxes = 0.0;
    let mut depleted = false;
    let mut depletion_year = None;

    for (idx, r) in returns.iter().enumerate() {
        let year = idx as u32 + 1;

        // 1. Dividend tax comes straight out of the portfolio, applied
        //    exactly once, before the withdrawal.
        if config.dividend_yield > 0.0 && config.dividend_tax_rate > 0.0 {
            let dividend_tax = portfolio * config.dividend_yield * config.dividend_tax_rate;
            portfolio -= dividend_tax;
            lifetime_taxes += dividend_tax;
            if portfolio <= 0.0 {
                portfolio = 0.0;
                depleted = true;
                depletion_year = Some(year);
                break;
            }
        }

        // 2. Withdrawal with capital-gains gross-up
        let withdrawal = grown_withdrawal(config, year);
        if withdrawal > 0.0 {
            let basis_sold = cost_basis * (withdrawal / portfolio);
            let gain = (withdrawal - basis_sold).max(0.0);
            let tax = gain * config.capital_gains_rate;
            let gross_sale = withdrawal + tax;

            if gross_sale >= portfolio {
                // Liquidate everything; the final sale is taxed on the
                // full remaining gain.
                let final_gain = (portfolio - cost_basis).max(0.0);
                lifetime_taxes += final_gain * config.capital_gains_rate;
                portfolio = 0.0;
                depleted = true;
                depletion_year = Some(year);
                break;
            }

            let before = portfolio;
            portfolio -= gross_sale;
            cost_basis *= 1.0 - gross_sale / before;
            lifetime_taxes += tax;
        }

        // 3. Market return
        portfolio = (portfolio * (1.0 + r)).max(0.0);
        if portfolio == 0.0 {
            depleted = true;
            depletion_year = Some(year);
            break;
        }
    }

    SellScenario {
        path: label.to_string(),
        terminal_value: portfolio,
        lifetime_taxes,
        depleted,
        depletion_year,
    }
}

fn grown_withdrawal(config: &SellStrategyConfig, year: u32) -> f64 {
    if year < config.start_year {
        return 0.0;
    }
    let growth_years = year - config.start_year;
    config.annual_withdrawal * (1.0 + config.annual_withdrawal_raise).powi(growth_years as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Percentiles;

    fn flat_bands(values: &[f64]) -> Vec<YearlyPercentiles> {
        values
            .iter()
            .enumerate()
            .map(|(year, &v)| YearlyPercentiles {
                year: year as u32,
                portfolio_value: Percentiles {
                    p10: v * 0.8,
                    p25: v * 0.9,
                    p50: v,
                    p75: v * 1.1,
                    p90: v * 1.2,
                },
                loan_balance: Percentiles {
                    p10: 0.0,
                    p25: 0.0,
                    p50: 0.0,
                    p75: 0.0,
                    p90: 0.0,
                },
                ltv: Percentiles {
                    p10: 0.0,
                    p25: 0.0,
                    p50: 0.0,
                    p75: 0.0,
                    p90: 0.0,
                },
            })
            .collect()
    }

    fn no_tax_config() -> SellStrategyConfig {
        SellStrategyConfig {
            initial_value: 1_000_000.0,
            cost_basis_ratio: 0.4,
            annual_withdrawal: 0.0,
            annual_withdrawal_raise: 0.0,
            start_year: 0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            capital_gains_rate: 0.238,
        }
    }

    #[test]
    fn test_gross_up_arithmetic() {
        // The canonical single-withdrawal example: 1M portfolio, 400k basis,
        // 100k withdrawal at 23.8% -> gross sale 114,280
        let mut config = no_tax_config();
        config.annual_withdrawal = 100_000.0;
        let scenario = replay_path(&config, "P50", &[1_000_000.0, 1_000_000.0]);
        // After the withdrawal the flat path applies a 0% implied return
        assert!((scenario.terminal_value - 885_720.0).abs() < 1e-6);
        assert!((scenario.lifetime_taxes - 14_280.0).abs() < 1e-6);
        assert!(!scenario.depleted);
    }

    #[test]
    fn test_basis_proration() {
        let mut config = no_tax_config();
        config.annual_withdrawal = 100_000.0;
        // Two flat years; second-year basis starts at 400k * (1 - 0.11428)
        let scenario = replay_path(
            &config,
            "P50",
            &[1_000_000.0, 1_000_000.0, 1_000_000.0],
        );
        let basis_after_year_1: f64 = 400_000.0 * (1.0 - 114_280.0 / 1_000_000.0);
        assert!((basis_after_year_1 - 354_288.0).abs() < 1e-6);

        // Year 2 on an 885,720 portfolio with that basis
        let basis_sold = basis_after_year_1 * (100_000.0 / 885_720.0);
        let tax2 = (100_000.0 - basis_sold) * 0.238;
        assert!((scenario.lifetime_taxes - (14_280.0 + tax2)).abs() < 1e-6);
    }

    #[test]
    fn test_dividend_tax_reduces_portfolio_once() {
        let mut config = no_tax_config();
        config.dividend_yield = 0.02;
        config.dividend_tax_rate = 0.238;
        let scenario = replay_path(&config, "P50", &[1_000_000.0, 1_000_000.0]);
        // Exactly one application: 1M * 0.02 * 0.238 = 4,760
        assert!((scenario.lifetime_taxes - 4_760.0).abs() < 1e-9);
        assert!((scenario.terminal_value - 995_240.0).abs() < 1e-9);
    }

    #[test]
    fn test_depletion_accumulates_final_tax() {
        let mut config = no_tax_config();
        config.annual_withdrawal = 2_000_000.0;
        let scenario = replay_path(&config, "P10", &[1_000_000.0, 1_000_000.0]);
        assert!(scenario.depleted);
        assert_eq!(scenario.depletion_year, Some(1));
        assert_eq!(scenario.terminal_value, 0.0);
        // Full liquidation: gain = 1M - 400k
        assert!((scenario.lifetime_taxes - 600_000.0 * 0.238).abs() < 1e-6);
    }

    #[test]
    fn test_nine_labeled_scenarios() {
        let bands = flat_bands(&[1_000_000.0, 1_070_000.0, 1_144_900.0]);
        let output = calculate_sell_strategy(&no_tax_config(), &bands).unwrap();
        let result = output.result;
        assert_eq!(result.scenarios.len(), 9);
        let labels: Vec<&str> = result.scenarios.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "P10", "P10-P25", "P25", "P25-P50", "P50", "P50-P75", "P75", "P75-P90", "P90"
            ]
        );
        assert_eq!(result.depletion_probability, 0.0);
        assert!(result.terminal_values.is_ordered());
    }

    #[test]
    fn test_no_withdrawal_tracks_market_path() {
        // With no flows and no dividends the replay just follows the path
        let bands = flat_bands(&[1_000_000.0, 1_100_000.0]);
        let output = calculate_sell_strategy(&no_tax_config(), &bands).unwrap();
        let median = &output.result.scenarios[4];
        assert_eq!(median.path, "P50");
        assert!((median.terminal_value - 1_100_000.0).abs() < 1e-6);
        assert_eq!(median.lifetime_taxes, 0.0);
    }

    #[test]
    fn test_rejects_short_bands() {
        let bands = flat_bands(&[1_000_000.0]);
        assert!(calculate_sell_strategy(&no_tax_config(), &bands).is_err());
    }
}
