//! The per-year SBLOC state transition.
//!
//! The step order is a correctness contract; reordering changes outcomes:
//!
//! 1. market return (floored at a zero portfolio)
//! 2. dividend-tax borrow (taxes paid from the loan, portfolio untouched)
//! 3. withdrawal borrow
//! 4. interest accrual
//! 5. LTV
//! 6. margin-call detection
//! 7. forced liquidation
//! 8. warning-zone flag
//! 9. failure check
//!
//! Monthly mode runs the same sequence twelve times on geometric-equal
//! return slices with equal sub-withdrawals and simple monthly interest;
//! compounding emerges from iteration.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::{CompoundingFrequency, SblocConfig};
use crate::types::{with_metadata, ComputationOutput};
use crate::BbdResult;

use super::liquidation::{liquidate, LiquidationEvent};
use super::state::SblocState;

const MONTHS_PER_YEAR: u32 = 12;

// ---------------------------------------------------------------------------
// Step input / output
// ---------------------------------------------------------------------------

/// Per-year market and cash-flow inputs to one step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepInput {
    /// Portfolio return for the year, as a decimal.
    pub year_return: f64,
    /// Withdrawal for the year, already inflation-adjusted by the caller.
    pub withdrawal: f64,
    pub dividend_yield: f64,
    pub dividend_tax_rate: f64,
    /// Simulation year being stepped (1-based).
    pub current_year: u32,
}

/// Result of stepping one year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearOutcome {
    pub state: SblocState,
    pub margin_call_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation: Option<LiquidationEvent>,
    pub portfolio_failed: bool,
    pub interest_charged: f64,
    pub withdrawal_made: f64,
    pub dividend_tax_borrowed: f64,
}

// ---------------------------------------------------------------------------
// Annual step
// ---------------------------------------------------------------------------

/// Advance one year with a single annual slice. Pure: the input state is
/// cloned, never mutated.
pub fn step_year(
    state: &SblocState,
    config: &SblocConfig,
    input: &StepInput,
) -> BbdResult<YearOutcome> {
    let mut s = state.clone();
    let mut interest_charged = 0.0;
    let mut withdrawal_made = 0.0;
    let mut dividend_tax_borrowed = 0.0;

    // 1. Market return
    s.portfolio_value = (s.portfolio_value * (1.0 + input.year_return)).max(0.0);

    // 2. Dividend-tax borrow: taxes are paid with borrowed money and the
    //    portfolio keeps compounding untouched.
    if input.dividend_yield > 0.0 && input.dividend_tax_rate > 0.0 {
        let dividend_tax = s.portfolio_value * input.dividend_yield * input.dividend_tax_rate;
        s.loan_balance += dividend_tax;
        dividend_tax_borrowed = dividend_tax;
    }

    // 3. Withdrawal
    if input.current_year >= config.start_year && input.withdrawal > 0.0 {
        s.loan_balance += input.withdrawal;
        withdrawal_made = input.withdrawal;
    }

    // 4. Interest accrual
    if s.loan_balance > 0.0 && config.annual_interest_rate > 0.0 {
        let rate = config.annual_interest_rate;
        let factor = match config.compounding {
            CompoundingFrequency::Annual => 1.0 + rate,
            CompoundingFrequency::Monthly => (1.0 + rate / 12.0).powi(12),
        };
        interest_charged = s.loan_balance * (factor - 1.0);
        s.loan_balance *= factor;
    }

    // 5-8. LTV, margin call, liquidation, warning zone
    s.refresh(config);
    let margin_call_triggered = s.current_ltv >= config.max_ltv;
    let liquidation = if margin_call_triggered {
        let event = liquidate(&mut s, config, input.current_year);
        s.refresh(config);
        event
    } else {
        None
    };

    // 9. Failure check
    let portfolio_failed = s.net_worth() <= 0.0;

    s.years_since_start = state.years_since_start + 1;

    #[cfg(debug_assertions)]
    s.validate(config)?;

    Ok(YearOutcome {
        state: s,
        margin_call_triggered,
        liquidation,
        portfolio_failed,
        interest_charged,
        withdrawal_made,
        dividend_tax_borrowed,
    })
}

// ---------------------------------------------------------------------------
// Monthly step
// ---------------------------------------------------------------------------

/// Advance one year as twelve monthly sub-steps.
///
/// The yearly return splits into geometric-equal monthly slices, the
/// withdrawal and dividend yield into twelve equal parts, and interest is
/// simple `rate/12` per month. The first margin call in the year wins; the
/// remaining months keep accruing on the post-liquidation state unless the
/// iteration failed.
pub fn step_year_monthly(
    state: &SblocState,
    config: &SblocConfig,
    input: &StepInput,
) -> BbdResult<YearOutcome> {
    let mut s = state.clone();
    let mut interest_charged = 0.0;
    let mut withdrawal_made = 0.0;
    let mut dividend_tax_borrowed = 0.0;
    let mut margin_call_triggered = false;
    let mut liquidation: Option<LiquidationEvent> = None;
    let mut portfolio_failed = false;

    let gross_year = (1.0 + input.year_return).max(0.0);
    let monthly_return = gross_year.powf(1.0 / 12.0) - 1.0;
    let withdrawing = input.current_year >= config.start_year && input.withdrawal > 0.0;
    let monthly_withdrawal = input.withdrawal / f64::from(MONTHS_PER_YEAR);
    let monthly_yield = input.dividend_yield / f64::from(MONTHS_PER_YEAR);
    let monthly_rate = config.annual_interest_rate / f64::from(MONTHS_PER_YEAR);

    for _month in 1..=MONTHS_PER_YEAR {
        s.portfolio_value = (s.portfolio_value * (1.0 + monthly_return)).max(0.0);

        if monthly_yield > 0.0 && input.dividend_tax_rate > 0.0 {
            let dividend_tax = s.portfolio_value * monthly_yield * input.dividend_tax_rate;
            s.loan_balance += dividend_tax;
            dividend_tax_borrowed += dividend_tax;
        }

        if withdrawing {
            s.loan_balance += monthly_withdrawal;
            withdrawal_made += monthly_withdrawal;
        }

        if s.loan_balance > 0.0 && monthly_rate > 0.0 {
            let interest = s.loan_balance * monthly_rate;
            s.loan_balance += interest;
            interest_charged += interest;
        }

        s.refresh(config);
        if s.current_ltv >= config.max_ltv {
            margin_call_triggered = true;
            if liquidation.is_none() {
                liquidation = liquidate(&mut s, config, input.current_year);
                s.refresh(config);
            }
        }

        if s.net_worth() <= 0.0 {
            portfolio_failed = true;
            break;
        }
    }

    s.years_since_start = state.years_since_start + 1;

    #[cfg(debug_assertions)]
    s.validate(config)?;

    Ok(YearOutcome {
        state: s,
        margin_call_triggered,
        liquidation,
        portfolio_failed,
        interest_charged,
        withdrawal_made,
        dividend_tax_borrowed,
    })
}

// ---------------------------------------------------------------------------
// Standalone deterministic projection (engine mode)
// ---------------------------------------------------------------------------

/// Input for a deterministic single-path projection over a known return path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SblocProjectionInput {
    pub initial_value: f64,
    #[serde(default)]
    pub initial_loan_balance: f64,
    #[serde(default)]
    pub annual_withdrawal: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    #[serde(default)]
    pub dividend_tax_rate: f64,
    #[serde(default)]
    pub withdraw_monthly: bool,
    /// One portfolio return per projection year.
    pub returns: Vec<f64>,
    pub sbloc: SblocConfig,
}

/// One projected year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SblocProjectionYear {
    pub year: u32,
    pub portfolio_value: f64,
    pub loan_balance: f64,
    pub current_ltv: f64,
    pub in_warning_zone: bool,
    pub margin_call_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidation: Option<LiquidationEvent>,
    pub interest_charged: f64,
    pub withdrawal_made: f64,
    pub dividend_tax_borrowed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SblocProjection {
    pub years: Vec<SblocProjectionYear>,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_year: Option<u32>,
}

/// Deterministic engine-mode projection. This is the one place
/// `withdrawal_growth_rate` is honored; the Monte Carlo driver grows
/// withdrawals itself.
pub fn project_sbloc(
    input: &SblocProjectionInput,
) -> BbdResult<ComputationOutput<SblocProjection>> {
    let start = Instant::now();

    if !(input.initial_value > 0.0) || !input.initial_value.is_finite() {
        return Err(crate::error::BbdError::ConfigInvalid {
            field: "initial_value".into(),
            reason: "must be a positive finite number".into(),
        });
    }
    if input.returns.is_empty() {
        return Err(crate::error::BbdError::InsufficientData(
            "at least one projection year return required".into(),
        ));
    }

    let config = &input.sbloc;
    let mut state = SblocState::initial(input.initial_value, input.initial_loan_balance, config)?;
    let mut years = Vec::with_capacity(input.returns.len());
    let mut failed = false;
    let mut failed_year = None;

    for (idx, year_return) in input.returns.iter().enumerate() {
        let year = idx as u32 + 1;
        if failed {
            years.push(terminal_year(year, &state));
            continue;
        }

        let withdrawal = if year >= config.start_year {
            let growth_years = year.saturating_sub(config.start_year);
            input.annual_withdrawal
                * (1.0 + config.withdrawal_growth_rate).powi(growth_years as i32)
        } else {
            0.0
        };
        let step = StepInput {
            year_return: *year_return,
            withdrawal,
            dividend_yield: input.dividend_yield,
            dividend_tax_rate: input.dividend_tax_rate,
            current_year: year,
        };
        let outcome = if input.withdraw_monthly {
            step_year_monthly(&state, config, &step)?
        } else {
            step_year(&state, config, &step)?
        };

        years.push(SblocProjectionYear {
            year,
            portfolio_value: outcome.state.portfolio_value,
            loan_balance: outcome.state.loan_balance,
            current_ltv: outcome.state.current_ltv,
            in_warning_zone: outcome.state.in_warning_zone,
            margin_call_triggered: outcome.margin_call_triggered,
            liquidation: outcome.liquidation.clone(),
            interest_charged: outcome.interest_charged,
            withdrawal_made: outcome.withdrawal_made,
            dividend_tax_borrowed: outcome.dividend_tax_borrowed,
        });

        if outcome.portfolio_failed {
            failed = true;
            failed_year = Some(year);
            state = outcome.state;
            state.portfolio_value = 0.0;
            state.refresh(config);
        } else {
            state = outcome.state;
        }
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "SBLOC Deterministic Projection",
        &serde_json::json!({
            "initial_value": input.initial_value,
            "initial_loan_balance": input.initial_loan_balance,
            "years": input.returns.len(),
            "withdraw_monthly": input.withdraw_monthly,
            "compounding": input.sbloc.compounding,
        }),
        Vec::new(),
        elapsed,
        SblocProjection {
            years,
            failed,
            failed_year,
        },
    ))
}

fn terminal_year(year: u32, state: &SblocState) -> SblocProjectionYear {
    SblocProjectionYear {
        year,
        portfolio_value: 0.0,
        loan_balance: state.loan_balance,
        current_ltv: state.current_ltv,
        in_warning_zone: false,
        margin_call_triggered: false,
        liquidation: None,
        interest_charged: 0.0,
        withdrawal_made: 0.0,
        dividend_tax_borrowed: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::base_config;

    fn quiet_input(year_return: f64) -> StepInput {
        StepInput {
            year_return,
            withdrawal: 0.0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            current_year: 1,
        }
    }

    fn initial(portfolio: f64, loan: f64) -> (SblocState, crate::config::SblocConfig) {
        let config = base_config().sbloc;
        let state = SblocState::initial(portfolio, loan, &config).unwrap();
        (state, config)
    }

    #[test]
    fn test_step_does_not_mutate_input_state() {
        let (state, config) = initial(1_000_000.0, 200_000.0);
        let before = state.clone();
        step_year(&state, &config, &quiet_input(0.08)).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn test_return_applied_before_withdrawal_and_interest() {
        let (state, config) = initial(1_000_000.0, 0.0);
        let input = StepInput {
            year_return: 0.10,
            withdrawal: 50_000.0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            current_year: 1,
        };
        let outcome = step_year(&state, &config, &input).unwrap();
        assert!((outcome.state.portfolio_value - 1_100_000.0).abs() < 1e-9);
        // Loan: 50k withdrawal, then one year of annual interest at 7.4%
        assert!((outcome.state.loan_balance - 50_000.0 * 1.074).abs() < 1e-9);
        assert!((outcome.interest_charged - 50_000.0 * 0.074).abs() < 1e-9);
        assert_eq!(outcome.withdrawal_made, 50_000.0);
    }

    #[test]
    fn test_dividend_tax_is_borrowed_not_deducted() {
        let (state, config) = initial(1_000_000.0, 0.0);
        let input = StepInput {
            year_return: 0.0,
            withdrawal: 0.0,
            dividend_yield: 0.02,
            dividend_tax_rate: 0.238,
            current_year: 1,
        };
        let outcome = step_year(&state, &config, &input).unwrap();
        // Portfolio untouched by taxes
        assert_eq!(outcome.state.portfolio_value, 1_000_000.0);
        let expected_tax = 1_000_000.0 * 0.02 * 0.238;
        assert!((outcome.dividend_tax_borrowed - expected_tax).abs() < 1e-9);
        assert!((outcome.state.loan_balance - expected_tax * 1.074).abs() < 1e-6);
    }

    #[test]
    fn test_catastrophic_return_floors_portfolio_at_zero() {
        let (state, config) = initial(1_000_000.0, 0.0);
        let outcome = step_year(&state, &config, &quiet_input(-1.5)).unwrap();
        assert_eq!(outcome.state.portfolio_value, 0.0);
        assert_eq!(outcome.state.current_ltv, 0.0);
    }

    #[test]
    fn test_forced_liquidation_scenario() {
        // $1M portfolio at 50% LTV, -45% year: the canonical margin-call path
        let (state, config) = initial(1_000_000.0, 500_000.0);
        let outcome = step_year(&state, &config, &quiet_input(-0.45)).unwrap();

        assert!(outcome.margin_call_triggered);
        let event = outcome.liquidation.as_ref().unwrap();
        assert!((event.assets_liquidated - 294_736.8421052632).abs() < 1e-4);
        assert!((outcome.state.portfolio_value - 255_263.1578947368).abs() < 1e-4);
        assert!((outcome.state.loan_balance - 220_000.0).abs() < 1e-6);
        assert!((outcome.state.current_ltv - 0.8621).abs() < 1e-3);
        // Net worth still positive: not failed, but next year will re-trigger
        assert!(!outcome.portfolio_failed);
    }

    #[test]
    fn test_withdrawal_respects_start_year() {
        let (state, mut config) = initial(1_000_000.0, 0.0);
        config.start_year = 5;
        let input = StepInput {
            year_return: 0.0,
            withdrawal: 50_000.0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            current_year: 3,
        };
        let outcome = step_year(&state, &config, &input).unwrap();
        assert_eq!(outcome.withdrawal_made, 0.0);
        assert_eq!(outcome.state.loan_balance, 0.0);
    }

    #[test]
    fn test_years_since_start_increments_once_per_year() {
        let (state, config) = initial(1_000_000.0, 0.0);
        let annual = step_year(&state, &config, &quiet_input(0.05)).unwrap();
        assert_eq!(annual.state.years_since_start, 1);
        let monthly = step_year_monthly(&state, &config, &quiet_input(0.05)).unwrap();
        assert_eq!(monthly.state.years_since_start, 1);
    }

    #[test]
    fn test_monthly_compounding_beats_annual() {
        let (state, config) = initial(10_000_000.0, 1_000_000.0);
        let mut monthly_config = config.clone();
        monthly_config.compounding = CompoundingFrequency::Monthly;

        let annual = step_year(&state, &config, &quiet_input(0.0)).unwrap();
        let monthly = step_year(&state, &monthly_config, &quiet_input(0.0)).unwrap();
        assert!(monthly.state.loan_balance > annual.state.loan_balance);

        // Effective uplift at 7.4% nominal is roughly 26bp
        let effective = monthly.state.loan_balance / 1_000_000.0 - 1.0;
        assert!((effective - 0.074) > 0.0024 && (effective - 0.074) < 0.0028);
    }

    #[test]
    fn test_monthly_mode_matches_annual_growth_without_loan() {
        // Twelve geometric-equal slices reproduce the annual return exactly
        let (state, config) = initial(1_000_000.0, 0.0);
        let outcome = step_year_monthly(&state, &config, &quiet_input(0.09)).unwrap();
        assert!((outcome.state.portfolio_value - 1_090_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_monthly_withdrawals_sum_to_annual() {
        let (state, config) = initial(1_000_000.0, 0.0);
        let input = StepInput {
            year_return: 0.0,
            withdrawal: 120_000.0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            current_year: 1,
        };
        let outcome = step_year_monthly(&state, &config, &input).unwrap();
        assert!((outcome.withdrawal_made - 120_000.0).abs() < 1e-9);
        // Interest accrues month by month on the growing balance, so the
        // loan ends above principal but below a full year of interest on it.
        assert!(outcome.state.loan_balance > 120_000.0);
        assert!(outcome.state.loan_balance < 120_000.0 * 1.074);
    }

    #[test]
    fn test_monthly_margin_call_first_hit_wins() {
        let (state, config) = initial(1_000_000.0, 620_000.0);
        // Flat year; interest alone pushes LTV over 0.65 early in the year
        let outcome = step_year_monthly(&state, &config, &quiet_input(0.0)).unwrap();
        assert!(outcome.margin_call_triggered);
        // Exactly one liquidation recorded for the year
        assert!(outcome.liquidation.is_some());
    }

    #[test]
    fn test_failure_when_loan_exceeds_portfolio() {
        let (state, config) = initial(1_000_000.0, 500_000.0);
        let outcome = step_year(&state, &config, &quiet_input(-0.70)).unwrap();
        // 300k portfolio cannot cover the 500k+ loan even fully liquidated
        assert!(outcome.portfolio_failed);
        assert!(outcome.state.portfolio_value >= 0.0);
        assert!(outcome.state.loan_balance >= 0.0);
    }

    #[test]
    fn test_projection_applies_withdrawal_growth() {
        let mut sbloc = base_config().sbloc;
        sbloc.withdrawal_growth_rate = 0.10;
        sbloc.start_year = 0;
        let input = SblocProjectionInput {
            initial_value: 10_000_000.0,
            initial_loan_balance: 0.0,
            annual_withdrawal: 100_000.0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            withdraw_monthly: false,
            returns: vec![0.0, 0.0],
            sbloc,
        };
        let projection = project_sbloc(&input).unwrap().result;
        // Year 1: one growth step from start_year 0; year 2: two steps
        assert!((projection.years[0].withdrawal_made - 110_000.0).abs() < 1e-9);
        assert!((projection.years[1].withdrawal_made - 121_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_marks_failure_and_terminal_years() {
        let sbloc = base_config().sbloc;
        let input = SblocProjectionInput {
            initial_value: 1_000_000.0,
            initial_loan_balance: 500_000.0,
            annual_withdrawal: 0.0,
            dividend_yield: 0.0,
            dividend_tax_rate: 0.0,
            withdraw_monthly: false,
            returns: vec![-0.70, 0.10, 0.10],
            sbloc,
        };
        let projection = project_sbloc(&input).unwrap().result;
        assert!(projection.failed);
        assert_eq!(projection.failed_year, Some(1));
        assert_eq!(projection.years[1].portfolio_value, 0.0);
        assert_eq!(projection.years[2].portfolio_value, 0.0);
    }
}
