use serde::{Deserialize, Serialize};

use crate::config::SblocConfig;
use crate::error::BbdError;
use crate::BbdResult;

/// Mutable per-iteration state of a portfolio-loan pair.
///
/// Invariants:
/// - `current_ltv = loan / portfolio` when `portfolio > 0`; `+inf` exactly
///   when `portfolio = 0` and `loan > 0`; `0` otherwise.
/// - `in_warning_zone` iff `maintenance_margin <= current_ltv < max_ltv`.
/// - No field is ever NaN; `years_since_start` only moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SblocState {
    pub loan_balance: f64,
    pub portfolio_value: f64,
    pub current_ltv: f64,
    pub in_warning_zone: bool,
    pub years_since_start: u32,
}

/// Loan-to-value with the single sanctioned infinity case.
pub fn compute_ltv(portfolio_value: f64, loan_balance: f64) -> f64 {
    if portfolio_value > 0.0 {
        loan_balance / portfolio_value
    } else if loan_balance > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

impl SblocState {
    /// Validated state at t = 0.
    pub fn initial(
        portfolio_value: f64,
        loan_balance: f64,
        config: &SblocConfig,
    ) -> BbdResult<Self> {
        let mut state = SblocState {
            loan_balance,
            portfolio_value,
            current_ltv: 0.0,
            in_warning_zone: false,
            years_since_start: 0,
        };
        state.refresh(config);
        state.validate(config)?;
        Ok(state)
    }

    /// Recompute the derived fields (LTV and warning zone).
    pub(crate) fn refresh(&mut self, config: &SblocConfig) {
        self.current_ltv = compute_ltv(self.portfolio_value, self.loan_balance);
        self.in_warning_zone =
            self.current_ltv >= config.maintenance_margin && self.current_ltv < config.max_ltv;
    }

    /// Net worth, the failure criterion input.
    pub fn net_worth(&self) -> f64 {
        self.portfolio_value - self.loan_balance
    }

    /// Check invariants I1-I3. Cheap enough for debug-build per-year use.
    pub fn validate(&self, config: &SblocConfig) -> BbdResult<()> {
        if self.portfolio_value.is_nan() || self.portfolio_value < 0.0 {
            return Err(self.violation("portfolio_value", "must be a non-negative number"));
        }
        if self.loan_balance.is_nan() || self.loan_balance < 0.0 {
            return Err(self.violation("loan_balance", "must be a non-negative number"));
        }
        let expected = compute_ltv(self.portfolio_value, self.loan_balance);
        let consistent = if expected.is_infinite() {
            self.current_ltv.is_infinite() && self.current_ltv > 0.0
        } else {
            (self.current_ltv - expected).abs() < 1e-9
        };
        if self.current_ltv.is_nan() || !consistent {
            return Err(self.violation(
                "current_ltv",
                "inconsistent with loan_balance / portfolio_value",
            ));
        }
        if self.current_ltv.is_infinite()
            && !(self.portfolio_value == 0.0 && self.loan_balance > 0.0)
        {
            return Err(self.violation(
                "current_ltv",
                "infinite LTV only allowed when portfolio is 0 and loan is positive",
            ));
        }
        let expected_warning =
            self.current_ltv >= config.maintenance_margin && self.current_ltv < config.max_ltv;
        if self.in_warning_zone != expected_warning {
            return Err(self.violation("in_warning_zone", "inconsistent with current LTV"));
        }
        Ok(())
    }

    fn violation(&self, field: &str, message: &str) -> BbdError {
        BbdError::StateInvariantViolated {
            field: field.into(),
            message: message.into(),
            iteration: None,
            year: Some(self.years_since_start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::base_config;

    #[test]
    fn test_ltv_definition() {
        assert_eq!(compute_ltv(1_000_000.0, 500_000.0), 0.5);
        assert_eq!(compute_ltv(0.0, 100.0), f64::INFINITY);
        assert_eq!(compute_ltv(0.0, 0.0), 0.0);
        assert_eq!(compute_ltv(100.0, 0.0), 0.0);
    }

    #[test]
    fn test_initial_state_sets_ltv_and_warning() {
        let config = base_config().sbloc;
        let state = SblocState::initial(1_000_000.0, 550_000.0, &config).unwrap();
        assert_eq!(state.current_ltv, 0.55);
        // 0.50 <= 0.55 < 0.65
        assert!(state.in_warning_zone);

        let calm = SblocState::initial(1_000_000.0, 100_000.0, &config).unwrap();
        assert!(!calm.in_warning_zone);
    }

    #[test]
    fn test_validate_rejects_nan() {
        let config = base_config().sbloc;
        let mut state = SblocState::initial(1_000_000.0, 0.0, &config).unwrap();
        state.portfolio_value = f64::NAN;
        assert!(state.validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_stale_ltv() {
        let config = base_config().sbloc;
        let mut state = SblocState::initial(1_000_000.0, 500_000.0, &config).unwrap();
        state.loan_balance = 700_000.0; // derived fields not refreshed
        assert!(state.validate(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_sanctioned_infinity() {
        let config = base_config().sbloc;
        let mut state = SblocState::initial(1_000_000.0, 500_000.0, &config).unwrap();
        state.portfolio_value = 0.0;
        state.refresh(&config);
        assert_eq!(state.current_ltv, f64::INFINITY);
        assert!(state.validate(&config).is_ok());
    }
}
