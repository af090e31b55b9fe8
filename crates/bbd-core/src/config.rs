//! Simulation configuration: the immutable input crossing the engine boundary.
//!
//! Every range and structural invariant is checked once, at run construction.
//! Violations reject the whole run with a `ConfigInvalid` naming the field;
//! the only soft case is an out-of-range `liquidation_target_multiplier`,
//! which warns and falls back to the default.

use serde::{Deserialize, Serialize};

use crate::error::BbdError;
use crate::history::ReturnHistory;
use crate::stats::{cholesky, validate_correlation_matrix};
use crate::types::AssetClass;
use crate::BbdResult;

pub const DEFAULT_LIQUIDATION_TARGET_MULTIPLIER: f64 = 0.8;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// One position of the diversified portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub asset_class: AssetClass,
    /// Non-negative weight; all weights must sum to 1 within 1e-6.
    pub weight: f64,
}

// ---------------------------------------------------------------------------
// Return model selection
// ---------------------------------------------------------------------------

/// Market regime of the switching model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bull,
    Bear,
    Crash,
}

/// Per-regime, per-asset return distribution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSpec {
    pub regime: Regime,
    /// Mean annual return per asset, in portfolio order.
    pub mean: Vec<f64>,
    /// Annual return standard deviation per asset, in portfolio order.
    pub std_dev: Vec<f64>,
}

/// Parameters of the regime-switching return model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeModelParams {
    /// Row-stochastic 3x3 transition matrix in regime order bull, bear, crash.
    pub transition: Vec<Vec<f64>>,
    pub regimes: Vec<RegimeSpec>,
}

/// Which stochastic return model drives the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "kebab-case")]
pub enum ReturnModelSpec {
    /// Sample with replacement from aligned historical annual rows.
    Bootstrap { history: ReturnHistory },
    /// Markov chain over bull/bear/crash with correlated normal draws.
    RegimeSwitching { params: RegimeModelParams },
}

// ---------------------------------------------------------------------------
// SBLOC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompoundingFrequency {
    Annual,
    Monthly,
}

/// Securities-backed line of credit terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SblocConfig {
    pub annual_interest_rate: f64,
    pub max_ltv: f64,
    pub maintenance_margin: f64,
    pub liquidation_haircut: f64,
    /// Post-liquidation target LTV as a fraction of the maintenance margin.
    #[serde(default = "default_liquidation_target_multiplier")]
    pub liquidation_target_multiplier: f64,
    pub compounding: CompoundingFrequency,
    /// First simulation year in which withdrawals are drawn.
    #[serde(default)]
    pub start_year: u32,
    /// Annual withdrawal growth. Only honored by the standalone projection;
    /// the Monte Carlo driver passes already-grown withdrawals and leaves
    /// this at 0.
    #[serde(default)]
    pub withdrawal_growth_rate: f64,
}

fn default_liquidation_target_multiplier() -> f64 {
    DEFAULT_LIQUIDATION_TARGET_MULTIPLIER
}

impl SblocConfig {
    /// Target LTV restored by a forced liquidation.
    pub fn target_ltv(&self) -> f64 {
        self.maintenance_margin * self.liquidation_target_multiplier
    }
}

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

/// Immutable input for a full Monte Carlo run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Portfolio value at t = 0, currency units.
    pub initial_value: f64,
    /// Horizon in whole years.
    pub time_horizon: u32,
    /// Number of independent trajectories.
    pub iterations: u32,
    /// First-year withdrawal, before inflation raises.
    #[serde(default)]
    pub annual_withdrawal: f64,
    /// Annual withdrawal raise as a decimal (0.03 = 3%).
    #[serde(default)]
    pub annual_withdrawal_raise: f64,
    /// Loan balance already drawn at t = 0.
    #[serde(default)]
    pub initial_loc_balance: f64,
    /// Cost basis as a fraction of initial value, in (0, 1].
    pub cost_basis_ratio: f64,
    #[serde(default)]
    pub dividend_yield: f64,
    #[serde(default)]
    pub dividend_tax_rate: f64,
    #[serde(default)]
    pub capital_gains_rate: f64,
    #[serde(default)]
    pub effective_income_tax_rate: f64,
    pub portfolio: Vec<PortfolioPosition>,
    /// Asset-class correlation matrix in portfolio order. Required by the
    /// regime-switching model; ignored by bootstrap (row coupling).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_matrix: Option<Vec<Vec<f64>>>,
    pub return_model: ReturnModelSpec,
    #[serde(default)]
    pub withdraw_monthly: bool,
    pub sbloc: SblocConfig,
    /// Federal estate tax exemption, echoed in the estate analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estate_tax_exemption: Option<f64>,
    /// Master seed. When present the entire run is reproducible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SimulationConfig {
    /// Validate every boundary invariant. Returns the non-fatal warnings to
    /// surface in the output envelope.
    pub fn validate(&self) -> BbdResult<Vec<String>> {
        let mut warnings = Vec::new();

        if !(self.initial_value > 0.0) || !self.initial_value.is_finite() {
            return Err(invalid("initial_value", "must be a positive finite number"));
        }
        if self.time_horizon < 1 {
            return Err(invalid("time_horizon", "must be at least 1 year"));
        }
        if self.iterations < 1 {
            return Err(invalid("iterations", "must be at least 1"));
        }
        if !(self.annual_withdrawal >= 0.0) {
            return Err(invalid("annual_withdrawal", "cannot be negative"));
        }
        if !(self.annual_withdrawal_raise >= -1.0) {
            return Err(invalid("annual_withdrawal_raise", "must be >= -1"));
        }
        if !(self.initial_loc_balance >= 0.0) {
            return Err(invalid("initial_loc_balance", "cannot be negative"));
        }
        if !(self.cost_basis_ratio > 0.0 && self.cost_basis_ratio <= 1.0) {
            return Err(invalid("cost_basis_ratio", "must be in (0, 1]"));
        }
        if !(0.0..=0.2).contains(&self.dividend_yield) {
            return Err(invalid("dividend_yield", "must be in [0, 0.2]"));
        }
        for (field, rate) in [
            ("dividend_tax_rate", self.dividend_tax_rate),
            ("capital_gains_rate", self.capital_gains_rate),
            ("effective_income_tax_rate", self.effective_income_tax_rate),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(invalid(field, "must be in [0, 1)"));
            }
        }

        self.validate_portfolio()?;
        self.validate_return_model()?;
        self.sbloc_warnings(&mut warnings)?;

        Ok(warnings)
    }

    /// The SBLOC config with the liquidation multiplier defaulted when out of
    /// range. Pair with the warning emitted by `validate`.
    pub fn effective_sbloc(&self) -> SblocConfig {
        let mut sbloc = self.sbloc.clone();
        let m = sbloc.liquidation_target_multiplier;
        if !(m > 0.0 && m <= 1.0) || !m.is_finite() {
            sbloc.liquidation_target_multiplier = DEFAULT_LIQUIDATION_TARGET_MULTIPLIER;
        }
        sbloc
    }

    /// Initial cost basis in currency units.
    pub fn cost_basis(&self) -> f64 {
        self.initial_value * self.cost_basis_ratio
    }

    pub fn weights(&self) -> Vec<f64> {
        self.portfolio.iter().map(|p| p.weight).collect()
    }

    fn validate_portfolio(&self) -> BbdResult<()> {
        if self.portfolio.is_empty() {
            return Err(invalid("portfolio", "must contain at least one position"));
        }
        let mut sum = 0.0;
        for (i, pos) in self.portfolio.iter().enumerate() {
            if !(pos.weight >= 0.0) || !pos.weight.is_finite() {
                return Err(invalid(
                    "portfolio",
                    &format!("weight at position {i} must be a non-negative finite number"),
                ));
            }
            sum += pos.weight;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(
                "portfolio",
                &format!("weights must sum to 1 within 1e-6 (got {sum})"),
            ));
        }
        Ok(())
    }

    fn validate_return_model(&self) -> BbdResult<()> {
        let n = self.portfolio.len();
        match &self.return_model {
            ReturnModelSpec::Bootstrap { history } => {
                if history.rows.is_empty() {
                    return Err(invalid("return_model.history", "history must be non-empty"));
                }
                for pos in &self.portfolio {
                    if history.column_of(&pos.asset_class).is_none() {
                        return Err(invalid(
                            "return_model.history",
                            &format!("no history for asset class {:?}", pos.asset_class),
                        ));
                    }
                }
            }
            ReturnModelSpec::RegimeSwitching { params } => {
                let corr = self.correlation_matrix.as_ref().ok_or_else(|| {
                    invalid(
                        "correlation_matrix",
                        "required by the regime-switching model",
                    )
                })?;
                validate_correlation_matrix(corr, n)?;
                // PSD check is the Cholesky attempt itself
                cholesky(corr)?;
                validate_regime_params(params, n)?;
            }
        }
        Ok(())
    }

    fn sbloc_warnings(&self, warnings: &mut Vec<String>) -> BbdResult<()> {
        let s = &self.sbloc;
        if !(0.0..1.0).contains(&s.annual_interest_rate) {
            return Err(invalid("sbloc.annual_interest_rate", "must be in [0, 1)"));
        }
        if !(s.max_ltv > 0.0 && s.max_ltv <= 1.0) {
            return Err(invalid("sbloc.max_ltv", "must be in (0, 1]"));
        }
        if !(s.maintenance_margin > 0.0 && s.maintenance_margin < s.max_ltv) {
            return Err(invalid(
                "sbloc.maintenance_margin",
                "must be in (0, max_ltv)",
            ));
        }
        if !(0.0..1.0).contains(&s.liquidation_haircut) {
            return Err(invalid("sbloc.liquidation_haircut", "must be in [0, 1)"));
        }
        let m = s.liquidation_target_multiplier;
        if !(m > 0.0 && m <= 1.0) || !m.is_finite() {
            warnings.push(format!(
                "liquidation_target_multiplier {m} outside (0, 1]; using default {DEFAULT_LIQUIDATION_TARGET_MULTIPLIER}"
            ));
        }
        Ok(())
    }
}

fn validate_regime_params(params: &RegimeModelParams, n_assets: usize) -> BbdResult<()> {
    if params.transition.len() != 3 {
        return Err(invalid(
            "return_model.transition",
            "transition matrix must be 3x3 (bull, bear, crash)",
        ));
    }
    for (i, row) in params.transition.iter().enumerate() {
        if row.len() != 3 {
            return Err(invalid(
                "return_model.transition",
                &format!("row {i} must have 3 entries"),
            ));
        }
        let sum: f64 = row.iter().sum();
        if row.iter().any(|p| !(0.0..=1.0).contains(p)) || (sum - 1.0).abs() > 1e-9 {
            return Err(invalid(
                "return_model.transition",
                &format!("row {i} must be a probability distribution (sums to {sum})"),
            ));
        }
    }
    if params.regimes.len() != 3 {
        return Err(invalid(
            "return_model.regimes",
            "exactly three regimes required (bull, bear, crash)",
        ));
    }
    for expected in [Regime::Bull, Regime::Bear, Regime::Crash] {
        if !params.regimes.iter().any(|r| r.regime == expected) {
            return Err(invalid(
                "return_model.regimes",
                &format!("missing regime {expected:?}"),
            ));
        }
    }
    for spec in &params.regimes {
        if spec.mean.len() != n_assets || spec.std_dev.len() != n_assets {
            return Err(invalid(
                "return_model.regimes",
                &format!(
                    "regime {:?} must provide mean/std_dev for all {n_assets} assets",
                    spec.regime
                ),
            ));
        }
        if spec.std_dev.iter().any(|s| !(*s >= 0.0) || !s.is_finite()) {
            return Err(invalid(
                "return_model.regimes",
                &format!("regime {:?} std_dev must be non-negative", spec.regime),
            ));
        }
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> BbdError {
    BbdError::ConfigInvalid {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::history::HistoricalReturnRecord;

    pub(crate) fn flat_history(years: usize, r: f64) -> ReturnHistory {
        let records: Vec<HistoricalReturnRecord> = (0..years)
            .map(|i| HistoricalReturnRecord {
                symbol: "VTI".into(),
                name: "Total Market".into(),
                asset_class: AssetClass::UsEquity,
                year: 2000 + i as i32,
                annual_return: r,
            })
            .collect();
        ReturnHistory::from_records(&records).unwrap()
    }

    pub(crate) fn base_config() -> SimulationConfig {
        SimulationConfig {
            initial_value: 1_000_000.0,
            time_horizon: 10,
            iterations: 100,
            annual_withdrawal: 40_000.0,
            annual_withdrawal_raise: 0.03,
            initial_loc_balance: 0.0,
            cost_basis_ratio: 0.4,
            dividend_yield: 0.02,
            dividend_tax_rate: 0.238,
            capital_gains_rate: 0.238,
            effective_income_tax_rate: 0.37,
            portfolio: vec![PortfolioPosition {
                asset_class: AssetClass::UsEquity,
                weight: 1.0,
            }],
            correlation_matrix: None,
            return_model: ReturnModelSpec::Bootstrap {
                history: flat_history(20, 0.07),
            },
            withdraw_monthly: false,
            sbloc: SblocConfig {
                annual_interest_rate: 0.074,
                max_ltv: 0.65,
                maintenance_margin: 0.50,
                liquidation_haircut: 0.05,
                liquidation_target_multiplier: 0.8,
                compounding: CompoundingFrequency::Annual,
                start_year: 0,
                withdrawal_growth_rate: 0.0,
            },
            estate_tax_exemption: Some(13_610_000.0),
            seed: Some(42),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_nonpositive_initial_value() {
        let mut config = base_config();
        config.initial_value = 0.0;
        assert!(matches!(
            config.validate(),
            Err(BbdError::ConfigInvalid { field, .. }) if field == "initial_value"
        ));
    }

    #[test]
    fn test_rejects_weight_sum_off_by_more_than_tolerance() {
        let mut config = base_config();
        config.portfolio = vec![
            PortfolioPosition {
                asset_class: AssetClass::UsEquity,
                weight: 0.6,
            },
            PortfolioPosition {
                asset_class: AssetClass::Bonds,
                weight: 0.5,
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = base_config();
        config.portfolio = vec![
            PortfolioPosition {
                asset_class: AssetClass::UsEquity,
                weight: 1.5,
            },
            PortfolioPosition {
                asset_class: AssetClass::Bonds,
                weight: -0.5,
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_history_class() {
        let mut config = base_config();
        config.portfolio = vec![PortfolioPosition {
            asset_class: AssetClass::Bonds,
            weight: 1.0,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_maintenance_margin_at_max_ltv() {
        let mut config = base_config();
        config.sbloc.maintenance_margin = config.sbloc.max_ltv;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_liquidation_multiplier_warns_and_defaults() {
        let mut config = base_config();
        config.sbloc.liquidation_target_multiplier = 1.7;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("liquidation_target_multiplier"));
        assert_eq!(
            config.effective_sbloc().liquidation_target_multiplier,
            DEFAULT_LIQUIDATION_TARGET_MULTIPLIER
        );
    }

    #[test]
    fn test_regime_model_requires_correlation_matrix() {
        let mut config = base_config();
        config.return_model = ReturnModelSpec::RegimeSwitching {
            params: symmetric_regime_params(1),
        };
        config.correlation_matrix = None;
        assert!(config.validate().is_err());

        config.correlation_matrix = Some(vec![vec![1.0]]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_regime_model_rejects_non_stochastic_transition() {
        let mut params = symmetric_regime_params(1);
        params.transition[0] = vec![0.5, 0.2, 0.2];
        let mut config = base_config();
        config.correlation_matrix = Some(vec![vec![1.0]]);
        config.return_model = ReturnModelSpec::RegimeSwitching { params };
        assert!(config.validate().is_err());
    }

    pub(crate) fn symmetric_regime_params(n_assets: usize) -> RegimeModelParams {
        RegimeModelParams {
            transition: vec![
                vec![0.85, 0.12, 0.03],
                vec![0.30, 0.60, 0.10],
                vec![0.40, 0.40, 0.20],
            ],
            regimes: vec![
                RegimeSpec {
                    regime: Regime::Bull,
                    mean: vec![0.12; n_assets],
                    std_dev: vec![0.12; n_assets],
                },
                RegimeSpec {
                    regime: Regime::Bear,
                    mean: vec![-0.05; n_assets],
                    std_dev: vec![0.18; n_assets],
                },
                RegimeSpec {
                    regime: Regime::Crash,
                    mean: vec![-0.30; n_assets],
                    std_dev: vec![0.25; n_assets],
                },
            ],
        }
    }
}
