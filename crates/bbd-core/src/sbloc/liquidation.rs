use serde::{Deserialize, Serialize};

use crate::config::SblocConfig;

use super::state::SblocState;

/// Record of one forced liquidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub year: u32,
    /// Gross assets sold, before the haircut.
    pub assets_liquidated: f64,
    /// Value destroyed by the forced-sale haircut.
    pub haircut_cost: f64,
    /// Net proceeds applied against the loan.
    pub loan_repaid: f64,
    pub new_loan_balance: f64,
    pub new_portfolio_value: f64,
}

/// Sell enough assets to bring the loan down to the target LTV.
///
/// The haircut means repaying `excess` principal requires selling
/// `excess / (1 - h)` gross. Sales are capped at the whole portfolio; when
/// capped the target may not be reached and the caller's failure check
/// decides whether the iteration survives. Updates portfolio and loan in
/// place; the caller refreshes derived fields.
pub(crate) fn liquidate(
    state: &mut SblocState,
    config: &SblocConfig,
    year: u32,
) -> Option<LiquidationEvent> {
    let target_loan = state.portfolio_value * config.target_ltv();
    let excess_loan = state.loan_balance - target_loan;
    if excess_loan <= 0.0 {
        return None;
    }

    let haircut = config.liquidation_haircut;
    let mut gross_assets = excess_loan / (1.0 - haircut);
    if gross_assets > state.portfolio_value {
        gross_assets = state.portfolio_value;
    }
    let net_proceeds = gross_assets * (1.0 - haircut);

    state.portfolio_value = (state.portfolio_value - gross_assets).max(0.0);
    state.loan_balance = (state.loan_balance - net_proceeds).max(0.0);

    Some(LiquidationEvent {
        year,
        assets_liquidated: gross_assets,
        haircut_cost: gross_assets * haircut,
        loan_repaid: net_proceeds,
        new_loan_balance: state.loan_balance,
        new_portfolio_value: state.portfolio_value,
    })
}
