//! Estate outcomes: what heirs actually receive under each strategy.
//!
//! Under current law heirs take a stepped-up basis at death, so the BBD
//! estate never realizes the embedded gains; the sell-at-death alternative
//! pays capital gains on everything above basis.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Estate analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstateAnalysis {
    /// Terminal portfolio minus terminal loan.
    pub net_estate: f64,
    /// Unrealized appreciation above cost basis, floored at 0.
    pub embedded_gains: f64,
    /// Capital gains tax the step-up erases.
    pub stepped_up_basis_savings: f64,
    /// Exemption echoed from config for reference; never subtracted here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estate_tax_exemption: Option<f64>,
}

pub fn calculate_estate_analysis(
    terminal_portfolio: f64,
    terminal_loan: f64,
    cost_basis: f64,
    capital_gains_rate: f64,
    estate_tax_exemption: Option<f64>,
) -> EstateAnalysis {
    let embedded_gains = (terminal_portfolio - cost_basis).max(0.0);
    EstateAnalysis {
        net_estate: terminal_portfolio - terminal_loan,
        embedded_gains,
        stepped_up_basis_savings: embedded_gains * capital_gains_rate,
        estate_tax_exemption,
    }
}

// ---------------------------------------------------------------------------
// BBD vs Sell comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbdComparisonInput {
    pub terminal_portfolio: f64,
    pub terminal_loan: f64,
    pub cost_basis: f64,
    pub capital_gains_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BbdComparison {
    pub bbd_net_estate: f64,
    pub sell_net_estate: f64,
    /// Capital gains tax due if everything were sold at the horizon.
    pub tax_if_sold: f64,
    /// Positive means Buy-Borrow-Die wins.
    pub bbd_advantage: f64,
}

pub fn calculate_bbd_comparison(input: &BbdComparisonInput) -> BbdComparison {
    let tax_if_sold =
        (input.terminal_portfolio - input.cost_basis).max(0.0) * input.capital_gains_rate;
    let bbd_net_estate = input.terminal_portfolio - input.terminal_loan;
    let sell_net_estate = input.terminal_portfolio - tax_if_sold;
    BbdComparison {
        bbd_net_estate,
        sell_net_estate,
        tax_if_sold,
        bbd_advantage: bbd_net_estate - sell_net_estate,
    }
}
