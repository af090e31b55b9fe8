//! Post-simulation analysis: headline metrics, the sell-strategy
//! counterfactual, estate outcomes, and margin-call risk aggregation.

pub mod estate;
pub mod margin_calls;
pub mod metrics;
pub mod sell_strategy;

pub use estate::{
    calculate_bbd_comparison, calculate_estate_analysis, BbdComparison, BbdComparisonInput,
    EstateAnalysis,
};
pub use margin_calls::{aggregate_margin_call_events, MarginCallProbability};
pub use metrics::{
    calculate_cagr, calculate_metrics_summary, calculate_salary_equivalent, calculate_twrr,
    MetricsSummary, SalaryEquivalent, SalaryEquivalentInput, Twrr,
};
pub use sell_strategy::{
    calculate_sell_strategy, SellScenario, SellStrategyConfig, SellStrategyResult,
};
