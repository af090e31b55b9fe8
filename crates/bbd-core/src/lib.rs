//! Simulation and analysis engine for the Buy-Borrow-Die wealth strategy.
//!
//! A deterministic state machine advances a portfolio-loan pair through time
//! under stochastic market returns, detects margin calls, executes forced
//! liquidation, and reduces thousands of trajectories into percentile bands,
//! risk metrics, and strategy comparisons. Hosts (CLI, Node bindings, UI)
//! consume it through the typed request/response boundary in this crate.

pub mod analysis;
pub mod config;
pub mod error;
pub mod history;
pub mod returns;
pub mod sbloc;
pub mod simulation;
pub mod stats;
pub mod types;

pub use analysis::{
    aggregate_margin_call_events, calculate_bbd_comparison, calculate_metrics_summary,
    calculate_salary_equivalent, calculate_sell_strategy,
};
pub use config::{SblocConfig, SimulationConfig};
pub use error::BbdError;
pub use sbloc::project_sbloc;
pub use simulation::{run_simulation, run_simulation_with_hooks, SimulationOutput};
pub use types::*;

/// Standard result type for all engine operations
pub type BbdResult<T> = Result<T, BbdError>;
