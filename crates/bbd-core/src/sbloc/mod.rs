//! SBLOC engine: per-year state transitions, forced liquidation, and the
//! standalone deterministic projection.

mod engine;
mod liquidation;
mod state;

pub use engine::{
    project_sbloc, step_year, step_year_monthly, SblocProjection, SblocProjectionInput,
    SblocProjectionYear, StepInput, YearOutcome,
};
pub use liquidation::LiquidationEvent;
pub(crate) use liquidation::liquidate;
pub use state::{compute_ltv, SblocState};
