//! Monte Carlo orchestration: the driver, the task runners, and the
//! progress/cancellation hooks.

mod driver;
mod runner;

pub use driver::{
    run_simulation, run_simulation_with_hooks, SblocTrajectory, SimulationOutput,
    SummaryStatistics, YearlyPercentiles,
};
pub use runner::{CancelToken, Progress, ProgressFn, SimulationHooks, TaskRunner};
