use clap::Args;
use serde_json::Value;

use bbd_core::config::SimulationConfig;
use bbd_core::simulation::{run_simulation_with_hooks, Progress, SimulationHooks};

use crate::input;

/// Arguments for the Monte Carlo simulation
#[derive(Args)]
pub struct SimulateArgs {
    /// Path to JSON or YAML config file
    #[arg(long)]
    pub input: Option<String>,

    /// Print progress to stderr while running
    #[arg(long)]
    pub progress: bool,
}

pub fn run_simulate(args: SimulateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let config: SimulationConfig = input::load(&args.input, "simulate")?;

    let hooks = if args.progress {
        SimulationHooks {
            on_progress: Some(std::sync::Arc::new(|p: Progress| {
                eprintln!("{} / {} iterations", p.completed, p.total);
            })),
            cancel: None,
        }
    } else {
        SimulationHooks::default()
    };

    let result = run_simulation_with_hooks(&config, &hooks)?;
    Ok(serde_json::to_value(result)?)
}
