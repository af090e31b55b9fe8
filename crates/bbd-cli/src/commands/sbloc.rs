use clap::Args;
use serde_json::Value;

use bbd_core::sbloc::{project_sbloc, SblocProjectionInput};

use crate::input;

/// Arguments for the deterministic SBLOC projection
#[derive(Args)]
pub struct SblocArgs {
    /// Path to JSON or YAML input file
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_sbloc(args: SblocArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input: SblocProjectionInput = input::load(&args.input, "sbloc projection")?;
    let result = project_sbloc(&input)?;
    Ok(serde_json::to_value(result)?)
}
