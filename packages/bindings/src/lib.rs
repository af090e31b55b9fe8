use napi::Result as NapiResult;
use napi_derive::napi;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[napi]
pub fn run_simulation(config_json: String) -> NapiResult<String> {
    let config: bbd_core::config::SimulationConfig =
        serde_json::from_str(&config_json).map_err(to_napi_error)?;
    let output = bbd_core::simulation::run_simulation(&config).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn project_sbloc(input_json: String) -> NapiResult<String> {
    let input: bbd_core::sbloc::SblocProjectionInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = bbd_core::sbloc::project_sbloc(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// The metrics summary needs both the finished simulation and its config, so
/// the binding takes the two payloads the host already holds.
#[napi]
pub fn calculate_metrics_summary(output_json: String, config_json: String) -> NapiResult<String> {
    let output: bbd_core::simulation::SimulationOutput =
        serde_json::from_str(&output_json).map_err(to_napi_error)?;
    let config: bbd_core::config::SimulationConfig =
        serde_json::from_str(&config_json).map_err(to_napi_error)?;
    let summary = bbd_core::analysis::calculate_metrics_summary(&output, &config)
        .map_err(to_napi_error)?;
    serde_json::to_string(&summary).map_err(to_napi_error)
}

#[napi]
pub fn calculate_sell_strategy(
    config_json: String,
    yearly_percentiles_json: String,
) -> NapiResult<String> {
    let config: bbd_core::analysis::SellStrategyConfig =
        serde_json::from_str(&config_json).map_err(to_napi_error)?;
    let bands: Vec<bbd_core::simulation::YearlyPercentiles> =
        serde_json::from_str(&yearly_percentiles_json).map_err(to_napi_error)?;
    let result =
        bbd_core::analysis::calculate_sell_strategy(&config, &bands).map_err(to_napi_error)?;
    serde_json::to_string(&result).map_err(to_napi_error)
}

#[napi]
pub fn calculate_bbd_comparison(input_json: String) -> NapiResult<String> {
    let input: bbd_core::analysis::BbdComparisonInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let result = bbd_core::analysis::calculate_bbd_comparison(&input);
    serde_json::to_string(&result).map_err(to_napi_error)
}

#[napi]
pub fn calculate_salary_equivalent(input_json: String) -> NapiResult<String> {
    let input: bbd_core::analysis::SalaryEquivalentInput =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let result =
        bbd_core::analysis::calculate_salary_equivalent(&input).map_err(to_napi_error)?;
    serde_json::to_string(&result).map_err(to_napi_error)
}

#[napi]
pub fn aggregate_margin_call_events(
    liquidation_years_json: String,
    time_horizon: u32,
) -> NapiResult<String> {
    let liquidation_years: Vec<Vec<u32>> =
        serde_json::from_str(&liquidation_years_json).map_err(to_napi_error)?;
    let result =
        bbd_core::analysis::aggregate_margin_call_events(&liquidation_years, time_horizon);
    serde_json::to_string(&result).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Historical data interchange
// ---------------------------------------------------------------------------

/// Accepts either interchange shape (the structured export payload or the
/// denormalized record stream) and returns the normalized history.
#[napi]
pub fn normalize_historical_returns(payload_json: String) -> NapiResult<String> {
    use bbd_core::history::{HistoricalDataExport, HistoricalReturnRecord, ReturnHistory};

    let history = if let Ok(export) = serde_json::from_str::<HistoricalDataExport>(&payload_json)
    {
        ReturnHistory::from_export(&export).map_err(to_napi_error)?
    } else {
        let records: Vec<HistoricalReturnRecord> =
            serde_json::from_str(&payload_json).map_err(to_napi_error)?;
        ReturnHistory::from_records(&records).map_err(to_napi_error)?
    };
    serde_json::to_string(&history).map_err(to_napi_error)
}
