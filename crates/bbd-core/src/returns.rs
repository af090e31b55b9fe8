//! Stochastic return models.
//!
//! A tagged variant rather than a trait hierarchy: bootstrap resampling of
//! aligned historical rows, or a three-regime Markov chain with correlated
//! normal draws. Either way `sample_path` draws the full per-iteration
//! return path from a dedicated PRNG substream keyed on
//! `(master_seed, iteration)`, which makes the simulation deterministic
//! under any execution order.
//!
//! The PRNG is pinned to `rand::rngs::StdRng` (rand 0.8, ChaCha12) seeded
//! through `seed_from_u64`; substream seeds are derived with SplitMix64.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use statrs::distribution::Normal;

use crate::config::{Regime, ReturnModelSpec, SimulationConfig};
use crate::error::BbdError;
use crate::stats::cholesky;
use crate::BbdResult;

// ---------------------------------------------------------------------------
// Substream derivation
// ---------------------------------------------------------------------------

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the disjoint substream owned by one iteration.
pub fn substream_seed(master_seed: u64, iteration: u64) -> u64 {
    splitmix64(master_seed ^ splitmix64(iteration))
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A configured return model, ready to sample per-iteration paths.
#[derive(Debug, Clone)]
pub struct ReturnModel {
    master_seed: u64,
    horizon: usize,
    kind: ModelKind,
}

#[derive(Debug, Clone)]
enum ModelKind {
    Bootstrap {
        /// Portfolio-level return of each historical row, precomputed as
        /// sum(weight_i * row[class_i]). Row coupling keeps correlations.
        row_returns: Vec<f64>,
    },
    RegimeSwitching {
        weights: Vec<f64>,
        /// Lower-triangular Cholesky factor of the correlation matrix.
        chol: Vec<Vec<f64>>,
        /// Row-stochastic transition matrix, regime order bull/bear/crash.
        transition: Vec<Vec<f64>>,
        /// Per-regime per-asset means and standard deviations.
        means: Vec<Vec<f64>>,
        std_devs: Vec<Vec<f64>>,
        standard_normal: Normal,
    },
}

fn regime_index(regime: Regime) -> usize {
    match regime {
        Regime::Bull => 0,
        Regime::Bear => 1,
        Regime::Crash => 2,
    }
}

impl ReturnModel {
    /// Build the model from a validated configuration.
    pub fn new(config: &SimulationConfig, master_seed: u64) -> BbdResult<Self> {
        let horizon = config.time_horizon as usize;
        let weights = config.weights();

        let kind = match &config.return_model {
            ReturnModelSpec::Bootstrap { history } => {
                if history.rows.is_empty() {
                    return Err(BbdError::InsufficientData(
                        "Bootstrap history is empty".into(),
                    ));
                }
                let columns: Vec<usize> = config
                    .portfolio
                    .iter()
                    .map(|p| {
                        history.column_of(&p.asset_class).ok_or_else(|| {
                            BbdError::ConfigInvalid {
                                field: "return_model.history".into(),
                                reason: format!(
                                    "no history for asset class {:?}",
                                    p.asset_class
                                ),
                            }
                        })
                    })
                    .collect::<BbdResult<_>>()?;
                let row_returns = history
                    .rows
                    .iter()
                    .map(|row| {
                        weights
                            .iter()
                            .zip(columns.iter())
                            .map(|(w, col)| w * row[*col])
                            .sum()
                    })
                    .collect();
                ModelKind::Bootstrap { row_returns }
            }
            ReturnModelSpec::RegimeSwitching { params } => {
                let corr = config.correlation_matrix.as_ref().ok_or_else(|| {
                    BbdError::ConfigInvalid {
                        field: "correlation_matrix".into(),
                        reason: "required by the regime-switching model".into(),
                    }
                })?;
                let chol = cholesky(corr)?;

                let mut means = vec![Vec::new(); 3];
                let mut std_devs = vec![Vec::new(); 3];
                for spec in &params.regimes {
                    let idx = regime_index(spec.regime);
                    means[idx] = spec.mean.clone();
                    std_devs[idx] = spec.std_dev.clone();
                }
                let standard_normal =
                    Normal::new(0.0, 1.0).map_err(|e| BbdError::ConfigInvalid {
                        field: "return_model".into(),
                        reason: format!("Invalid Normal parameters: {e}"),
                    })?;
                ModelKind::RegimeSwitching {
                    weights,
                    chol,
                    transition: params.transition.clone(),
                    means,
                    std_devs,
                    standard_normal,
                }
            }
        };

        Ok(ReturnModel {
            master_seed,
            horizon,
            kind,
        })
    }

    /// Draw the full return path for one iteration from its own substream.
    ///
    /// `path[y]` is the portfolio return applied in simulation year `y + 1`.
    pub fn sample_path(&self, iteration: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(substream_seed(self.master_seed, iteration as u64));
        match &self.kind {
            ModelKind::Bootstrap { row_returns } => (0..self.horizon)
                .map(|_| row_returns[rng.gen_range(0..row_returns.len())])
                .collect(),
            ModelKind::RegimeSwitching {
                weights,
                chol,
                transition,
                means,
                std_devs,
                standard_normal,
            } => {
                let n = weights.len();
                let mut regime = regime_index(Regime::Bull);
                let mut path = Vec::with_capacity(self.horizon);
                let mut z = vec![0.0_f64; n];
                for _ in 0..self.horizon {
                    for zi in z.iter_mut() {
                        *zi = rng.sample(*standard_normal);
                    }
                    let mut portfolio_return = 0.0;
                    for i in 0..n {
                        // Correlated standard normal via the Cholesky factor
                        let mut correlated = 0.0;
                        for (k, zk) in z.iter().enumerate().take(i + 1) {
                            correlated += chol[i][k] * zk;
                        }
                        let asset_return = means[regime][i] + std_devs[regime][i] * correlated;
                        portfolio_return += weights[i] * asset_return;
                    }
                    path.push(portfolio_return);
                    regime = next_regime(&mut rng, &transition[regime]);
                }
                path
            }
        }
    }
}

fn next_regime(rng: &mut StdRng, row: &[f64]) -> usize {
    let u: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (idx, p) in row.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return idx;
        }
    }
    row.len() - 1
}
