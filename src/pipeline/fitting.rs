//! Dose-response curve fitting
//!
//! Fits the four-parameter logistic model to `(concentration, response)`
//! pairs, where the response is the relative difference scaled to `0..=1`.

use serde::{Deserialize, Serialize};

use super::model::{LogisticParams, MIN_INFLECTION};
use super::normalization::NormalizedTable;
use super::solver::{self, LeastSquaresModel, SolverConfig};
use crate::data::calibration::{CalibrationMode, CalibrationSet};
use crate::error::{AssayError, Result};

/// The model has four free parameters
pub const MIN_CALIBRATION_POINTS: usize = 4;

/// Low end of the placeholder ladder; further rungs are 2, 4, 6, ...
const LADDER_START: [f64; 4] = [0.0, 0.1, 0.5, 1.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Starting `[A, B, C, D]`
    pub initial_guess: [f64; 4],
    pub solver: SolverConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            initial_guess: [0.0, 0.1, 0.2, 1.0],
            solver: SolverConfig::default(),
        }
    }
}

/// Where the concentrations behind a fit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStrategy {
    /// Concentrations supplied by the user
    Calibrated,
    /// Synthesized placeholder concentrations; reduced confidence
    FallbackLadder,
}

impl std::fmt::Display for FitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitStrategy::Calibrated => write!(f, "calibrated"),
            FitStrategy::FallbackLadder => write!(f, "fallback ladder (reduced confidence)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    pub object: usize,
    pub concentration: f64,
    /// Relative difference / 100
    pub response: f64,
}

/// Result of a successful fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub params: LogisticParams,
    pub rmse: f64,
    pub r_squared: f64,
    pub strategy: FitStrategy,
    pub iterations: usize,
    pub pairs: Vec<CalibrationPair>,
}

impl FittedModel {
    pub fn response(&self, concentration: f64) -> f64 {
        self.params.response(concentration)
    }

    /// `samples` evenly spaced points of the fitted curve across the
    /// calibrated concentration range
    pub fn curve(&self, samples: usize) -> Vec<[f64; 2]> {
        let lo = self
            .pairs
            .iter()
            .map(|p| p.concentration)
            .fold(f64::INFINITY, f64::min);
        let hi = self
            .pairs
            .iter()
            .map(|p| p.concentration)
            .fold(f64::NEG_INFINITY, f64::max);
        if samples == 0 || !lo.is_finite() || !hi.is_finite() {
            return Vec::new();
        }
        if samples == 1 {
            return vec![[lo, self.response(lo)]];
        }
        let step = (hi - lo) / (samples - 1) as f64;
        (0..samples)
            .map(|i| {
                let x = lo + step * i as f64;
                [x, self.response(x)]
            })
            .collect()
    }
}

struct FourParamLogistic;

impl LeastSquaresModel<4> for FourParamLogistic {
    fn evaluate(&self, x: f64, params: &[f64; 4]) -> f64 {
        LogisticParams::from_array(*params).response(x)
    }

    fn gradient(&self, x: f64, params: &[f64; 4]) -> [f64; 4] {
        LogisticParams::from_array(*params).gradient(x)
    }

    fn constrain(&self, params: &mut [f64; 4]) {
        params[2] = params[2].max(MIN_INFLECTION);
    }
}

/// Placeholder concentrations for `count` known regions:
/// `0, 0.1, 0.5, 1, 2, 4, 6, ...` with zero lifted to `epsilon`
pub fn fallback_ladder(count: usize, epsilon: f64) -> Vec<f64> {
    LADDER_START
        .iter()
        .copied()
        .chain((1..).map(|i| 2.0 * i as f64))
        .take(count)
        .map(|c| c.max(epsilon))
        .collect()
}

/// Pair the known regions of `table` with their concentrations.
///
/// In fallback mode the responses are taken in ascending order and matched to
/// the ladder.
pub fn calibration_pairs(
    table: &NormalizedTable,
    calibration: &CalibrationSet,
    epsilon: f64,
) -> Vec<CalibrationPair> {
    match calibration.mode() {
        CalibrationMode::UserSupplied => calibration
            .known()
            .filter_map(|(object, concentration)| {
                table.get(object).map(|row| CalibrationPair {
                    object,
                    concentration,
                    response: row.relative_difference / 100.0,
                })
            })
            .collect(),
        CalibrationMode::Fallback => {
            let mut known: Vec<(usize, f64)> = table
                .rows()
                .iter()
                .filter(|r| r.region.object != calibration.unknown())
                .map(|r| (r.region.object, r.relative_difference / 100.0))
                .collect();
            known.sort_by(|a, b| a.1.total_cmp(&b.1));
            let ladder = fallback_ladder(known.len(), epsilon);
            known
                .into_iter()
                .zip(ladder)
                .map(|((object, response), concentration)| CalibrationPair {
                    object,
                    concentration,
                    response,
                })
                .collect()
        }
    }
}

fn distinct_concentrations(pairs: &[CalibrationPair]) -> usize {
    let mut xs: Vec<f64> = pairs.iter().map(|p| p.concentration).collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    xs.len()
}

/// Fit the model to calibration pairs.
pub fn fit_pairs(
    pairs: &[CalibrationPair],
    strategy: FitStrategy,
    config: &FitConfig,
) -> Result<FittedModel> {
    let found = distinct_concentrations(pairs);
    if found < MIN_CALIBRATION_POINTS {
        return Err(AssayError::InsufficientCalibrationPoints {
            required: MIN_CALIBRATION_POINTS,
            found,
        });
    }

    let xs: Vec<f64> = pairs.iter().map(|p| p.concentration).collect();
    let ys: Vec<f64> = pairs.iter().map(|p| p.response).collect();

    let result = solver::minimize(
        &FourParamLogistic,
        &xs,
        &ys,
        config.initial_guess,
        &config.solver,
    );

    if !result.converged || result.params.iter().any(|p| !p.is_finite()) {
        log::warn!(
            "Curve fit did not converge after {} iterations",
            result.iterations
        );
        return Err(AssayError::FitDidNotConverge {
            iterations: result.iterations,
        });
    }

    let params = LogisticParams::from_array(result.params);
    let (rmse, r_squared) = diagnostics(&params, &xs, &ys);

    log::info!(
        "Fitted {} ({}): RMSE {:.4}, R² {:.4}, {} iterations",
        params,
        strategy,
        rmse,
        r_squared,
        result.iterations
    );

    Ok(FittedModel {
        params,
        rmse,
        r_squared,
        strategy,
        iterations: result.iterations,
        pairs: pairs.to_vec(),
    })
}

/// Fit the curve for a bound calibration set.
pub fn fit_calibration(
    table: &NormalizedTable,
    calibration: &CalibrationSet,
    epsilon: f64,
    config: &FitConfig,
) -> Result<FittedModel> {
    let strategy = match calibration.mode() {
        CalibrationMode::UserSupplied => FitStrategy::Calibrated,
        CalibrationMode::Fallback => FitStrategy::FallbackLadder,
    };
    let pairs = calibration_pairs(table, calibration, epsilon);
    fit_pairs(&pairs, strategy, config)
}

/// RMSE and R² of the fitted curve against the data it was fit to.
///
/// R² is `1 - MSE / SST`, with SST the total sum of squares of the responses
/// (not divided by the point count). It is 0 when every response is equal.
pub fn diagnostics(params: &LogisticParams, xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let mse = xs
        .iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            let r = params.response(x) - y;
            r * r
        })
        .sum::<f64>()
        / n;
    let mean = ys.iter().sum::<f64>() / n;
    let total = ys.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>();
    let r_squared = if total > 0.0 { 1.0 - mse / total } else { 0.0 };
    (mse.sqrt(), r_squared)
}
