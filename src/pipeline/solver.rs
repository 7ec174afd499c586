//! Levenberg-Marquardt least-squares solver for small parameter vectors.
//!
//! Normal equations are formed explicitly (J^T J, J^T r) and solved with
//! Gaussian elimination; the parameter count is tiny so nothing fancier pays off.

use serde::{Deserialize, Serialize};

/// Solver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum number of iterations (accepted or rejected steps)
    pub max_iterations: usize,
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step
    pub lambda_up: f64,
    /// Damping multiplier after an accepted step
    pub lambda_down: f64,
    /// Give up once damping exceeds this
    pub max_lambda: f64,
    /// Converged when every step component is below `x_tolerance * (|p| + x_tolerance)`
    pub x_tolerance: f64,
    /// Converged when an accepted step lowers the cost by less than this fraction
    pub f_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
            x_tolerance: 1.49e-8,
            f_tolerance: 1.49e-8,
        }
    }
}

/// Outcome of a solver run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverResult<const N: usize> {
    pub params: [f64; N],
    /// Sum of squared residuals at `params`
    pub cost: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// A model whose parameters can be fit to `(x, y)` observations
pub trait LeastSquaresModel<const N: usize> {
    fn evaluate(&self, x: f64, params: &[f64; N]) -> f64;

    fn gradient(&self, x: f64, params: &[f64; N]) -> [f64; N];

    /// Project parameters back into their valid domain after a step
    fn constrain(&self, _params: &mut [f64; N]) {}
}

/// Floor for the Marquardt diagonal scaling, so parameters with a vanishing
/// column in J still get damped
const MIN_DIAGONAL: f64 = 1e-12;

/// Cost below which the fit is exact to machine precision
const EXACT_COST: f64 = 1e-30;

pub fn minimize<const N: usize, M: LeastSquaresModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    initial: [f64; N],
    config: &SolverConfig,
) -> SolverResult<N> {
    let mut params = initial;
    model.constrain(&mut params);

    let mut cost = compute_cost(model, xs, ys, &params);
    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    if !cost.is_finite() {
        log::debug!("Initial cost is not finite, giving up");
        return SolverResult {
            params,
            cost,
            converged,
            iterations,
        };
    }

    while iterations < config.max_iterations {
        iterations += 1;

        if cost < EXACT_COST {
            converged = true;
            break;
        }

        let (hessian, gradient) = normal_equations(model, xs, ys, &params);

        let mut damped = hessian;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] += lambda * row[i].max(MIN_DIAGONAL);
        }

        let Some(delta) = solve(&damped, &gradient) else {
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                break;
            }
            continue;
        };

        let step_negligible = delta
            .iter()
            .zip(params.iter())
            .all(|(d, p)| d.abs() <= config.x_tolerance * (p.abs() + config.x_tolerance));

        let mut candidate = params;
        for (p, d) in candidate.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut candidate);
        let candidate_cost = compute_cost(model, xs, ys, &candidate);

        if candidate_cost.is_finite() && candidate_cost < cost {
            let reduction = (cost - candidate_cost) / cost;
            params = candidate;
            cost = candidate_cost;
            lambda = (lambda * config.lambda_down).max(f64::MIN_POSITIVE);

            if step_negligible || reduction < config.f_tolerance {
                converged = true;
                break;
            }
        } else {
            if step_negligible {
                // No direction left that lowers the cost
                converged = true;
                break;
            }
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                break;
            }
        }
    }

    log::debug!(
        "LM finished after {} iterations (cost {:.3e}, converged: {})",
        iterations,
        cost,
        converged
    );

    SolverResult {
        params,
        cost,
        converged,
        iterations,
    }
}

fn compute_cost<const N: usize, M: LeastSquaresModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> f64 {
    xs.iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            let r = y - model.evaluate(x, params);
            r * r
        })
        .sum()
}

/// Build J^T J and J^T r, filling the upper triangle and mirroring it
#[allow(clippy::needless_range_loop)]
fn normal_equations<const N: usize, M: LeastSquaresModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let row = model.gradient(x, params);
        let r = y - model.evaluate(x, params);
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}

/// Gaussian elimination with partial pivoting. `None` when singular or
/// when the system produces non-finite values.
#[allow(clippy::needless_range_loop)]
pub fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut matrix = *a;
    let mut rhs = *b;

    for col in 0..N {
        let mut max_row = col;
        let mut max_val = matrix[col][col].abs();
        for row in (col + 1)..N {
            if matrix[row][col].abs() > max_val {
                max_val = matrix[row][col].abs();
                max_row = row;
            }
        }

        if !(max_val > 1e-300) {
            return None;
        }

        if max_row != col {
            matrix.swap(col, max_row);
            rhs.swap(col, max_row);
        }

        for row in (col + 1)..N {
            let factor = matrix[row][col] / matrix[col][col];
            let pivot_row = matrix[col];
            for (j, m) in matrix[row].iter_mut().enumerate().skip(col) {
                *m -= factor * pivot_row[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut sum = rhs[i];
        for (j, &xj) in x.iter().enumerate().skip(i + 1) {
            sum -= matrix[i][j] * xj;
        }
        x[i] = sum / matrix[i][i];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
