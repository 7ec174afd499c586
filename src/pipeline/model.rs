//! Four-parameter logistic dose-response model
//!
//! `response(x) = (A - D) / (1 + (x / C)^B) + D`
//!
//! `A` is the response at zero concentration, `D` the response at infinite
//! concentration, `C` the inflection point and `B` the slope factor.

use serde::{Deserialize, Serialize};

/// Smallest value `C` may take; the model raises `x / C` to a real power
pub const MIN_INFLECTION: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl LogisticParams {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    pub fn from_array(p: [f64; 4]) -> Self {
        Self::new(p[0], p[1], p[2], p[3])
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }

    /// Model response at concentration `x`
    pub fn response(&self, x: f64) -> f64 {
        (self.a - self.d) / (1.0 + (x / self.c).powf(self.b)) + self.d
    }

    /// Partial derivatives of the response w.r.t. `[A, B, C, D]` at `x`
    pub fn gradient(&self, x: f64) -> [f64; 4] {
        let ratio = x / self.c;
        let u = ratio.powf(self.b);
        let den = 1.0 + u;
        let den2 = den * den;
        let span = self.a - self.d;

        // ln(0) only shows up multiplied by u = 0
        let log_ratio = if ratio > 0.0 { ratio.ln() } else { 0.0 };

        [
            1.0 / den,
            -span * u * log_ratio / den2,
            span * u * self.b / (self.c * den2),
            u / den,
        ]
    }

    /// Solve `response(x) = y` for `x`.
    ///
    /// Returns the raw value, which may be NaN, infinite or negative when `y`
    /// is outside what the curve can produce.
    pub fn inverse(&self, y: f64) -> f64 {
        self.c * self.inverse_base(y).powf(1.0 / self.b)
    }

    /// `(A - D) / (y - D) - 1`, the quantity raised to `1 / B` by
    /// [`LogisticParams::inverse`]. Negative or non-finite means `y` is out
    /// of the curve's reach.
    pub fn inverse_base(&self, y: f64) -> f64 {
        (self.a - self.d) / (y - self.d) - 1.0
    }
}

impl std::fmt::Display for LogisticParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "A={:.4}, B={:.4}, C={:.4}, D={:.4}",
            self.a, self.b, self.c, self.d
        )
    }
}
