//! Concentration estimation by inverting the fitted curve

use serde::{Deserialize, Serialize};

use super::fitting::FittedModel;

/// Whether the unknown's response could be mapped back onto the curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeStatus {
    WithinRange,
    /// Inversion failed or went negative; concentration reported as 0
    BelowRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Normal,
    Toxic,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Normal => write!(f, "Normal"),
            Classification::Toxic => write!(f, "Toxic"),
        }
    }
}

impl Classification {
    /// Strictly above `threshold` is toxic
    pub fn from_concentration(concentration: f64, threshold: f64) -> Self {
        if concentration > threshold {
            Classification::Toxic
        } else {
            Classification::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationEstimate {
    pub object: usize,
    pub concentration: f64,
    pub range: RangeStatus,
    pub classification: Classification,
}

impl ConcentrationEstimate {
    pub fn note(&self) -> Option<&'static str> {
        match self.range {
            RangeStatus::WithinRange => None,
            RangeStatus::BelowRange => Some("sample fell below the curve's resolvable range"),
        }
    }
}

impl std::fmt::Display for ConcentrationEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Concentration for object {}: {:.6} ({})",
            self.object, self.concentration, self.classification
        )?;
        if let Some(note) = self.note() {
            write!(f, " [{}]", note)?;
        }
        Ok(())
    }
}

/// Resolve a response (already scaled to `0..=1`) to a concentration.
///
/// Domain failures (response equal to the upper asymptote, a negative power
/// base, NaN) and negative results are floored to 0 and marked below range.
pub fn invert_response(model: &FittedModel, response: f64) -> (f64, RangeStatus) {
    let params = &model.params;

    // Checked up front: with a negative slope the power maps an infinite
    // base to 0, which would otherwise pass as a valid result.
    if response == params.d {
        log::warn!("Response {:.4} equals the upper asymptote; reporting 0", response);
        return (0.0, RangeStatus::BelowRange);
    }
    let base = params.inverse_base(response);
    if !(base.is_finite() && base >= 0.0) {
        log::warn!(
            "Response {:.4} outside resolvable range (power base {}); reporting 0",
            response,
            base
        );
        return (0.0, RangeStatus::BelowRange);
    }

    let raw = params.inverse(response);
    if raw.is_finite() && raw >= 0.0 {
        (raw, RangeStatus::WithinRange)
    } else {
        log::warn!(
            "Response {:.4} outside resolvable range (inverse gave {}); reporting 0",
            response,
            raw
        );
        (0.0, RangeStatus::BelowRange)
    }
}

/// Estimate the unknown region's concentration from its relative difference
/// (percentage) and classify it against `threshold`.
pub fn estimate_concentration(
    model: &FittedModel,
    object: usize,
    relative_difference: f64,
    threshold: f64,
) -> ConcentrationEstimate {
    let (concentration, range) = invert_response(model, relative_difference / 100.0);
    let estimate = ConcentrationEstimate {
        object,
        concentration,
        range,
        classification: Classification::from_concentration(concentration, threshold),
    };
    log::info!("{}", estimate);
    estimate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fitting::FitStrategy;
    use crate::pipeline::model::LogisticParams;

    fn model(params: LogisticParams) -> FittedModel {
        FittedModel {
            params,
            rmse: 0.0,
            r_squared: 1.0,
            strategy: FitStrategy::Calibrated,
            iterations: 1,
            pairs: Vec::new(),
        }
    }

    #[test]
    fn test_roundtrip_through_inverse() {
        let m = model(LogisticParams::new(0.05, 1.8, 1.2, 0.85));
        for &x in &[0.2, 1.0, 3.0] {
            let rd = m.response(x) * 100.0;
            let est = estimate_concentration(&m, 4, rd, 2.0);
            assert_eq!(est.range, RangeStatus::WithinRange);
            assert!((est.concentration - x).abs() < 1e-8);
        }
    }

    #[test]
    fn test_response_at_d_is_below_range() {
        let p = LogisticParams::new(0.05, 1.8, 1.2, 0.85);
        let m = model(p);
        let est = estimate_concentration(&m, 2, p.d * 100.0, 2.0);
        assert_eq!(est.concentration, 0.0);
        assert_eq!(est.range, RangeStatus::BelowRange);
        assert!(est.note().is_some());
        assert_eq!(est.classification, Classification::Normal);
    }

    #[test]
    fn test_response_at_d_with_falling_curve_is_below_range() {
        // Negative slope: the infinite base would be raised to a negative power
        let p = LogisticParams::new(0.05, -1.8, 1.2, 0.85);
        let m = model(p);
        let (c, status) = invert_response(&m, p.d);
        assert_eq!(c, 0.0);
        assert_eq!(status, RangeStatus::BelowRange);

        let est = estimate_concentration(&m, 2, p.d * 100.0, 2.0);
        assert_eq!(est.range, RangeStatus::BelowRange);
        assert!(est.note().is_some());
    }

    #[test]
    fn test_falling_curve_inverts_inside_range() {
        let m = model(LogisticParams::new(0.05, -1.8, 1.2, 0.85));
        for &x in &[0.3, 1.0, 4.0] {
            let (c, status) = invert_response(&m, m.response(x));
            assert_eq!(status, RangeStatus::WithinRange);
            assert!((c - x).abs() < 1e-8);
        }
        // Above D the base goes negative
        let (c, status) = invert_response(&m, 0.95);
        assert_eq!(c, 0.0);
        assert_eq!(status, RangeStatus::BelowRange);
    }

    #[test]
    fn test_negative_base_is_below_range() {
        let m = model(LogisticParams::new(0.05, 1.8, 1.2, 0.85));
        let est = estimate_concentration(&m, 2, 95.0, 2.0);
        assert_eq!(est.concentration, 0.0);
        assert_eq!(est.range, RangeStatus::BelowRange);
    }

    #[test]
    fn test_negative_result_is_floored() {
        // Negative C turns any real result negative
        let m = model(LogisticParams::new(0.05, 1.0, -1.0, 0.85));
        let (c, status) = invert_response(&m, 0.4);
        assert_eq!(c, 0.0);
        assert_eq!(status, RangeStatus::BelowRange);
    }

    #[test]
    fn test_classification_threshold() {
        assert_eq!(Classification::from_concentration(2.0, 2.0), Classification::Normal);
        assert_eq!(Classification::from_concentration(2.01, 2.0), Classification::Toxic);
        assert_eq!(Classification::from_concentration(0.5, 0.1), Classification::Toxic);
    }

    #[test]
    fn test_toxic_estimate() {
        let m = model(LogisticParams::new(0.05, 1.8, 1.2, 0.85));
        let rd = m.response(5.0) * 100.0;
        let est = estimate_concentration(&m, 1, rd, 2.0);
        assert_eq!(est.classification, Classification::Toxic);
        assert_eq!(est.classification.to_string(), "Toxic");
    }
}
