//! Assay pipeline: detection → extraction → normalization → calibration →
//! curve fit → concentration estimate.
//!
//! `AssayRun` owns the tables of one run and only moves forward through
//! [`Stage`]. A failed fit parks the run at `AwaitingCalibration` so new
//! calibration input can be supplied without re-reading the image.

pub mod estimation;
pub mod extraction;
pub mod fitting;
pub mod model;
pub mod normalization;
pub mod report;
pub mod solver;
pub mod worker;

use image::RgbImage;

use crate::config::AssayConfig;
use crate::data::calibration::{bind_calibration, CalibrationInput, CalibrationSet};
use crate::data::detections::RegionDetector;
use crate::data::region::{Region, RegionGeometry};
use crate::error::{AssayError, Result};
use crate::log::reproducibility::RunLog;

use estimation::ConcentrationEstimate;
use fitting::FittedModel;
use normalization::NormalizedTable;
use report::{AssayReport, ResultRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detected,
    Extracted,
    Normalized,
    AwaitingCalibration,
    Fitted,
    Estimated,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Detected => "Detected",
            Stage::Extracted => "Extracted",
            Stage::Normalized => "Normalized",
            Stage::AwaitingCalibration => "AwaitingCalibration",
            Stage::Fitted => "Fitted",
            Stage::Estimated => "Estimated",
        };
        write!(f, "{}", name)
    }
}

/// One image worth of assay state
#[derive(Debug, Clone)]
pub struct AssayRun {
    config: AssayConfig,
    stage: Stage,
    image: RgbImage,
    geometries: Vec<RegionGeometry>,
    regions: Vec<Region>,
    table: Option<NormalizedTable>,
    calibration: Option<CalibrationSet>,
    model: Option<FittedModel>,
    estimate: Option<ConcentrationEstimate>,
    last_error: Option<String>,
    log: RunLog,
}

impl AssayRun {
    /// Start a run from geometries produced elsewhere.
    pub fn from_geometries(
        image: RgbImage,
        geometries: Vec<RegionGeometry>,
        config: AssayConfig,
        source: &str,
    ) -> Self {
        let mut log = RunLog::new();
        log.set_source(source);
        log.add_entry(
            &Stage::Detected.to_string(),
            &format!("{} regions detected", geometries.len()),
            &format!("image={}x{}", image.width(), image.height()),
        );
        Self {
            config,
            stage: Stage::Detected,
            image,
            geometries,
            regions: Vec::new(),
            table: None,
            calibration: None,
            model: None,
            estimate: None,
            last_error: None,
            log,
        }
    }

    /// Start a run by asking `detector` for regions.
    pub fn detect(
        image: RgbImage,
        detector: &dyn RegionDetector,
        config: AssayConfig,
        source: &str,
    ) -> Result<Self> {
        let geometries = detector.detect(&image)?;
        Ok(Self::from_geometries(image, geometries, config, source))
    }

    /// Detect, extract and normalize; the returned run waits for calibration.
    pub fn run_to_calibration(
        image: RgbImage,
        detector: &dyn RegionDetector,
        config: AssayConfig,
        source: &str,
    ) -> Result<Self> {
        let mut run = Self::detect(image, detector, config, source)?;
        run.extract()?;
        run.normalize()?;
        run.request_calibration()?;
        Ok(run)
    }

    fn expect_stage(&self, expected: Stage) -> Result<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(AssayError::InvalidStage {
                expected,
                actual: self.stage,
            })
        }
    }

    pub fn extract(&mut self) -> Result<&[Region]> {
        self.expect_stage(Stage::Detected)?;
        let cfg = &self.config.extraction;
        self.regions = extraction::extract_signals(&self.image, &self.geometries, cfg)?;
        self.stage = Stage::Extracted;
        self.log.add_entry(
            &Stage::Extracted.to_string(),
            &format!("{} region signals", self.regions.len()),
            &format!("metric={} ratio_epsilon={}", cfg.metric, cfg.ratio_epsilon),
        );
        Ok(&self.regions)
    }

    pub fn normalize(&mut self) -> Result<&NormalizedTable> {
        self.expect_stage(Stage::Extracted)?;
        let table = normalization::normalize(&self.regions)?;
        self.log.add_entry(
            &Stage::Normalized.to_string(),
            &format!("{} rows kept, {} dropped", table.len(), table.dropped().len()),
            &format!(
                "max_area={} max_signal_per_area={:.6}",
                table.max_area(),
                table.max_signal_per_area()
            ),
        );
        self.stage = Stage::Normalized;
        Ok(self.table.insert(table))
    }

    /// Suspend the run until calibration input arrives.
    pub fn request_calibration(&mut self) -> Result<()> {
        self.expect_stage(Stage::Normalized)?;
        let objects: Vec<usize> = self.table.iter().flat_map(|t| t.objects()).collect();
        self.log.add_entry(
            &Stage::AwaitingCalibration.to_string(),
            "waiting for calibration input",
            &format!("objects={:?}", objects),
        );
        self.stage = Stage::AwaitingCalibration;
        Ok(())
    }

    /// Bind calibration input and fit the curve.
    ///
    /// On any binding or fit error the run stays at `AwaitingCalibration`
    /// and keeps its normalized table, so the caller can try again.
    pub fn fit(&mut self, input: &CalibrationInput) -> Result<&FittedModel> {
        self.expect_stage(Stage::AwaitingCalibration)?;
        let table = self.table.as_ref().ok_or(AssayError::InvalidStage {
            expected: Stage::Normalized,
            actual: self.stage,
        })?;

        let epsilon = self.config.zero_concentration_epsilon;
        let outcome = bind_calibration(table, input, epsilon).and_then(|set| {
            let model = fitting::fit_calibration(table, &set, epsilon, &self.config.fit)?;
            Ok((set, model))
        });

        match outcome {
            Ok((set, model)) => {
                self.log.add_entry(
                    &Stage::Fitted.to_string(),
                    &format!(
                        "{} fit on {} points, RMSE {:.4}, R² {:.4}",
                        model.strategy,
                        model.pairs.len(),
                        model.rmse,
                        model.r_squared
                    ),
                    &format!(
                        "A={} B={} C={} D={} iterations={}",
                        model.params.a,
                        model.params.b,
                        model.params.c,
                        model.params.d,
                        model.iterations
                    ),
                );
                self.calibration = Some(set);
                self.last_error = None;
                self.stage = Stage::Fitted;
                Ok(self.model.insert(model))
            }
            Err(e) => {
                self.log.add_entry(
                    &Stage::AwaitingCalibration.to_string(),
                    &format!("calibration rejected: {}", e),
                    "",
                );
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Invert the fitted curve at the unknown region's response.
    pub fn estimate(&mut self) -> Result<&ConcentrationEstimate> {
        self.expect_stage(Stage::Fitted)?;
        let (Some(model), Some(set), Some(table)) = (&self.model, &self.calibration, &self.table)
        else {
            return Err(AssayError::InvalidStage {
                expected: Stage::Fitted,
                actual: self.stage,
            });
        };

        let unknown = set.unknown();
        let row = table
            .get(unknown)
            .ok_or_else(|| AssayError::UnknownObjectNotFound {
                object: unknown,
                available: table.objects().collect(),
            })?;

        let estimate = estimation::estimate_concentration(
            model,
            unknown,
            row.relative_difference,
            self.config.toxic_threshold,
        );
        self.log.add_entry(
            &Stage::Estimated.to_string(),
            &estimate.to_string(),
            &format!(
                "relative_difference={} threshold={}",
                row.relative_difference, self.config.toxic_threshold
            ),
        );
        self.stage = Stage::Estimated;
        Ok(self.estimate.insert(estimate))
    }

    /// Fit then estimate in one call
    pub fn calibrate(&mut self, input: &CalibrationInput) -> Result<&ConcentrationEstimate> {
        self.fit(input)?;
        self.estimate()
    }

    /// Output payload for whatever the run has produced so far
    pub fn report(&self) -> AssayReport {
        let mut report = match &self.table {
            Some(table) => AssayReport::from_table(table),
            None => AssayReport {
                regions: Vec::new(),
                result: None,
                error: None,
            },
        };
        if let (Some(model), Some(set)) = (&self.model, &self.calibration) {
            report = report.with_result(ResultRecord::new(
                model,
                set.unknown(),
                self.estimate.as_ref(),
            ));
        }
        if let Some(err) = &self.last_error {
            report = report.with_error(err.clone());
        }
        report
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &AssayConfig {
        &self.config
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn table(&self) -> Option<&NormalizedTable> {
        self.table.as_ref()
    }

    pub fn calibration(&self) -> Option<&CalibrationSet> {
        self.calibration.as_ref()
    }

    pub fn model(&self) -> Option<&FittedModel> {
        self.model.as_ref()
    }

    pub fn concentration(&self) -> Option<&ConcentrationEstimate> {
        self.estimate.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::detections::{DetectionEntry, DetectionFile};
    use crate::data::region::BoundingBox;
    use crate::pipeline::estimation::{Classification, RangeStatus};
    use crate::pipeline::fitting::FitStrategy;
    use image::Rgb;

    /// Five 10x10 patches on a dark strip. Blue rises with the patch index
    /// while green stays fixed, so the B/G signal falls from patch 5 down.
    fn strip() -> (RgbImage, DetectionFile) {
        let blues = [60u8, 90, 120, 150, 180];
        let img = RgbImage::from_fn(60, 12, |x, y| {
            let patch = (x / 12) as usize;
            if (1..11).contains(&y) && (1..11).contains(&(x % 12)) {
                Rgb([0, 100, blues[patch]])
            } else {
                Rgb([0, 100, 0])
            }
        });
        let regions = (0..5)
            .map(|i| DetectionEntry::Bbox([i * 12 + 1, 1, i * 12 + 11, 11]))
            .collect();
        (img, DetectionFile { regions })
    }

    #[test]
    fn test_run_to_calibration() {
        let (img, detections) = strip();
        let run =
            AssayRun::run_to_calibration(img, &detections, AssayConfig::default(), "strip.png")
                .unwrap();
        assert_eq!(run.stage(), Stage::AwaitingCalibration);

        let table = run.table().unwrap();
        assert_eq!(table.len(), 5);
        // Brightest blue patch is the reference
        assert_eq!(table.rows()[0].region.object, 5);
        assert_eq!(table.rows()[0].relative_difference, 0.0);
        assert_eq!(table.rows()[4].region.object, 1);
        assert_eq!(run.log().len(), 4);
        assert_eq!(run.log().source, "strip.png");
    }

    #[test]
    fn test_out_of_order_calls() {
        let (img, detections) = strip();
        let mut run =
            AssayRun::detect(img, &detections, AssayConfig::default(), "strip.png").unwrap();
        assert_eq!(run.stage(), Stage::Detected);

        let err = run.normalize().unwrap_err();
        assert!(matches!(
            err,
            AssayError::InvalidStage {
                expected: Stage::Extracted,
                actual: Stage::Detected
            }
        ));
        assert!(matches!(
            run.estimate().unwrap_err(),
            AssayError::InvalidStage { .. }
        ));
        assert!(matches!(
            run.fit(&CalibrationInput::new(1)).unwrap_err(),
            AssayError::InvalidStage { .. }
        ));

        run.extract().unwrap();
        assert!(matches!(
            run.extract().unwrap_err(),
            AssayError::InvalidStage { .. }
        ));
        run.normalize().unwrap();
        assert_eq!(run.stage(), Stage::Normalized);
        // Calibration is only taken once the run asks for it
        assert!(matches!(
            run.fit(&CalibrationInput::new(1)).unwrap_err(),
            AssayError::InvalidStage {
                expected: Stage::AwaitingCalibration,
                actual: Stage::Normalized
            }
        ));
        run.request_calibration().unwrap();
        assert_eq!(run.stage(), Stage::AwaitingCalibration);
    }

    #[test]
    fn test_no_regions() {
        let img = RgbImage::new(8, 8);
        let mut run = AssayRun::from_geometries(img, Vec::new(), AssayConfig::default(), "empty");
        assert!(run.extract().unwrap().is_empty());
        assert!(matches!(
            run.normalize().unwrap_err(),
            AssayError::NoRegionsDetected
        ));
        assert_eq!(run.stage(), Stage::Extracted);
    }

    #[test]
    fn test_fallback_fit_and_estimate() {
        let (img, detections) = strip();
        let mut run =
            AssayRun::run_to_calibration(img, &detections, AssayConfig::default(), "strip.png")
                .unwrap();

        // Object 1 has the lowest signal; the other four feed the ladder
        let estimate = run.calibrate(&CalibrationInput::new(3)).unwrap().clone();
        assert_eq!(run.stage(), Stage::Estimated);
        assert_eq!(estimate.object, 3);
        assert!(estimate.concentration.is_finite());
        assert!(estimate.concentration >= 0.0);

        let model = run.model().unwrap();
        assert_eq!(model.strategy, FitStrategy::FallbackLadder);
        assert_eq!(model.pairs.len(), 4);

        let report = run.report();
        assert_eq!(report.regions.len(), 5);
        let result = report.result.unwrap();
        assert_eq!(result.unknown_object, 3);
        assert_eq!(result.estimated_concentration, Some(estimate.concentration));
        assert!(report.error.is_none());
        assert!(run.log().last_for("Estimated").is_some());
    }

    #[test]
    fn test_failed_fit_returns_to_awaiting_calibration() {
        let (img, detections) = strip();
        let mut run =
            AssayRun::run_to_calibration(img, &detections, AssayConfig::default(), "strip.png")
                .unwrap();

        // Two distinct concentrations among four known regions
        let input = CalibrationInput::new(5)
            .with(1, 0.0)
            .with(2, 0.0)
            .with(3, 1.0)
            .with(4, 1.0);
        let err = run.fit(&input).unwrap_err();
        assert!(matches!(
            err,
            AssayError::InsufficientCalibrationPoints {
                required: 4,
                found: 2
            }
        ));
        assert_eq!(run.stage(), Stage::AwaitingCalibration);
        assert!(run.model().is_none());

        let report = run.report();
        assert!(report.result.is_none());
        assert!(report.error.unwrap().contains("distinct"));

        // Missing value for a known region is rejected too
        let err = run.fit(&CalibrationInput::new(5).with(1, 0.5)).unwrap_err();
        assert!(matches!(err, AssayError::MissingConcentration { .. }));
        assert_eq!(run.stage(), Stage::AwaitingCalibration);
        assert_eq!(run.table().unwrap().len(), 5);
    }

    #[test]
    fn test_user_calibration() {
        let (img, detections) = strip();
        let mut run =
            AssayRun::run_to_calibration(img, &detections, AssayConfig::default(), "strip.png")
                .unwrap();

        let input = CalibrationInput::new(3)
            .with(1, "4")
            .with(2, 2.0)
            .with(4, 0.5)
            .with(5, "0");
        let model = run.fit(&input).unwrap();
        assert_eq!(model.strategy, FitStrategy::Calibrated);
        assert_eq!(model.pairs.len(), 4);
        assert_eq!(run.stage(), Stage::Fitted);

        let est = run.estimate().unwrap().clone();
        assert_eq!(est.object, 3);
        assert_eq!(est.range, RangeStatus::WithinRange);
        assert!(est.concentration > 0.0);

        // A finished run takes no further calibration
        assert!(matches!(
            run.fit(&CalibrationInput::new(2)).unwrap_err(),
            AssayError::InvalidStage { .. }
        ));
        assert_eq!(run.concentration(), Some(&est));
    }

    #[test]
    fn test_toxic_threshold_from_config() {
        // Object 3 inverts to roughly 1.08 on this calibration
        let input = CalibrationInput::new(3)
            .with(1, "4")
            .with(2, 2.0)
            .with(4, 0.5)
            .with(5, "0");

        let (img, detections) = strip();
        let config = AssayConfig::default().with_threshold(1.0);
        let mut run = AssayRun::run_to_calibration(img, &detections, config, "strip.png").unwrap();
        let est = run.calibrate(&input).unwrap();
        assert!(est.concentration > 1.0 && est.concentration < 2.0);
        assert_eq!(est.classification, Classification::Toxic);

        let (img, detections) = strip();
        let mut run =
            AssayRun::run_to_calibration(img, &detections, AssayConfig::default(), "strip.png")
                .unwrap();
        let est = run.calibrate(&input).unwrap();
        assert_eq!(est.classification, Classification::Normal);
    }

    #[test]
    fn test_non_convergence_keeps_run_awaiting_calibration() {
        let (img, detections) = strip();
        let mut config = AssayConfig::default();
        config.fit.solver.max_iterations = 1;
        let mut run = AssayRun::run_to_calibration(img, &detections, config, "strip.png").unwrap();

        let err = run.fit(&CalibrationInput::new(3)).unwrap_err();
        assert!(matches!(err, AssayError::FitDidNotConverge { iterations: 1 }));
        assert_eq!(run.stage(), Stage::AwaitingCalibration);
        assert!(run.model().is_none());
        assert!(run.concentration().is_none());
        assert!(run.last_error().is_some());

        let report = run.report();
        assert!(report.result.is_none());
        assert!(report.error.unwrap().contains("did not converge"));
        assert_eq!(report.regions.len(), 5);
    }

    #[test]
    fn test_geometry_stays_in_regions() {
        let img = RgbImage::from_pixel(10, 10, Rgb([0, 10, 20]));
        let geom = RegionGeometry::BoundingBox(BoundingBox::new(0, 0, 5, 5));
        let mut run =
            AssayRun::from_geometries(img, vec![geom.clone()], AssayConfig::default(), "x");
        run.extract().unwrap();
        assert_eq!(run.regions()[0].geometry, geom);
    }
}
