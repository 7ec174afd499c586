//! Run configuration, persisted as JSON.
//!
//! Every field has a default, so a partial file (or none at all) is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::extraction::ExtractionConfig;
use crate::pipeline::fitting::FitConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssayConfig {
    pub extraction: ExtractionConfig,
    /// Concentrations at or below this are lifted to it before fitting
    pub zero_concentration_epsilon: f64,
    /// Estimates strictly above this are classified toxic
    pub toxic_threshold: f64,
    pub fit: FitConfig,
}

impl Default for AssayConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            zero_concentration_epsilon: 1e-6,
            toxic_threshold: 2.0,
            fit: FitConfig::default(),
        }
    }
}

impl AssayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AssayConfig = serde_json::from_str(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Same configuration with a different toxicity threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.toxic_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image_io::Channel;
    use crate::pipeline::extraction::SignalMetric;

    #[test]
    fn test_defaults() {
        let c = AssayConfig::default();
        assert_eq!(c.zero_concentration_epsilon, 1e-6);
        assert_eq!(c.toxic_threshold, 2.0);
        assert_eq!(c.extraction.ratio_epsilon, 0.001);
        assert_eq!(c.fit.initial_guess, [0.0, 0.1, 0.2, 1.0]);
        assert_eq!(c.fit.solver.max_iterations, 100_000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{"toxic_threshold": 1.5, "fit": {"solver": {"max_iterations": 50}}}"#;
        let c: AssayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(c.toxic_threshold, 1.5);
        assert_eq!(c.fit.solver.max_iterations, 50);
        assert_eq!(c.fit.initial_guess, [0.0, 0.1, 0.2, 1.0]);
        assert_eq!(c.extraction, ExtractionConfig::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assay.json");

        let mut config = AssayConfig::default().with_threshold(3.0);
        config.extraction.metric = SignalMetric::MeanIntensity {
            channel: Channel::Luma,
        };
        config.save(&path).unwrap();

        let loaded = AssayConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AssayConfig::load(&dir.path().join("nope.json")).is_err());
    }
}
