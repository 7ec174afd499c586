//! Calibration input: which region is the unknown sample and the known
//! concentrations of the others.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};
use crate::pipeline::normalization::NormalizedTable;

/// Text that marks an entry as the unknown sample
const UNKNOWN_MARKERS: [&str; 2] = ["unknown", "?"];

/// A concentration as typed by a user: either a JSON number or free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcentrationValue {
    Number(f64),
    Text(String),
}

impl ConcentrationValue {
    fn is_unknown_marker(&self) -> bool {
        match self {
            ConcentrationValue::Number(_) => false,
            ConcentrationValue::Text(t) => UNKNOWN_MARKERS
                .iter()
                .any(|m| t.trim().eq_ignore_ascii_case(m)),
        }
    }
}

impl From<f64> for ConcentrationValue {
    fn from(v: f64) -> Self {
        ConcentrationValue::Number(v)
    }
}

impl From<&str> for ConcentrationValue {
    fn from(v: &str) -> Self {
        ConcentrationValue::Text(v.to_string())
    }
}

/// Calibration as supplied by the caller, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInput {
    /// Object number of the unknown sample
    #[serde(default)]
    pub unknown: Option<usize>,
    /// Object number → concentration
    #[serde(default)]
    pub concentrations: BTreeMap<usize, ConcentrationValue>,
}

impl CalibrationInput {
    pub fn new(unknown: usize) -> Self {
        Self {
            unknown: Some(unknown),
            concentrations: BTreeMap::new(),
        }
    }

    pub fn with(mut self, object: usize, value: impl Into<ConcentrationValue>) -> Self {
        self.concentrations.insert(object, value.into());
        self
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// One region paired with its known concentration; `None` for the unknown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub object: usize,
    pub concentration: Option<f64>,
}

/// How the concentrations of a calibration set were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationMode {
    /// Every known region has a user-supplied concentration
    UserSupplied,
    /// No concentrations were given; the fitter substitutes a placeholder ladder
    Fallback,
}

/// Validated calibration for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSet {
    unknown: usize,
    mode: CalibrationMode,
    /// Ordered like the normalized table
    points: Vec<CalibrationPoint>,
}

impl CalibrationSet {
    pub fn unknown(&self) -> usize {
        self.unknown
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// `(object, concentration)` for every known region
    pub fn known(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.points
            .iter()
            .filter_map(|p| p.concentration.map(|c| (p.object, c)))
    }
}

/// Parse one typed concentration.
///
/// Zero (and anything below `epsilon`) becomes `epsilon`, since the model
/// divides by concentration.
pub fn parse_concentration(object: usize, value: &ConcentrationValue, epsilon: f64) -> Result<f64> {
    let parsed = match value {
        ConcentrationValue::Number(v) => *v,
        ConcentrationValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(AssayError::MissingConcentration { object });
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| AssayError::InvalidConcentrationInput {
                    object,
                    input: text.clone(),
                })?
        }
    };

    if !parsed.is_finite() || parsed < 0.0 {
        return Err(AssayError::InvalidConcentrationInput {
            object,
            input: match value {
                ConcentrationValue::Number(v) => v.to_string(),
                ConcentrationValue::Text(t) => t.clone(),
            },
        });
    }

    Ok(parsed.max(epsilon))
}

/// Bind user calibration input to the surviving regions of a run.
pub fn bind_calibration(
    table: &NormalizedTable,
    input: &CalibrationInput,
    epsilon: f64,
) -> Result<CalibrationSet> {
    let available: Vec<usize> = table.objects().collect();

    let mut unknowns: BTreeSet<usize> = input
        .concentrations
        .iter()
        .filter(|(_, v)| v.is_unknown_marker())
        .map(|(&obj, _)| obj)
        .collect();
    unknowns.extend(input.unknown);

    let unknown = match unknowns.len() {
        0 => return Err(AssayError::NoUnknown),
        1 => *unknowns.iter().next().ok_or(AssayError::NoUnknown)?,
        _ => return Err(AssayError::DuplicateUnknown(unknowns.into_iter().collect())),
    };

    if !available.contains(&unknown) {
        return Err(AssayError::UnknownObjectNotFound {
            object: unknown,
            available,
        });
    }

    let any_given = available
        .iter()
        .filter(|&&obj| obj != unknown)
        .any(|obj| input.concentrations.contains_key(obj));

    if !any_given {
        log::warn!("No concentrations supplied; falling back to placeholder ladder");
        let points = available
            .iter()
            .map(|&object| CalibrationPoint {
                object,
                concentration: None,
            })
            .collect();
        return Ok(CalibrationSet {
            unknown,
            mode: CalibrationMode::Fallback,
            points,
        });
    }

    let mut points = Vec::with_capacity(available.len());
    for &object in &available {
        if object == unknown {
            points.push(CalibrationPoint {
                object,
                concentration: None,
            });
            continue;
        }
        let value = input
            .concentrations
            .get(&object)
            .ok_or(AssayError::MissingConcentration { object })?;
        let concentration = parse_concentration(object, value, epsilon)?;
        points.push(CalibrationPoint {
            object,
            concentration: Some(concentration),
        });
    }

    for obj in input.concentrations.keys() {
        if !available.contains(obj) {
            log::warn!("Ignoring concentration for object {} (not in table)", obj);
        }
    }

    Ok(CalibrationSet {
        unknown,
        mode: CalibrationMode::UserSupplied,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::region::{BoundingBox, Region, RegionGeometry};
    use crate::pipeline::normalization::normalize;

    const EPS: f64 = 1e-6;

    fn table(n: usize) -> NormalizedTable {
        let regions: Vec<Region> = (1..=n)
            .map(|i| Region {
                object: i,
                geometry: RegionGeometry::BoundingBox(BoundingBox::new(0, 0, 10, 10)),
                area: 100,
                raw_signal: 100.0 - i as f64 * 10.0,
            })
            .collect();
        normalize(&regions).unwrap()
    }

    #[test]
    fn test_parse_zero_maps_to_epsilon() {
        assert_eq!(parse_concentration(1, &"0".into(), EPS).unwrap(), EPS);
        assert_eq!(parse_concentration(1, &ConcentrationValue::Number(0.0), EPS).unwrap(), EPS);
        assert_eq!(parse_concentration(1, &" 2.5 ".into(), EPS).unwrap(), 2.5);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            parse_concentration(3, &"abc".into(), EPS),
            Err(AssayError::InvalidConcentrationInput { object: 3, .. })
        ));
        assert!(matches!(
            parse_concentration(3, &"-1".into(), EPS),
            Err(AssayError::InvalidConcentrationInput { .. })
        ));
        assert!(matches!(
            parse_concentration(3, &"".into(), EPS),
            Err(AssayError::MissingConcentration { object: 3 })
        ));
        assert!(matches!(
            parse_concentration(3, &"NaN".into(), EPS),
            Err(AssayError::InvalidConcentrationInput { .. })
        ));
    }

    #[test]
    fn test_bind_user_supplied() {
        let t = table(5);
        let input = CalibrationInput::new(3)
            .with(1, "0")
            .with(2, 0.5)
            .with(4, "1")
            .with(5, "2");
        let set = bind_calibration(&t, &input, EPS).unwrap();

        assert_eq!(set.mode(), CalibrationMode::UserSupplied);
        assert_eq!(set.unknown(), 3);
        assert_eq!(set.points().len(), 5);
        let known: Vec<(usize, f64)> = set.known().collect();
        assert_eq!(known, vec![(1, EPS), (2, 0.5), (4, 1.0), (5, 2.0)]);
    }

    #[test]
    fn test_bind_unknown_marker_in_map() {
        let t = table(4);
        let input = CalibrationInput::default()
            .with(1, 0.1)
            .with(2, "unknown")
            .with(3, 0.2)
            .with(4, 0.3);
        let set = bind_calibration(&t, &input, EPS).unwrap();
        assert_eq!(set.unknown(), 2);
    }

    #[test]
    fn test_bind_requires_exactly_one_unknown() {
        let t = table(4);
        let none = CalibrationInput::default().with(1, 0.1);
        assert!(matches!(
            bind_calibration(&t, &none, EPS),
            Err(AssayError::NoUnknown)
        ));

        let two = CalibrationInput::new(1).with(2, "?");
        assert!(matches!(
            bind_calibration(&t, &two, EPS),
            Err(AssayError::DuplicateUnknown(ref v)) if v == &vec![1, 2]
        ));
    }

    #[test]
    fn test_bind_unknown_must_exist() {
        let t = table(3);
        let input = CalibrationInput::new(9).with(1, 0.1);
        assert!(matches!(
            bind_calibration(&t, &input, EPS),
            Err(AssayError::UnknownObjectNotFound { object: 9, .. })
        ));
    }

    #[test]
    fn test_bind_partial_input_is_missing() {
        let t = table(4);
        let input = CalibrationInput::new(1).with(2, 0.1).with(3, 0.2);
        assert!(matches!(
            bind_calibration(&t, &input, EPS),
            Err(AssayError::MissingConcentration { object: 4 })
        ));
    }

    #[test]
    fn test_bind_no_concentrations_is_fallback() {
        let t = table(6);
        let set = bind_calibration(&t, &CalibrationInput::new(2), EPS).unwrap();
        assert_eq!(set.mode(), CalibrationMode::Fallback);
        assert_eq!(set.known().count(), 0);
    }

    #[test]
    fn test_input_from_json() {
        let json = r#"{"unknown": 3, "concentrations": {"1": "0", "2": 0.5}}"#;
        let input: CalibrationInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.unknown, Some(3));
        assert_eq!(input.concentrations[&1], ConcentrationValue::Text("0".into()));
        assert_eq!(input.concentrations[&2], ConcentrationValue::Number(0.5));
    }
}
