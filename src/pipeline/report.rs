//! Output payload: one record per surviving region plus a result record.
//!
//! Field names are part of the exchange format and must not change.

use serde::{Deserialize, Serialize};

use super::estimation::ConcentrationEstimate;
use super::fitting::{FitStrategy, FittedModel};
use super::normalization::{NormalizedRegion, NormalizedTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    #[serde(rename = "Object")]
    pub object: usize,
    #[serde(rename = "Area")]
    pub area: u64,
    #[serde(rename = "Signal")]
    pub signal: f64,
    #[serde(rename = "Signal/Unit_Area")]
    pub signal_per_area: f64,
    #[serde(rename = "Relative Difference")]
    pub relative_difference: f64,
}

impl From<&NormalizedRegion> for RegionRecord {
    fn from(row: &NormalizedRegion) -> Self {
        Self {
            object: row.region.object,
            area: row.region.area,
            signal: row.region.raw_signal,
            signal_per_area: row.signal_per_area,
            relative_difference: row.relative_difference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(rename = "C")]
    pub c: f64,
    #[serde(rename = "D")]
    pub d: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
    #[serde(rename = "R_squared")]
    pub r_squared: f64,
    pub unknown_object: usize,
    /// `None` means undetermined
    pub estimated_concentration: Option<f64>,
    pub classification: Option<String>,
    pub fit_strategy: FitStrategy,
    pub note: Option<String>,
}

impl ResultRecord {
    pub fn new(
        model: &FittedModel,
        unknown_object: usize,
        estimate: Option<&ConcentrationEstimate>,
    ) -> Self {
        Self {
            a: model.params.a,
            b: model.params.b,
            c: model.params.c,
            d: model.params.d,
            rmse: model.rmse,
            r_squared: model.r_squared,
            unknown_object,
            estimated_concentration: estimate.map(|e| e.concentration),
            classification: estimate.map(|e| e.classification.to_string()),
            fit_strategy: model.strategy,
            note: estimate.and_then(|e| e.note()).map(str::to_string),
        }
    }
}

/// Everything a front-end needs to show for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssayReport {
    pub regions: Vec<RegionRecord>,
    pub result: Option<ResultRecord>,
    /// Why no result is available, e.g. a fit that did not converge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssayReport {
    /// Region table only, before any fit
    pub fn from_table(table: &NormalizedTable) -> Self {
        Self {
            regions: table.rows().iter().map(RegionRecord::from).collect(),
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: ResultRecord) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }

    /// Plain-text table, one region per line
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:>6}  {:>10}  {:>14}  {:>16}  {:>19}\n",
            "Object", "Area", "Signal", "Signal/Unit_Area", "Relative Difference"
        ));
        for r in &self.regions {
            out.push_str(&format!(
                "{:>6}  {:>10}  {:>14.4}  {:>16.6}  {:>18.2}%\n",
                r.object, r.area, r.signal, r.signal_per_area, r.relative_difference
            ));
        }

        if let Some(res) = &self.result {
            out.push('\n');
            out.push_str(&format!(
                "Fitted parameters: {:.4}, {:.4}, {:.4}, {:.4}\n",
                res.a, res.b, res.c, res.d
            ));
            out.push_str(&format!("RMSE: {:.4}\nR-squared: {:.4}\n", res.rmse, res.r_squared));
            if res.fit_strategy == FitStrategy::FallbackLadder {
                out.push_str("Fit used placeholder concentrations (reduced confidence)\n");
            }
            match res.estimated_concentration {
                Some(c) => out.push_str(&format!(
                    "Concentration for object {}: {:.6}, status: {}\n",
                    res.unknown_object,
                    c,
                    res.classification.as_deref().unwrap_or("-")
                )),
                None => out.push_str(&format!(
                    "Concentration for object {}: undetermined\n",
                    res.unknown_object
                )),
            }
            if let Some(note) = &res.note {
                out.push_str(&format!("Note: {}\n", note));
            }
        }
        if let Some(err) = &self.error {
            out.push_str(&format!("\nError: {}\n", err));
        }
        out
    }
}
