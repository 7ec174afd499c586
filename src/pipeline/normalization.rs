//! Signal normalization
//!
//! Raw signals are divided by the largest detected footprint (the same
//! denominator for every region), then expressed as a percentage gap to the
//! strongest signal density of the run.

use serde::{Deserialize, Serialize};

use crate::data::region::Region;
use crate::error::{AssayError, Result};

/// A region with its normalized response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    pub region: Region,
    /// `raw_signal / max_area`
    pub signal_per_area: f64,
    /// Percentage gap to the strongest signal per area, `0..=100`
    pub relative_difference: f64,
}

/// Normalized regions ordered by ascending relative difference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTable {
    rows: Vec<NormalizedRegion>,
    /// Largest area over all regions, before filtering
    max_area: u64,
    max_signal_per_area: f64,
    /// Regions removed by the negative-difference guard
    dropped: Vec<usize>,
}

impl NormalizedTable {
    pub fn rows(&self) -> &[NormalizedRegion] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_area(&self) -> u64 {
        self.max_area
    }

    pub fn max_signal_per_area(&self) -> f64 {
        self.max_signal_per_area
    }

    pub fn dropped(&self) -> &[usize] {
        &self.dropped
    }

    /// Object numbers in table order
    pub fn objects(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().map(|r| r.region.object)
    }

    pub fn get(&self, object: usize) -> Option<&NormalizedRegion> {
        self.rows.iter().find(|r| r.region.object == object)
    }
}

/// Normalize extracted regions into a sorted relative-difference table.
pub fn normalize(regions: &[Region]) -> Result<NormalizedTable> {
    let max_area = regions
        .iter()
        .map(|r| r.area)
        .max()
        .ok_or(AssayError::NoRegionsDetected)?;

    let densities: Vec<f64> = regions
        .iter()
        .map(|r| r.raw_signal / max_area as f64)
        .collect();

    let max_obj = densities.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut rows = Vec::with_capacity(regions.len());
    let mut dropped = Vec::new();

    for (region, &density) in regions.iter().zip(densities.iter()) {
        // All-zero signals: nothing to compare against, so no difference
        let relative_difference = if max_obj > 0.0 {
            (max_obj - density) / max_obj * 100.0
        } else {
            0.0
        };

        if !(relative_difference >= 0.0) {
            log::debug!(
                "Dropping object {} (relative difference {})",
                region.object,
                relative_difference
            );
            dropped.push(region.object);
            continue;
        }

        rows.push(NormalizedRegion {
            region: region.clone(),
            signal_per_area: density,
            relative_difference,
        });
    }

    // Stable: ties keep detection order
    rows.sort_by(|a, b| a.relative_difference.total_cmp(&b.relative_difference));

    log::info!(
        "Normalized {} regions (max area {}, max signal/area {:.4}, dropped {})",
        rows.len(),
        max_area,
        max_obj,
        dropped.len()
    );

    Ok(NormalizedTable {
        rows,
        max_area,
        max_signal_per_area: max_obj,
        dropped,
    })
}
