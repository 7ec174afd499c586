//! Signal extraction
//!
//! For every detected region a binary mask is rasterized, a per-pixel metric
//! is averaged over the masked pixels and scaled by the region's area.

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::image_io::Channel;
use crate::data::region::{Region, RegionGeometry, MASK_ON};
use crate::error::{AssayError, Result};

/// Per-pixel quantity averaged over a region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalMetric {
    /// `reference / (normalization + epsilon)`
    ChannelRatio {
        reference: Channel,
        normalization: Channel,
    },
    /// Plain intensity of one channel
    MeanIntensity { channel: Channel },
}

impl Default for SignalMetric {
    fn default() -> Self {
        SignalMetric::ChannelRatio {
            reference: Channel::Blue,
            normalization: Channel::Green,
        }
    }
}

impl std::fmt::Display for SignalMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalMetric::ChannelRatio {
                reference,
                normalization,
            } => write!(f, "{}/{} ratio", reference, normalization),
            SignalMetric::MeanIntensity { channel } => write!(f, "mean {} intensity", channel),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub metric: SignalMetric,
    /// Added to the normalization channel before dividing
    pub ratio_epsilon: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            metric: SignalMetric::default(),
            ratio_epsilon: 0.001,
        }
    }
}

/// Mean of the configured metric over the masked pixels of `geometry`.
///
/// `ratio_disabled` is set when the normalization channel is zero across the
/// whole image; the ratio is then defined as 0.
fn mean_metric(
    image: &RgbImage,
    geometry: &RegionGeometry,
    config: &ExtractionConfig,
    ratio_disabled: bool,
) -> f64 {
    if ratio_disabled {
        return 0.0;
    }

    let mask = geometry.mask(image.width(), image.height());
    let mut sum = 0.0;
    let mut count = 0usize;

    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] != MASK_ON {
            continue;
        }
        let px = image.get_pixel(x, y);
        sum += match config.metric {
            SignalMetric::ChannelRatio {
                reference,
                normalization,
            } => reference.value(px) / (normalization.value(px) + config.ratio_epsilon),
            SignalMetric::MeanIntensity { channel } => channel.value(px),
        };
        count += 1;
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Compute the raw signal of one region
pub fn extract_region(
    image: &RgbImage,
    object: usize,
    geometry: &RegionGeometry,
    config: &ExtractionConfig,
) -> Result<Region> {
    let disabled = ratio_disabled(image, config);
    region_signal(image, object, geometry, config, disabled)
}

fn ratio_disabled(image: &RgbImage, config: &ExtractionConfig) -> bool {
    match config.metric {
        SignalMetric::ChannelRatio { normalization, .. } => {
            let zero = normalization.is_uniformly_zero(image);
            if zero {
                log::warn!(
                    "{} channel is zero across the image; ratio signal defined as 0",
                    normalization
                );
            }
            zero
        }
        SignalMetric::MeanIntensity { .. } => false,
    }
}

fn region_signal(
    image: &RgbImage,
    object: usize,
    geometry: &RegionGeometry,
    config: &ExtractionConfig,
    disabled: bool,
) -> Result<Region> {
    let area = geometry.area();
    if area == 0 {
        return Err(AssayError::DegenerateRegion { object });
    }

    let mean = mean_metric(image, geometry, config, disabled);
    Ok(Region {
        object,
        geometry: geometry.clone(),
        area,
        raw_signal: mean * area as f64,
    })
}

/// Extract every region. Object numbers follow detection order, from 1.
///
/// An empty detection list gives an empty table; it is the caller's job to
/// stop there.
pub fn extract_signals(
    image: &RgbImage,
    geometries: &[RegionGeometry],
    config: &ExtractionConfig,
) -> Result<Vec<Region>> {
    if geometries.is_empty() {
        return Ok(Vec::new());
    }

    let disabled = ratio_disabled(image, config);

    let regions = geometries
        .par_iter()
        .enumerate()
        .map(|(i, geom)| region_signal(image, i + 1, geom, config, disabled))
        .collect::<Result<Vec<Region>>>()?;

    log::info!(
        "Extracted {} regions using {}",
        regions.len(),
        config.metric
    );
    Ok(regions)
}
