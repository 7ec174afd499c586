//! Region geometry and the per-region signal record

use std::collections::BTreeSet;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Mask value marking a pixel as inside the region
pub const MASK_ON: u8 = 255;

/// Axis-aligned pixel rectangle, half-open: `[x_min, x_max) × [y_min, y_max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Self {
        Self {
            x_min: x_min.min(x_max),
            y_min: y_min.min(y_max),
            x_max: x_min.max(x_max),
            y_max: y_min.max(y_max),
        }
    }

    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }
}

/// Instance mask given as the set of pixel coordinates it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelMask {
    pixels: Vec<[u32; 2]>,
}

impl PixelMask {
    /// Build a mask from `[x, y]` coordinates; duplicates are dropped
    pub fn new(pixels: impl IntoIterator<Item = [u32; 2]>) -> Self {
        let unique: BTreeSet<[u32; 2]> = pixels.into_iter().collect();
        Self {
            pixels: unique.into_iter().collect(),
        }
    }

    pub fn pixels(&self) -> &[[u32; 2]] {
        &self.pixels
    }
}

/// Geometry of one detected region.
///
/// Detectors that emit boxes and detectors that emit instance masks both
/// end up here; everything downstream only asks for `area` and `mask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionGeometry {
    BoundingBox(BoundingBox),
    Mask(PixelMask),
}

impl RegionGeometry {
    /// Pixel area of the geometry itself (not clipped to any image)
    pub fn area(&self) -> u64 {
        match self {
            RegionGeometry::BoundingBox(b) => b.width() as u64 * b.height() as u64,
            RegionGeometry::Mask(m) => m.pixels.len() as u64,
        }
    }

    /// Rasterize into a binary mask of the given image size.
    /// Pixels falling outside the image are ignored.
    pub fn mask(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        match self {
            RegionGeometry::BoundingBox(b) => {
                for y in b.y_min..b.y_max.min(height) {
                    for x in b.x_min..b.x_max.min(width) {
                        mask.put_pixel(x, y, Luma([MASK_ON]));
                    }
                }
            }
            RegionGeometry::Mask(m) => {
                for &[x, y] in &m.pixels {
                    if x < width && y < height {
                        mask.put_pixel(x, y, Luma([MASK_ON]));
                    }
                }
            }
        }
        mask
    }
}

/// One detected region with its raw signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// 1-based detection order
    pub object: usize,
    pub geometry: RegionGeometry,
    pub area: u64,
    pub raw_signal: f64,
}
