//! Detector input contract
//!
//! The region detector itself (YOLO boxes, StarDist instance masks, ...)
//! lives outside this crate. It hands over an ordered list of geometries in
//! the coordinate space of the image passed to the signal extractor.

use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::region::{BoundingBox, PixelMask, RegionGeometry};
use crate::error::Result;

/// Anything that can produce regions of interest for an image
pub trait RegionDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RegionGeometry>>;
}

/// One detection as written by an external detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionEntry {
    /// `[x0, y0, x1, y1]`, exclusive upper corner
    Bbox([u32; 4]),
    /// `[[x, y], ...]`
    Mask(Vec<[u32; 2]>),
}

impl DetectionEntry {
    pub fn to_geometry(&self) -> RegionGeometry {
        match self {
            DetectionEntry::Bbox([x0, y0, x1, y1]) => {
                RegionGeometry::BoundingBox(BoundingBox::new(*x0, *y0, *x1, *y1))
            }
            DetectionEntry::Mask(pixels) => {
                RegionGeometry::Mask(PixelMask::new(pixels.iter().copied()))
            }
        }
    }
}

impl From<&RegionGeometry> for DetectionEntry {
    fn from(geometry: &RegionGeometry) -> Self {
        match geometry {
            RegionGeometry::BoundingBox(b) => {
                DetectionEntry::Bbox([b.x_min, b.y_min, b.x_max, b.y_max])
            }
            RegionGeometry::Mask(m) => DetectionEntry::Mask(m.pixels().to_vec()),
        }
    }
}

/// Detector output persisted as JSON: `{"regions": [{"bbox": [..]}, {"mask": [..]}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionFile {
    #[serde(default)]
    pub regions: Vec<DetectionEntry>,
}

impl DetectionFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: DetectionFile = serde_json::from_str(&text)?;
        log::info!(
            "Read {} detections from {}",
            file.regions.len(),
            path.display()
        );
        Ok(file)
    }

    /// Persist geometries produced by an in-process detector
    pub fn from_geometries(geometries: &[RegionGeometry]) -> Self {
        Self {
            regions: geometries.iter().map(DetectionEntry::from).collect(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl RegionDetector for DetectionFile {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<RegionGeometry>> {
        Ok(self.regions.iter().map(DetectionEntry::to_geometry).collect())
    }
}
