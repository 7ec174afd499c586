//! Image loading and per-channel pixel access

use std::path::Path;

use image::{Pixel, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Colour channel a signal is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Red,
    Green,
    Blue,
    /// Luminance, as computed by `image` (Rec. 709 weights)
    Luma,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Red => write!(f, "R"),
            Channel::Green => write!(f, "G"),
            Channel::Blue => write!(f, "B"),
            Channel::Luma => write!(f, "Luma"),
        }
    }
}

impl Channel {
    /// Value of this channel for one pixel, in the 0–255 range
    pub fn value(self, pixel: &Rgb<u8>) -> f64 {
        match self {
            Channel::Red => pixel[0] as f64,
            Channel::Green => pixel[1] as f64,
            Channel::Blue => pixel[2] as f64,
            Channel::Luma => pixel.to_luma()[0] as f64,
        }
    }

    /// True if this channel is zero for every pixel in the image
    pub fn is_uniformly_zero(self, image: &RgbImage) -> bool {
        image.pixels().all(|p| self.value(p) == 0.0)
    }
}

/// Load an image from disk as 8-bit RGB
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path)?.to_rgb8();
    log::info!(
        "Loaded {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(img)
}
