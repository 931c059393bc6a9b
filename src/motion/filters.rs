// SPDX-License-Identifier: GPL-3.0-only

//! Frame transforms applied before motion comparison

use crate::constants::motion::DEFAULT_BLUR_SIGMA;
use crate::session::ImageTransformer;
use image::{DynamicImage, RgbaImage, imageops};

/// Gaussian blur; a non-positive sigma returns the image unchanged
pub fn blur(image: &RgbaImage, sigma: f32) -> RgbaImage {
    if sigma <= 0.0 || !sigma.is_finite() {
        return image.clone();
    }
    imageops::blur(image, sigma)
}

/// Luma conversion, kept in RGBA so every channel carries the intensity
pub fn grayscale(image: &RgbaImage) -> RgbaImage {
    DynamicImage::ImageLuma8(imageops::grayscale(image)).to_rgba8()
}

/// Default motion transform: blur to suppress sensor noise, then grayscale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurGrayscale {
    pub sigma: f32,
}

impl Default for BlurGrayscale {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_BLUR_SIGMA,
        }
    }
}

impl ImageTransformer for BlurGrayscale {
    fn transform(&self, image: &RgbaImage) -> RgbaImage {
        grayscale(&blur(image, self.sigma))
    }
}

/// Transform that hands the frame over unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ImageTransformer for Identity {
    fn transform(&self, image: &RgbaImage) -> RgbaImage {
        image.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_grayscale_equalizes_channels() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([200, 40, 90, 255]));
        let gray = grayscale(&image);
        let Rgba([r, g, b, a]) = *gray.get_pixel(1, 1);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_blur_keeps_uniform_image() {
        let image = RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255]));
        let blurred = blur(&image, 2.0);
        assert_eq!(blurred.dimensions(), (16, 16));
        assert_eq!(blur(&image, 0.0), image);
    }
}
