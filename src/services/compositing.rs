//! Alpha compositing service

use crate::{
    error::{BgCutError, Result},
    types::{AlphaBuffer, RasterImage},
};

/// Merges a refined alpha buffer into an RGBA raster
pub struct Compositor;

impl Compositor {
    /// Replace the alpha channel of `image` with `alpha`
    ///
    /// RGB channels are copied unchanged, including under fully transparent
    /// pixels.
    ///
    /// # Errors
    /// - `alpha` and `image` dimensions differ
    pub fn composite(image: &RasterImage, alpha: &AlphaBuffer) -> Result<RasterImage> {
        if image.dimensions() != alpha.dimensions() {
            return Err(BgCutError::processing(format!(
                "Image ({}x{}) and alpha buffer ({}x{}) dimensions do not match",
                image.width(),
                image.height(),
                alpha.width(),
                alpha.height()
            )));
        }

        let mut result = image.clone();
        for (pixel, &value) in result.pixels_mut().zip(alpha.as_array().iter()) {
            pixel[3] = value;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn create_test_image(width: u32, height: u32) -> RasterImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x * 31 % 256) as u8, (y * 17 % 256) as u8, 200, 255])
        })
    }

    #[test]
    fn test_rgb_preserved_alpha_replaced() {
        let image = create_test_image(8, 6);
        let alpha = AlphaBuffer::from_vec(8, 6, (0..48).map(|i| (i * 5) as u8).collect()).unwrap();

        let result = Compositor::composite(&image, &alpha).unwrap();

        assert_eq!(result.dimensions(), (8, 6));
        for ((x, y, out), input) in result.enumerate_pixels().zip(image.pixels()) {
            assert_eq!(out.0[..3], input.0[..3]);
            assert_eq!(Some(out[3]), alpha.get(x, y));
        }
    }

    #[test]
    fn test_transparent_pixels_keep_color() {
        let image = create_test_image(3, 3);
        let alpha = AlphaBuffer::uniform(3, 3, 0);
        let result = Compositor::composite(&image, &alpha).unwrap();

        assert!(result.pixels().all(|p| p[3] == 0));
        assert_eq!(result.get_pixel(2, 1)[0], image.get_pixel(2, 1)[0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let image = create_test_image(4, 4);
        let alpha = AlphaBuffer::uniform(4, 5, 255);
        assert!(matches!(
            Compositor::composite(&image, &alpha),
            Err(BgCutError::Processing(_))
        ));
    }
}
