//! Image encoding service
//!
//! Two encodings are involved in one invocation: a lossy JPEG intermediate
//! handed to the oracle, and the lossless PNG that carries the final cutout.

use crate::{
    error::{BgCutError, Result},
    types::RasterImage,
};
use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    ExtendedColorType, ImageBuffer, ImageEncoder as _, ImageFormat, Rgb,
};

/// Service for serializing and deserializing rasters
pub struct ImageEncoder;

impl ImageEncoder {
    /// Encode an RGBA raster as PNG
    ///
    /// PNG keeps every RGB and alpha value exactly, so decoding the blob
    /// reproduces `image` bit for bit.
    ///
    /// # Errors
    /// - `BgCutError::EncodingFailed` when the encoder errors or produces no data
    ///
    /// # Examples
    /// ```rust
    /// use bgcut::services::ImageEncoder;
    /// use image::RgbaImage;
    ///
    /// let image = RgbaImage::new(4, 4);
    /// let blob = ImageEncoder::encode_png(&image)?;
    /// assert_eq!(ImageEncoder::decode_png(&blob)?, image);
    /// # Ok::<(), bgcut::BgCutError>(())
    /// ```
    pub fn encode_png(image: &RasterImage) -> Result<Vec<u8>> {
        let (width, height) = image.dimensions();
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|e| BgCutError::encoding_failed(format!("PNG encoder error: {}", e)))?;

        if buffer.is_empty() {
            return Err(BgCutError::encoding_failed(
                "PNG encoder produced no data",
            ));
        }
        Ok(buffer)
    }

    /// Encode the raster as the compressed intermediate sent to the oracle
    ///
    /// The alpha channel is dropped; `quality` is the JPEG quality (1-100).
    ///
    /// # Errors
    /// - `BgCutError::EncodingFailed` when the encoder errors or produces no data
    pub fn encode_intermediate(image: &RasterImage, quality: u8) -> Result<Vec<u8>> {
        let (width, height) = image.dimensions();
        let rgb: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
            let pixel = image.get_pixel(x, y);
            Rgb([pixel[0], pixel[1], pixel[2]])
        });

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| BgCutError::encoding_failed(format!("JPEG encoder error: {}", e)))?;

        if buffer.is_empty() {
            return Err(BgCutError::encoding_failed(
                "Intermediate encoder produced no data",
            ));
        }
        Ok(buffer)
    }

    /// Decode a PNG blob into an RGBA raster
    pub fn decode_png(bytes: &[u8]) -> Result<RasterImage> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| BgCutError::invalid_input(format!("Failed to decode PNG: {}", e)))?;
        Ok(image.to_rgba8())
    }

    /// Decode arbitrary input bytes (JPEG, PNG, TIFF, WebP) into an RGBA raster
    ///
    /// # Errors
    /// - `BgCutError::InvalidInput` for empty, unrecognized or corrupt data
    pub fn decode_input(bytes: &[u8]) -> Result<RasterImage> {
        if bytes.is_empty() {
            return Err(BgCutError::invalid_input("Input contains no data"));
        }
        let image = image::load_from_memory(bytes).map_err(|e| {
            BgCutError::invalid_input(format!("Failed to decode image from bytes: {}", e))
        })?;
        Ok(image.to_rgba8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn create_test_image(width: u32, height: u32) -> RasterImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([
                (x * 7 % 256) as u8,
                (y * 13 % 256) as u8,
                ((x + y) % 256) as u8,
                ((x * y) % 256) as u8,
            ])
        })
    }

    #[test]
    fn test_png_round_trip_is_lossless() {
        let image = create_test_image(37, 23);
        let blob = ImageEncoder::encode_png(&image).unwrap();
        assert_eq!(&blob[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = ImageEncoder::decode_png(&blob).unwrap();
        assert_eq!(decoded.dimensions(), image.dimensions());
        assert_eq!(decoded.as_raw(), image.as_raw());
    }

    #[test]
    fn test_intermediate_is_jpeg() {
        let image = create_test_image(64, 48);
        let blob = ImageEncoder::encode_intermediate(&image, 80).unwrap();
        assert_eq!(&blob[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&blob).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_intermediate_quality_affects_size() {
        let image = create_test_image(128, 128);
        let low = ImageEncoder::encode_intermediate(&image, 10).unwrap();
        let high = ImageEncoder::encode_intermediate(&image, 95).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_decode_input_rejects_garbage() {
        assert!(matches!(
            ImageEncoder::decode_input(&[]),
            Err(BgCutError::InvalidInput(_))
        ));
        assert!(matches!(
            ImageEncoder::decode_input(b"definitely not an image"),
            Err(BgCutError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_decode_input_accepts_png() {
        let image = create_test_image(5, 5);
        let blob = ImageEncoder::encode_png(&image).unwrap();
        assert_eq!(ImageEncoder::decode_input(&blob).unwrap(), image);
    }
}
