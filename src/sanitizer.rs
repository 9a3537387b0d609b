//! Post-processing of renderer output
//!
//! `wkhtmltoimage` sometimes writes diagnostic text to stdout ahead of the
//! encoded image. The sanitizer skips that prefix one byte at a time until
//! the remainder decodes, then re-encodes the image so the cached file is
//! always well formed.

use crate::{ImageFormat, Result, ThumbError, DEFAULT_MAX_GARBAGE_PREFIX, DEFAULT_MIN_IMAGE_SIZE};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, Frame};
use std::io::Cursor;
use tracing::debug;

/// Quality the renderer itself uses when none is given.
const RENDERER_DEFAULT_QUALITY: u8 = 94;

/// Speed/quality trade-off of the GIF palette quantizer (1 best, 30 fastest).
const GIF_QUANTIZER_SPEED: i32 = 10;

#[derive(Debug, Clone)]
pub struct OutputSanitizer {
    min_size: u64,
    max_prefix: usize,
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_IMAGE_SIZE, DEFAULT_MAX_GARBAGE_PREFIX)
    }
}

impl OutputSanitizer {
    pub fn new(min_size: u64, max_prefix: usize) -> Self {
        Self {
            min_size,
            max_prefix,
        }
    }

    /// Returns `raw` cleaned up and re-encoded as `format`.
    ///
    /// Empty input gives empty output. Input without a decodable image
    /// within the first `max_prefix` bytes also gives empty output; callers
    /// must treat that as a failed render. A re-encoded image smaller than
    /// `min_size` is rejected with [`ThumbError::InvalidImage`].
    pub fn sanitize(&self, raw: &[u8], format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let Some(raster) = format.raster() else {
            return Ok(raw.to_vec());
        };

        let Some((offset, decoded)) = self.find_image(raw, raster) else {
            debug!("No decodable {} image in {} bytes of output", format, raw.len());
            return Ok(Vec::new());
        };
        if offset > 0 {
            debug!("Stripped {} leading bytes from renderer output", offset);
        }

        let encoded = encode(&decoded, format, quality)?;
        if (encoded.len() as u64) < self.min_size {
            return Err(ThumbError::InvalidImage(format!(
                "rendered image is {} bytes, below the {} byte minimum",
                encoded.len(),
                self.min_size
            )));
        }

        Ok(encoded)
    }

    fn find_image(&self, raw: &[u8], format: image::ImageFormat) -> Option<(usize, DynamicImage)> {
        let last_offset = self.max_prefix.min(raw.len() - 1);
        (0..=last_offset).find_map(|offset| {
            image::load_from_memory_with_format(&raw[offset..], format)
                .ok()
                .map(|decoded| (offset, decoded))
        })
    }
}

fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    match format {
        ImageFormat::Png => {
            image.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        }
        ImageFormat::Jpg => {
            let quality = match quality {
                0 => RENDERER_DEFAULT_QUALITY,
                q => q.min(100),
            };
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, quality).encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ColorType::Rgb8,
            )?;
        }
        ImageFormat::Gif => {
            // The trailer is written when the encoder is dropped.
            let mut encoder = GifEncoder::new_with_speed(&mut buffer, GIF_QUANTIZER_SPEED);
            encoder.encode_frame(Frame::new(image.to_rgba8()))?;
        }
        ImageFormat::Svg => return Ok(Vec::new()),
    }

    Ok(buffer)
}
