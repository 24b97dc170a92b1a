// src/services/image_processor.rs
use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageOutputFormat, imageops::FilterType};
use log::{debug, warn};

use crate::config::AppConfig;
use crate::errors::RestyleError;

const JPEG_QUALITY: u8 = 85;
const RETRY_JPEG_QUALITY: u8 = 75;
const RETRY_SIDE: u32 = 768;
const PRE_SEND_JPEG_QUALITY: u8 = 70;
const PRE_SEND_MAX_SIDE: u32 = 1024;
const MIN_SIDE: u32 = 512;

/// Reshapes and recompresses arbitrary image buffers into the dimension and
/// payload constraints of the remote generation models.
#[derive(Debug)]
pub struct ImageProcessor {
    max_side: u32,
    max_payload_bytes: usize,
    pre_send_payload_bytes: usize,
}

impl ImageProcessor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            max_side: config.max_image_side,
            max_payload_bytes: config.max_payload_bytes,
            pre_send_payload_bytes: config.pre_send_payload_bytes,
        }
    }

    #[cfg(test)]
    pub fn with_limits(max_side: u32, max_payload_bytes: usize, pre_send_payload_bytes: usize) -> Self {
        Self {
            max_side,
            max_payload_bytes,
            pre_send_payload_bytes,
        }
    }

    /// Primary normalization path. Downscales so the longer side equals the
    /// configured maximum, aligns dimensions to multiples of 8 (diffusion
    /// models want tile-aligned input) with a 512px floor, corrects EXIF
    /// orientation, and re-encodes as quality-85 JPEG. If the encoding blows
    /// the payload ceiling a single more aggressive pass (768x768, q75) is
    /// tried before giving up with `ImageTooLarge`.
    pub fn normalize(&self, data: &[u8]) -> Result<Vec<u8>, RestyleError> {
        let img = image::load_from_memory(data)
            .map_err(|e| RestyleError::InvalidImage(format!("could not read dimensions: {e}")))?;
        let img = apply_orientation(img, read_exif_orientation(data));

        let (width, height) = img.dimensions();
        let (target_width, target_height) = target_dimensions(width, height, self.max_side);

        debug!(
            "normalizing image: {}x{} -> {}x{} ({} bytes in)",
            width,
            height,
            target_width,
            target_height,
            data.len()
        );

        let resized = img.resize_exact(target_width, target_height, FilterType::Lanczos3);
        let encoded = encode_jpeg(&resized, JPEG_QUALITY)?;

        if encoded.len() <= self.max_payload_bytes {
            return Ok(encoded);
        }

        warn!(
            "normalized image is {} bytes, over the {} ceiling, applying aggressive compression",
            encoded.len(),
            self.max_payload_bytes
        );

        let retry = img.resize_exact(RETRY_SIDE, RETRY_SIDE, FilterType::Lanczos3);
        let encoded = encode_jpeg(&retry, RETRY_JPEG_QUALITY)?;

        if encoded.len() > self.max_payload_bytes {
            return Err(RestyleError::ImageTooLarge {
                size: encoded.len(),
                limit: self.max_payload_bytes,
            });
        }

        Ok(encoded)
    }

    /// Lightweight pre-send path applied right before a generation call:
    /// downscale only if either dimension exceeds 1024, recompress further
    /// only if the result is still over the soft ceiling. Any internal
    /// failure returns the original buffer unchanged; degrading here must
    /// never abort a request that has come this far.
    pub fn optimize_for_generation(&self, data: &[u8]) -> Vec<u8> {
        match self.try_optimize(data) {
            Ok(optimized) => optimized,
            Err(e) => {
                warn!("pre-send optimization failed, using original buffer: {e}");
                data.to_vec()
            }
        }
    }

    fn try_optimize(&self, data: &[u8]) -> Result<Vec<u8>, RestyleError> {
        let img = image::load_from_memory(data)
            .map_err(|e| RestyleError::InvalidImage(format!("could not load image: {e}")))?;
        let (width, height) = img.dimensions();

        let mut buffer = if width > PRE_SEND_MAX_SIDE || height > PRE_SEND_MAX_SIDE {
            let resized = img.resize(PRE_SEND_MAX_SIDE, PRE_SEND_MAX_SIDE, FilterType::Lanczos3);
            encode_jpeg(&resized, JPEG_QUALITY)?
        } else {
            data.to_vec()
        };

        if buffer.len() > self.pre_send_payload_bytes {
            let reloaded = image::load_from_memory(&buffer)
                .map_err(|e| RestyleError::InvalidImage(format!("could not reload image: {e}")))?;
            buffer = encode_jpeg(&reloaded, PRE_SEND_JPEG_QUALITY)?;
            debug!("recompressed pre-send image to {} bytes", buffer.len());
        }

        Ok(buffer)
    }
}

/// Target dimensions for the primary path: longer side capped at `max_side`
/// preserving aspect ratio, both axes rounded down to a multiple of 8 and
/// clamped to at least 512.
pub(crate) fn target_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let (mut target_width, mut target_height) = if width.max(height) > max_side {
        if width > height {
            (
                max_side,
                (height as u64 * max_side as u64 / width as u64) as u32,
            )
        } else {
            (
                (width as u64 * max_side as u64 / height as u64) as u32,
                max_side,
            )
        }
    } else {
        (width, height)
    };

    target_width = (target_width / 8) * 8;
    target_height = (target_height / 8) * 8;

    (target_width.max(MIN_SIDE), target_height.max(MIN_SIDE))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, RestyleError> {
    let mut output = Vec::new();
    img.write_to(
        &mut Cursor::new(&mut output),
        ImageOutputFormat::Jpeg(quality),
    )
    .map_err(|e| RestyleError::InvalidImage(format!("failed to encode image: {e}")))?;
    Ok(output)
}

/// EXIF orientation tag (0x0112), 1 when absent. Phone photos carry their
/// rotation here; without correction portrait shots reach the models sideways.
fn read_exif_orientation(data: &[u8]) -> u32 {
    let mut cursor = Cursor::new(data);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn processor() -> ImageProcessor {
        ImageProcessor::with_limits(1024, 20 * 1024 * 1024, 4 * 1024 * 1024)
    }

    #[test]
    fn oversized_landscape_is_capped_at_max_side() {
        let normalized = processor().normalize(&png_bytes(2048, 1536)).unwrap();
        let img = image::load_from_memory(&normalized).unwrap();
        assert_eq!(img.dimensions(), (1024, 768));
    }

    #[test]
    fn oversized_portrait_is_capped_on_the_long_axis() {
        let normalized = processor().normalize(&png_bytes(1500, 3000)).unwrap();
        let img = image::load_from_memory(&normalized).unwrap();
        let (w, h) = img.dimensions();
        assert_eq!(h, 1024);
        assert_eq!(w % 8, 0);
        assert!(w >= 512);
    }

    #[test]
    fn dimensions_are_tile_aligned_and_floored_at_512() {
        assert_eq!(target_dimensions(2048, 1536, 1024), (1024, 768));
        assert_eq!(target_dimensions(1030, 515, 1024), (1024, 512));
        assert_eq!(target_dimensions(600, 300, 1024), (600, 512));
        assert_eq!(target_dimensions(900, 900, 1024), (896, 896));
    }

    #[test]
    fn small_images_are_upscaled_to_the_floor() {
        let normalized = processor().normalize(&png_bytes(64, 64)).unwrap();
        let img = image::load_from_memory(&normalized).unwrap();
        assert_eq!(img.dimensions(), (512, 512));
    }

    #[test]
    fn unreadable_input_is_invalid_image() {
        let err = processor().normalize(b"definitely not an image").unwrap_err();
        assert!(matches!(err, RestyleError::InvalidImage(_)));
    }

    // JPEG-hostile content so the encoded size stays large enough to trip
    // a mid-range ceiling.
    fn noisy_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let n = x.wrapping_mul(7919).wrapping_add(y.wrapping_mul(104_729));
            image::Rgb([(n % 251) as u8, (n % 241) as u8, (n % 239) as u8])
        }));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn ceiling_overrun_succeeds_on_the_aggressive_second_pass() {
        let input = noisy_png_bytes(2048, 2048);

        // Measure the first-pass encode, then pick a ceiling just under it so
        // the 768x768/q75 retry has to run.
        let first_pass = processor().normalize(&input).unwrap();
        let ceiling = first_pass.len() - 1;

        let squeezed = ImageProcessor::with_limits(1024, ceiling, 4 * 1024 * 1024);
        let normalized = squeezed.normalize(&input).unwrap();

        assert!(normalized.len() <= ceiling);
        let img = image::load_from_memory(&normalized).unwrap();
        assert_eq!(img.dimensions(), (768, 768));
    }

    #[test]
    fn impossible_ceiling_fails_with_image_too_large() {
        let tiny_ceiling = ImageProcessor::with_limits(1024, 16, 4 * 1024 * 1024);
        let err = tiny_ceiling.normalize(&png_bytes(2048, 2048)).unwrap_err();
        assert!(matches!(err, RestyleError::ImageTooLarge { limit: 16, .. }));
    }

    #[test]
    fn pre_send_path_returns_original_on_failure() {
        let garbage = b"not an image at all".to_vec();
        assert_eq!(processor().optimize_for_generation(&garbage), garbage);
    }

    #[test]
    fn pre_send_path_downscales_large_images() {
        let optimized = processor().optimize_for_generation(&png_bytes(2000, 1000));
        let img = image::load_from_memory(&optimized).unwrap();
        let (w, h) = img.dimensions();
        assert!(w <= 1024 && h <= 1024);
    }

    #[test]
    fn pre_send_path_leaves_small_images_untouched() {
        let small = png_bytes(800, 600);
        assert_eq!(processor().optimize_for_generation(&small), small);
    }
}
