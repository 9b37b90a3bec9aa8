use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};

/// Decode a captured image and re-encode it as a JPEG no larger than `max_dimension` on
/// either side.
pub fn encode_preview(bytes: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("captured frame is not a decodable image")?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.thumbnail(max_dimension, max_dimension)
    } else {
        img
    };

    encode_jpeg(&img.to_rgb8(), quality)
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .context("jpeg encoding failed")?;
    Ok(out)
}

/// Synthetic test card: horizontal gradient rolled by `shift` pixels.
pub fn gradient_frame(width: u32, height: u32, shift: u32) -> Result<Vec<u8>> {
    let width = width.max(2);
    let height = height.max(2);
    let img = RgbImage::from_fn(width, height, |x, y| {
        let col = (x + shift) % width;
        let r = (col * 255 / (width - 1)) as u8;
        let b = (y * 255 / (height - 1)) as u8;
        Rgb([r, 255 - r, b])
    });
    encode_jpeg(&img, 85)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_frames_are_downscaled() {
        let source = gradient_frame(1280, 720, 0).unwrap();
        let preview = encode_preview(&source, 320, 80).unwrap();
        let decoded = image::load_from_memory(&preview).unwrap();
        assert!(decoded.width() <= 320);
        assert!(decoded.height() <= 320);
    }

    #[test]
    fn small_frames_keep_dimensions() {
        let source = gradient_frame(64, 48, 3).unwrap();
        let preview = encode_preview(&source, 640, 80).unwrap();
        let decoded = image::load_from_memory(&preview).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(encode_preview(b"not an image", 640, 80).is_err());
    }
}
