use std::path::Path;

use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::DynamicImage;
use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::{quality_percent, TargetFormat};

/// Encoder knobs after the advisor has had its say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: TargetFormat,
    pub lossless: bool,
    /// Adjusted compression speed, 1..=10.
    pub speed: u8,
}

/// Replace the final extension of `original` with the target's.
/// A name with no extension gets one appended.
pub fn output_file_name(original: &str, format: TargetFormat) -> String {
    let stem = match original.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => original,
    };
    format!("{}.{}", stem, format.extension())
}

pub async fn read_source(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| Error::io(path, e))
}

/// Decode any supported input; the format is sniffed from content.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(bytes)?;
    debug!(width = img.width(), height = img.height(), "decoded source image");
    Ok(img)
}

fn png_compression(speed: u8) -> CompressionType {
    match speed {
        0..=3 => CompressionType::Best,
        8.. => CompressionType::Fast,
        _ => CompressionType::Default,
    }
}

/// Re-encode a decoded image. The output carries no embedded metadata.
pub fn encode(img: &DynamicImage, options: EncodeOptions) -> Result<Vec<u8>> {
    let quality = quality_percent(options.speed);
    let mut buf = Vec::new();

    match options.format {
        TargetFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
        TargetFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buf, png_compression(options.speed), FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        TargetFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            let encoder = webp::Encoder::from_image(&rgba).map_err(|e| Error::Conversion(e.to_string()))?;
            let memory = if options.lossless {
                encoder.encode_lossless()
            } else {
                encoder.encode(f32::from(quality))
            };
            buf.extend_from_slice(&memory);
        }
        TargetFormat::Avif => {
            let quality = if options.lossless { 100 } else { quality };
            let speed = options.speed.clamp(1, 10);
            let pixels = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            pixels.write_with_encoder(AvifEncoder::new_with_speed_quality(&mut buf, speed, quality))?;
        }
    }

    if buf.is_empty() {
        return Err(Error::Conversion(format!("{} encoder produced no data", options.format)));
    }
    Ok(buf)
}

/// Run a CPU-bound step on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Conversion(format!("encoder task failed: {e}")))?
}
