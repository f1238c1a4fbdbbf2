use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MIN_COMPRESSION_SPEED: u8 = 1;
pub const MAX_COMPRESSION_SPEED: u8 = 10;
pub const MIN_FILE_SIZE_KB: u32 = 10;
pub const MAX_FILE_SIZE_KB: u32 = 10_000;

/// Output container for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetFormat {
    Webp,
    Png,
    Jpeg,
    Avif,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 4] = [
        TargetFormat::Webp,
        TargetFormat::Png,
        TargetFormat::Jpeg,
        TargetFormat::Avif,
    ];

    /// Lowercased format name, used as the output file extension.
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Webp => "webp",
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpeg",
            TargetFormat::Avif => "avif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            TargetFormat::Webp => "image/webp",
            TargetFormat::Png => "image/png",
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Avif => "image/avif",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetFormat::Webp => "WEBP",
            TargetFormat::Png => "PNG",
            TargetFormat::Jpeg => "JPEG",
            TargetFormat::Avif => "AVIF",
        };
        f.write_str(name)
    }
}

impl FromStr for TargetFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WEBP" => Ok(TargetFormat::Webp),
            "PNG" => Ok(TargetFormat::Png),
            "JPEG" | "JPG" => Ok(TargetFormat::Jpeg),
            "AVIF" => Ok(TargetFormat::Avif),
            other => Err(Error::Validation(format!(
                "targetFormat must be one of WEBP, PNG, JPEG, AVIF (got {other:?})"
            ))),
        }
    }
}

fn default_compression_speed() -> u8 {
    5
}

fn default_strip_metadata() -> bool {
    true
}

fn default_max_file_size_kb() -> u32 {
    1024
}

/// Per-file conversion settings, copied by value onto each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSettings {
    pub target_format: TargetFormat,
    #[serde(default)]
    pub lossless: bool,
    /// 1 = slowest / highest quality, 10 = fastest.
    #[serde(default = "default_compression_speed")]
    pub compression_speed: u8,
    #[serde(default = "default_strip_metadata")]
    pub strip_metadata: bool,
    #[serde(default = "default_max_file_size_kb", rename = "maxFileSizeKB")]
    pub max_file_size_kb: u32,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            target_format: TargetFormat::Webp,
            lossless: false,
            compression_speed: default_compression_speed(),
            strip_metadata: default_strip_metadata(),
            max_file_size_kb: default_max_file_size_kb(),
        }
    }
}

impl ConversionSettings {
    pub fn validate(&self) -> Result<()> {
        validate_compression_speed("compressionSpeed", self.compression_speed)?;
        validate_max_file_size(self.max_file_size_kb)
    }
}

pub(crate) fn validate_compression_speed(field: &str, speed: u8) -> Result<()> {
    if !(MIN_COMPRESSION_SPEED..=MAX_COMPRESSION_SPEED).contains(&speed) {
        return Err(Error::Validation(format!(
            "{field} must be between {MIN_COMPRESSION_SPEED} and {MAX_COMPRESSION_SPEED} (got {speed})"
        )));
    }
    Ok(())
}

pub(crate) fn validate_max_file_size(kb: u32) -> Result<()> {
    if !(MIN_FILE_SIZE_KB..=MAX_FILE_SIZE_KB).contains(&kb) {
        return Err(Error::Validation(format!(
            "maxFileSizeKB must be between {MIN_FILE_SIZE_KB} and {MAX_FILE_SIZE_KB} (got {kb})"
        )));
    }
    Ok(())
}

/// Encoder quality on a 0-1 scale: `(11 - speed) / 10`.
/// Speed is clamped to the valid range first.
pub fn quality_for_speed(speed: u8) -> f32 {
    let speed = speed.clamp(MIN_COMPRESSION_SPEED, MAX_COMPRESSION_SPEED);
    f32::from(11 - speed) / 10.0
}

/// Same mapping as [`quality_for_speed`], as an integer percentage (10..=100).
pub fn quality_percent(speed: u8) -> u8 {
    let speed = speed.clamp(MIN_COMPRESSION_SPEED, MAX_COMPRESSION_SPEED);
    (11 - speed) * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_mapping() {
        assert_eq!(quality_for_speed(1), 1.0);
        assert!((quality_for_speed(10) - 0.1).abs() < f32::EPSILON);
        for speed in 1..=10u8 {
            let expected = (11.0 - f32::from(speed)) / 10.0;
            assert!((quality_for_speed(speed) - expected).abs() < 1e-6);
            assert_eq!(quality_percent(speed), (11 - speed) * 10);
        }
        for speed in 1..10u8 {
            assert!(quality_for_speed(speed) > quality_for_speed(speed + 1));
        }
    }

    #[test]
    fn test_validate_ranges() {
        assert!(ConversionSettings::default().validate().is_ok());

        let mut s = ConversionSettings::default();
        s.compression_speed = 0;
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
        s.compression_speed = 11;
        assert!(s.validate().is_err());

        let mut s = ConversionSettings::default();
        s.max_file_size_kb = 9;
        assert!(s.validate().is_err());
        s.max_file_size_kb = 10_001;
        assert!(s.validate().is_err());
        s.max_file_size_kb = 10;
        assert!(s.validate().is_ok());
        s.max_file_size_kb = 10_000;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{"targetFormat":"PNG","lossless":true,"compressionSpeed":3,"stripMetadata":false,"maxFileSizeKB":500}"#;
        let s: ConversionSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.target_format, TargetFormat::Png);
        assert!(s.lossless);
        assert_eq!(s.compression_speed, 3);
        assert!(!s.strip_metadata);
        assert_eq!(s.max_file_size_kb, 500);

        let back = serde_json::to_value(s).unwrap();
        assert_eq!(back["maxFileSizeKB"], 500);
        assert_eq!(back["targetFormat"], "PNG");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("webp".parse::<TargetFormat>().unwrap(), TargetFormat::Webp);
        assert_eq!("JPG".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert!("gif".parse::<TargetFormat>().is_err());
        assert_eq!(TargetFormat::Avif.extension(), "avif");
        assert_eq!(TargetFormat::Jpeg.to_string(), "JPEG");
    }
}
