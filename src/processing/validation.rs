//! Input validation ahead of any decode work

use tracing::debug;

use crate::config::{ImageFormat, ProcessingConfig};
use crate::error::{PressError, Result};
use crate::processing::formats::{read_dimensions, sniff_format};
use crate::processing::ImageInput;

/// Checks encoded inputs against size, format and dimension limits
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_input_bytes: u64,
    max_dimension: u32,
}

/// Facts established while validating an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedInput {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ImageValidator {
    /// Create a new image validator with default limits
    pub fn new() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            max_input_bytes: config.max_input_bytes,
            max_dimension: config.max_dimension,
        }
    }

    /// Create a validator with custom limits
    pub fn with_limits(max_input_bytes: u64, max_dimension: u32) -> Self {
        Self {
            max_input_bytes,
            max_dimension,
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Sniff the format and read the header; pixels are not decoded
    pub fn validate(&self, input: &ImageInput) -> Result<ValidatedInput> {
        let size = input.len() as u64;
        if size == 0 {
            return Err(PressError::decode(format!("{} is empty", input.filename)));
        }
        if size > self.max_input_bytes {
            return Err(PressError::invalid_parameters(format!(
                "{} is {} bytes, limit is {} bytes",
                input.filename, size, self.max_input_bytes
            )));
        }

        let format = sniff_format(input.data(), Some(&input.filename))?;
        let (width, height) = read_dimensions(input.data(), format)?;
        self.validate_dimensions(width, height)?;

        debug!(
            filename = %input.filename,
            format = %format,
            width,
            height,
            "input validated"
        );
        Ok(ValidatedInput {
            format,
            width,
            height,
        })
    }

    /// Check dimensions against the hard ceiling
    pub fn validate_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PressError::decode(format!(
                "image reports zero dimension {width}x{height}"
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(PressError::dimension(width, height, self.max_dimension));
        }
        Ok(())
    }
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::formats::encode;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn png_input(width: u32, height: u32) -> ImageInput {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([10, 20, 30])));
        ImageInput::new("sample.png", encode(&img, ImageFormat::Png, 80).unwrap())
    }

    #[test]
    fn test_valid_input() {
        let validated = ImageValidator::new().validate(&png_input(40, 30)).unwrap();
        assert_eq!(validated.format, ImageFormat::Png);
        assert_eq!((validated.width, validated.height), (40, 30));
    }

    #[test]
    fn test_empty_input() {
        let input = ImageInput::new("empty.jpg", Vec::new());
        assert!(matches!(
            ImageValidator::new().validate(&input),
            Err(PressError::Decode { .. })
        ));
    }

    #[test]
    fn test_dimension_ceiling() {
        let validator = ImageValidator::with_limits(1024 * 1024, 32);
        assert!(matches!(
            validator.validate(&png_input(40, 10)),
            Err(PressError::Dimension { width: 40, height: 10, limit: 32 })
        ));
        assert!(validator.validate(&png_input(32, 32)).is_ok());
        assert!(ImageValidator::new().validate_dimensions(8000, 8000).is_ok());
        assert!(ImageValidator::new().validate_dimensions(8001, 10).is_err());
    }

    #[test]
    fn test_input_size_limit() {
        let validator = ImageValidator::with_limits(16, 8000);
        assert!(matches!(
            validator.validate(&png_input(10, 10)),
            Err(PressError::InvalidParameters { .. })
        ));
    }
}
