//! Bitmap decode, resize and encode.
//!
//! Everything here is CPU-bound; callers run it inside `spawn_blocking`.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Limits};
use thiserror::Error;

use crate::config::SizeDescriptor;

/// Largest upload we attempt to decode (20 MB)
const MAX_SOURCE_BYTES: usize = 20 * 1024 * 1024;

/// Decompression-bomb guard on either axis
const MAX_DIMENSION: u32 = 16384;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Source too large to decode: {0} bytes")]
    TooLarge(usize),
    #[error("Image decode failed: {0}")]
    Decode(String),
    #[error("Image resize failed: {0}")]
    Resize(String),
    #[error("Image encode failed: {0}")]
    Encode(String),
    #[error("Image task failed: {0}")]
    Task(String),
}

/// Output format of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeFormat {
    Jpeg,
    Png,
    WebP,
}

impl EncodeFormat {
    /// Format for an upload's original extension; anything unrecognised becomes JPEG
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Self::Png,
            "webp" => Self::WebP,
            _ => Self::Jpeg,
        }
    }

    /// Extension written into stored filenames (`jpeg` is stored as `jpg`)
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }
}

/// One encoded variant and the dimensions it was rendered at
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Image operations the Variant Processor depends on
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError>;

    /// Scale to fit inside `width` x `height`, keeping the aspect ratio
    fn resize(&self, image: &DynamicImage, width: u32, height: u32)
        -> Result<DynamicImage, CodecError>;

    /// Scale and center-crop to exactly `width` x `height`
    fn fit(&self, image: &DynamicImage, width: u32, height: u32)
        -> Result<DynamicImage, CodecError>;

    fn encode(
        &self,
        image: &DynamicImage,
        format: EncodeFormat,
        quality: u8,
    ) -> Result<Vec<u8>, CodecError>;

    fn dimensions(&self, image: &DynamicImage) -> (u32, u32) {
        image.dimensions()
    }

    /// Produce the variant `descriptor` asks for
    fn render(
        &self,
        image: &DynamicImage,
        descriptor: &SizeDescriptor,
        format: EncodeFormat,
        quality: u8,
    ) -> Result<RenderedImage, CodecError> {
        let resized;
        let output = match descriptor {
            SizeDescriptor::FullSize => image,
            SizeDescriptor::Dimensions {
                width,
                height,
                crop: true,
            } => {
                resized = self.fit(image, *width, *height)?;
                &resized
            }
            SizeDescriptor::Dimensions {
                width,
                height,
                crop: false,
            } => {
                resized = self.resize(image, *width, *height)?;
                &resized
            }
            SizeDescriptor::Tag(tag) => {
                return Err(CodecError::Resize(format!(
                    "no render rule for size tag '{tag}'"
                )))
            }
        };

        let (width, height) = self.dimensions(output);
        let bytes = self.encode(output, format, quality)?;
        Ok(RenderedImage {
            bytes,
            width,
            height,
        })
    }
}

/// [`ImageCodec`] on top of the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct RasterCodec {
    filter: FilterType,
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl RasterCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        if bytes.len() > MAX_SOURCE_BYTES {
            return Err(CodecError::TooLarge(bytes.len()));
        }

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_DIMENSION);
        limits.max_image_height = Some(MAX_DIMENSION);
        reader.limits(limits);

        reader
            .decode()
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::Resize(format!("target {width}x{height} is empty")));
        }
        Ok(image.resize(width, height, self.filter))
    }

    fn fit(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::Resize(format!("target {width}x{height} is empty")));
        }
        Ok(image.resize_to_fill(width, height, self.filter))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: EncodeFormat,
        quality: u8,
    ) -> Result<Vec<u8>, CodecError> {
        let mut buf = Cursor::new(Vec::new());
        match format {
            EncodeFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
                rgb.write_with_encoder(encoder)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
            }
            EncodeFormat::Png => {
                image
                    .write_to(&mut buf, ImageFormat::Png)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
            }
            EncodeFormat::WebP => {
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_to(&mut buf, ImageFormat::WebP)
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
            }
        }
        Ok(buf.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a solid-color PNG in memory
    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgba8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(EncodeFormat::from_extension("JPEG"), EncodeFormat::Jpeg);
        assert_eq!(EncodeFormat::from_extension("jpeg").extension(), "jpg");
        assert_eq!(EncodeFormat::from_extension(".png"), EncodeFormat::Png);
        assert_eq!(EncodeFormat::from_extension("webp"), EncodeFormat::WebP);
        assert_eq!(EncodeFormat::from_extension("gif"), EncodeFormat::Jpeg);
        assert_eq!(EncodeFormat::from_extension(""), EncodeFormat::Jpeg);
    }

    #[test]
    fn crop_renders_exact_box() {
        let codec = RasterCodec::new();
        let image = codec.decode(&create_test_png(800, 600)).unwrap();

        let descriptor = SizeDescriptor::Dimensions {
            width: 300,
            height: 200,
            crop: true,
        };
        let out = codec.render(&image, &descriptor, EncodeFormat::Jpeg, 80).unwrap();
        assert_eq!((out.width, out.height), (300, 200));

        let decoded = codec.decode(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (300, 200));
    }

    #[test]
    fn bounded_resize_keeps_aspect_ratio() {
        let codec = RasterCodec::new();
        let image = codec.decode(&create_test_png(800, 600)).unwrap();

        let descriptor = SizeDescriptor::Dimensions {
            width: 400,
            height: 400,
            crop: false,
        };
        let out = codec.render(&image, &descriptor, EncodeFormat::Png, 80).unwrap();
        assert_eq!((out.width, out.height), (400, 300));
    }

    #[test]
    fn fullsize_keeps_source_dimensions() {
        let codec = RasterCodec::new();
        let image = codec.decode(&create_test_png(64, 48)).unwrap();

        let out = codec
            .render(&image, &SizeDescriptor::FullSize, EncodeFormat::WebP, 80)
            .unwrap();
        assert_eq!((out.width, out.height), (64, 48));
        assert_eq!(
            image::guess_format(&out.bytes).unwrap(),
            ImageFormat::WebP
        );
    }

    #[test]
    fn garbage_fails_to_decode() {
        let codec = RasterCodec::new();
        assert!(matches!(
            codec.decode(b"definitely not an image"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn tags_cannot_be_rendered() {
        let codec = RasterCodec::new();
        let image = DynamicImage::new_rgb8(4, 4);
        let err = codec
            .render(&image, &SizeDescriptor::Tag("banner".into()), EncodeFormat::Jpeg, 80)
            .unwrap_err();
        assert!(matches!(err, CodecError::Resize(_)));
    }
}
