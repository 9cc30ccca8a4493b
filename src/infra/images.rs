//! Image re-encoding: orientation is baked in, metadata is dropped, variants are resized.

use std::io::Cursor;

use image::{
    DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use thiserror::Error;

const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("unsupported image type `{0}`")]
    Unsupported(String),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Re-encoded bytes. `None` keeps the upload as it arrived.
    pub bytes: Option<Vec<u8>>,
    pub dimensions: Option<(u32, u32)>,
    /// Whether resized variants can be derived from `bytes`.
    pub resizable: bool,
}

impl ProcessedImage {
    fn kept(dimensions: Option<(u32, u32)>) -> Self {
        Self {
            bytes: None,
            dimensions,
            resizable: false,
        }
    }
}

fn format_for(content_type: &str) -> Option<ImageFormat> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        other => ImageFormat::from_mime_type(other),
    }
}

fn decode_oriented(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, ImageProcessingError> {
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format)
        .into_decoder()
        .map_err(ImageProcessingError::Decode)?;
    let orientation = decoder.orientation().map_err(ImageProcessingError::Decode)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(ImageProcessingError::Decode)?;
    image.apply_orientation(orientation);
    Ok(image)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImageProcessingError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
                .encode_image(&rgb)
                .map_err(ImageProcessingError::Encode)?;
        }
        other => image
            .write_to(&mut out, other)
            .map_err(ImageProcessingError::Encode)?,
    }
    Ok(out.into_inner())
}

/// Decode, auto-orient and re-encode without metadata.
///
/// GIFs pass through untouched. Types the decoder does not know are kept as uploaded,
/// and formats it can read but not write keep their bytes with dimensions filled in.
pub fn reencode(bytes: &[u8], content_type: &str) -> Result<ProcessedImage, ImageProcessingError> {
    let Some(format) = format_for(content_type).filter(ImageFormat::reading_enabled) else {
        return Ok(ProcessedImage::kept(None));
    };

    if format == ImageFormat::Gif {
        let dimensions = ImageReader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(ImageProcessingError::Decode)?;
        return Ok(ProcessedImage::kept(Some(dimensions)));
    }

    let image = match decode_oriented(bytes, format) {
        Ok(image) => image,
        // The format is known but its decoder is not built in.
        Err(ImageProcessingError::Decode(ImageError::Unsupported(_))) => {
            return Ok(ProcessedImage::kept(None));
        }
        Err(err) => return Err(err),
    };
    let dimensions = Some((image.width(), image.height()));
    if !format.writing_enabled() {
        return Ok(ProcessedImage::kept(dimensions));
    }
    match encode(&image, format) {
        Ok(encoded) => Ok(ProcessedImage {
            bytes: Some(encoded),
            dimensions,
            resizable: true,
        }),
        // Some encoders refuse particular color types or sizes.
        Err(ImageProcessingError::Encode(ImageError::Unsupported(_))) => {
            Ok(ProcessedImage::kept(dimensions))
        }
        Err(err) => Err(err),
    }
}

/// Shrink so the longest edge is at most `max_dimension`. Smaller images are re-encoded as is.
pub fn resize_to_fit(
    bytes: &[u8],
    content_type: &str,
    max_dimension: u32,
) -> Result<Vec<u8>, ImageProcessingError> {
    let format = format_for(content_type)
        .ok_or_else(|| ImageProcessingError::Unsupported(content_type.to_string()))?;
    let image = decode_oriented(bytes, format)?;
    let resized = if image.width() > max_dimension || image.height() > max_dimension {
        image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        image
    };
    encode(&resized, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(buffer)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn reencodes_png_and_reports_dimensions() {
        let processed = reencode(&sample_png(40, 30), "image/png").expect("reencode");
        assert_eq!(processed.dimensions, Some((40, 30)));
        assert!(processed.resizable);
        assert!(processed.bytes.is_some_and(|bytes| !bytes.is_empty()));
    }

    #[test]
    fn jpeg_output_decodes() {
        let processed = reencode(&sample_png(16, 16), "image/png").expect("png");
        let bytes = processed.bytes.expect("reencoded");
        let png = image::load_from_memory(&bytes).expect("decode");
        let mut jpeg = Cursor::new(Vec::new());
        png.write_to(&mut jpeg, ImageFormat::Jpeg).expect("jpeg");

        let again = reencode(&jpeg.into_inner(), "image/pjpeg").expect("reencode jpeg");
        assert_eq!(again.dimensions, Some((16, 16)));
    }

    #[test]
    fn resize_keeps_aspect_ratio_within_bound() {
        let resized = resize_to_fit(&sample_png(400, 200), "image/png", 200).expect("resize");
        let decoded = image::load_from_memory(&resized).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn bmp_is_reencoded() {
        let mut bmp = Cursor::new(Vec::new());
        image::load_from_memory(&sample_png(12, 8))
            .expect("decode")
            .write_to(&mut bmp, ImageFormat::Bmp)
            .expect("bmp");

        let processed = reencode(&bmp.into_inner(), "image/bmp").expect("reencode bmp");
        assert_eq!(processed.dimensions, Some((12, 8)));
        assert!(processed.resizable);
    }

    #[test]
    fn undecodable_types_are_kept_as_uploaded() {
        for content_type in ["image/svg+xml", "image/heic", "image/x-unknown"] {
            let processed = reencode(b"<svg/>", content_type).expect(content_type);
            assert!(processed.bytes.is_none(), "{content_type}");
            assert_eq!(processed.dimensions, None);
            assert!(!processed.resizable);
        }
    }
}
