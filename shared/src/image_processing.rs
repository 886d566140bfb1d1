use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageOutputFormat};
use std::io::Cursor;

use crate::cache_control;
use crate::error::TransformError;
use crate::request::ImageParams;
use crate::types::{EffectiveImageConfig, OriginFetchResult, TransformedImage};

const SVG: &str = "image/svg+xml";
const JPEG: &str = "image/jpeg";

/// Pluggable pixel backend. Gets fully materialized source bytes, so
/// implementations do no I/O.
pub trait ImageTransformer: Send + Sync {
    fn transform(
        &self,
        source: &OriginFetchResult,
        params: &ImageParams,
        config: &EffectiveImageConfig,
    ) -> Result<TransformedImage, TransformError>;
}

/// Default backend on the `image` crate.
///
/// Downscales to the requested width and re-encodes. Vector and animated
/// sources pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterTransformer;

impl ImageTransformer for RasterTransformer {
    fn transform(
        &self,
        source: &OriginFetchResult,
        params: &ImageParams,
        config: &EffectiveImageConfig,
    ) -> Result<TransformedImage, TransformError> {
        let max_age = cache_control::max_age(source.cache_control.as_deref());
        let passthrough = |content_type: &str| TransformedImage {
            bytes: source.body.clone(),
            content_type: content_type.to_string(),
            is_static: params.is_static,
            max_age,
        };

        if is_svg(&source.body, source.content_type.as_deref()) {
            if !config.dangerously_allow_svg {
                return Err(TransformError::NotAllowed);
            }
            return Ok(passthrough(SVG));
        }

        let format = match image::guess_format(&source.body) {
            Ok(format) => format,
            Err(_) => return Err(TransformError::InvalidImage),
        };
        let source_type = mime_for(format).ok_or(TransformError::InvalidImage)?;

        if is_animated(format, &source.body) {
            return Ok(passthrough(source_type));
        }

        let img = match image::load_from_memory_with_format(&source.body, format) {
            Ok(img) => img,
            // Recognized but not decodable by this build (AVIF)
            Err(image::ImageError::Unsupported(e)) => {
                tracing::info!("Serving {} unchanged: {}", source_type, e);
                return Ok(passthrough(source_type));
            }
            Err(e) => return Err(TransformError::Decode(e.to_string())),
        };

        // Never enlarge
        let img = if img.width() > params.width {
            img.resize(params.width, img.height(), FilterType::Lanczos3)
        } else {
            img
        };

        let content_type = params
            .mime_type
            .as_deref()
            .filter(|mime| encoder_for(mime, params.quality).is_some())
            .or_else(|| encoder_for(source_type, params.quality).map(|_| source_type))
            .unwrap_or(JPEG);

        let bytes = encode(&img, content_type, params.quality)?;

        Ok(TransformedImage {
            bytes,
            content_type: content_type.to_string(),
            is_static: params.is_static,
            max_age,
        })
    }
}

fn encode(img: &DynamicImage, content_type: &str, quality: u8) -> Result<Vec<u8>, TransformError> {
    let output = encoder_for(content_type, quality)
        .ok_or_else(|| TransformError::Encode(format!("no encoder for {}", content_type)))?;

    // JPEG has no alpha channel
    let img = match output {
        ImageOutputFormat::Jpeg(_) => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img.clone(),
    };

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, output)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn encoder_for(content_type: &str, quality: u8) -> Option<ImageOutputFormat> {
    match content_type {
        "image/jpeg" => Some(ImageOutputFormat::Jpeg(quality)),
        "image/png" => Some(ImageOutputFormat::Png),
        "image/gif" => Some(ImageOutputFormat::Gif),
        "image/bmp" => Some(ImageOutputFormat::Bmp),
        "image/tiff" => Some(ImageOutputFormat::Tiff),
        _ => None,
    }
}

fn mime_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::Avif => Some("image/avif"),
        ImageFormat::Ico => Some("image/x-icon"),
        _ => None,
    }
}

fn is_svg(bytes: &[u8], declared: Option<&str>) -> bool {
    if declared.map_or(false, |ct| ct.starts_with(SVG)) {
        return true;
    }
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

/// Animated GIF/WebP are served as-is
fn is_animated(format: ImageFormat, bytes: &[u8]) -> bool {
    match format {
        ImageFormat::Gif => gif_frame_count(bytes) > 1,
        ImageFormat::WebP => webp_is_animated(bytes),
        _ => false,
    }
}

fn gif_frame_count(bytes: &[u8]) -> usize {
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;

    match GifDecoder::new(Cursor::new(bytes)) {
        Ok(decoder) => decoder.into_frames().take(2).count(),
        Err(_) => 0,
    }
}

/// Only extended (VP8X) WebP can animate; bit 1 of its flags byte says so
fn webp_is_animated(bytes: &[u8]) -> bool {
    const ANIMATION_FLAG: u8 = 0x02;
    bytes.len() > 20 && &bytes[12..16] == b"VP8X" && bytes[20] & ANIMATION_FLAG != 0
}
