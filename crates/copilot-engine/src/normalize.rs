use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::CopilotError;

pub const SUPPORTED_UPLOAD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub jpeg_quality: u8,
    /// Longest side in pixels; larger images are downscaled.
    pub max_dimension: Option<u32>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_dimension: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    base64: String,
}

impl EncodedImage {
    pub fn as_base64(&self) -> &str {
        &self.base64
    }

    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.base64)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("base64_len", &self.base64.len())
            .finish()
    }
}

pub fn is_supported_upload(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            SUPPORTED_UPLOAD_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

pub fn ensure_supported_upload(file_name: &str) -> Result<(), CopilotError> {
    if is_supported_upload(file_name) {
        return Ok(());
    }
    Err(CopilotError::UnsupportedUpload {
        file_name: file_name.to_string(),
    })
}

pub fn normalize_image(
    bytes: &[u8],
    options: &NormalizeOptions,
) -> Result<EncodedImage, CopilotError> {
    let jpeg = encode_jpeg(bytes, options)?;
    Ok(EncodedImage {
        base64: BASE64.encode(jpeg),
    })
}

pub fn encode_jpeg(bytes: &[u8], options: &NormalizeOptions) -> Result<Vec<u8>, CopilotError> {
    let decoded = image::load_from_memory(bytes).map_err(CopilotError::ImageDecode)?;
    let mut rgb = flatten_to_rgb(&decoded);
    if let Some(max_dim) = options.max_dimension {
        let max_dim = max_dim.max(1);
        if rgb.width() > max_dim || rgb.height() > max_dim {
            rgb = DynamicImage::ImageRgb8(rgb)
                .resize(max_dim, max_dim, FilterType::Triangle)
                .to_rgb8();
        }
    }

    let mut out = Vec::new();
    let quality = options.jpeg_quality.clamp(1, 100);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .map_err(CopilotError::ImageEncode)?;
    Ok(out)
}

/// Drops alpha by compositing over white. Palette images arrive here already
/// expanded to RGB or RGBA by the decoder.
fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}
