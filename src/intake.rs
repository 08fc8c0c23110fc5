use crate::error::AppError;
use crate::model::UploadedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageOutputFormat};
use std::io::Cursor;
use std::path::Path;

const PREVIEW_EDGE: u32 = 512;

/// Normalizes user supplied images into the payload the inference client sends.
#[derive(Debug, Clone)]
pub struct ImageIntake {
    max_bytes: usize,
}

impl ImageIntake {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn from_path(&self, path: &Path) -> Result<UploadedImage, AppError> {
        log::debug!("Reading image from {:?}", path);
        let bytes = std::fs::read(path)?;
        let guessed = mime_guess::from_path(path)
            .first()
            .filter(|m| m.type_() == mime::IMAGE);
        log::trace!("Guessed mime type {:?} for {:?}", guessed, path);
        self.from_bytes(&bytes, guessed.as_ref().map(|m| m.essence_str()))
    }

    /// Accepts a pasted `data:image/...;base64,...` URI.
    pub fn from_data_uri(&self, uri: &str) -> Result<UploadedImage, AppError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| AppError::InvalidImage("expected a data: URI".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| AppError::InvalidImage("data URI has no payload".into()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| AppError::InvalidImage("data URI is not base64 encoded".into()))?;

        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| AppError::InvalidImage(format!("bad base64 payload: {}", e)))?;
        self.from_bytes(&bytes, Some(mime_type))
    }

    pub fn from_bytes(
        &self,
        bytes: &[u8],
        declared_mime: Option<&str>,
    ) -> Result<UploadedImage, AppError> {
        if bytes.is_empty() {
            return Err(AppError::InvalidImage("empty payload".into()));
        }
        if bytes.len() > self.max_bytes {
            return Err(AppError::TooLarge { size: bytes.len(), limit: self.max_bytes });
        }

        let mime_type = match declared_mime.filter(|m| !m.trim().is_empty()) {
            Some(declared) => {
                let parsed: mime::Mime = declared
                    .trim()
                    .parse()
                    .map_err(|_| AppError::InvalidImage(format!("unparseable mime type '{}'", declared)))?;
                if parsed.type_() != mime::IMAGE {
                    return Err(AppError::InvalidImage(format!("'{}' is not an image", declared)));
                }
                parsed.essence_str().to_string()
            }
            None => sniff_mime(bytes)?,
        };

        let base64 = STANDARD.encode(bytes);
        let preview = match make_preview(bytes) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("Could not build preview thumbnail, using original: {}", e);
                format!("data:{};base64,{}", mime_type, base64)
            }
        };

        log::info!("Accepted {} image ({} bytes)", mime_type, bytes.len());
        Ok(UploadedImage { base64, mime_type, preview })
    }
}

fn sniff_mime(bytes: &[u8]) -> Result<String, AppError> {
    let format = image::guess_format(bytes)
        .map_err(|e| AppError::InvalidImage(format!("unrecognized image data: {}", e)))?;
    format
        .extensions_str()
        .iter()
        .find_map(|ext| mime_guess::from_ext(ext).first())
        .map(|m| m.essence_str().to_string())
        .ok_or_else(|| AppError::InvalidImage(format!("no mime type for {:?}", format)))
}

fn make_preview(bytes: &[u8]) -> Result<String, AppError> {
    let image = image::load_from_memory(bytes)?;
    let thumbnail = image.thumbnail(PREVIEW_EDGE, PREVIEW_EDGE);
    let rgb = DynamicImage::ImageRgb8(thumbnail.to_rgb8());

    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(80))?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&buf)))
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 6, image::Rgb([30, 120, 60])));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}
