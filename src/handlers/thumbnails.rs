//! Thumbnail generation for images referenced by a page.

use std::io::Cursor;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;
use serde_json::{json, Value};

use super::{param_i64, param_str, param_u64, HandlerError, Params, TaskHandler};
use crate::limits::{
    safe_dimension, safe_max_images, safe_quality, safe_timeout, DEFAULT_SCRAPING_TIMEOUT_SECS,
    MAX_IMAGE_BYTES, MAX_IMAGE_DIMENSION, MAX_IMAGE_URLS, MAX_SCRAPING_TIMEOUT_SECS,
    MAX_THUMBNAIL_DIMENSION, USER_AGENT,
};
use crate::protocol::TaskKind;

const DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailFormat {
    #[default]
    Jpeg,
    Png,
}

impl ThumbnailFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailFormat::Jpeg => "jpeg",
            ThumbnailFormat::Png => "png",
        }
    }
}

impl FromStr for ThumbnailFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ThumbnailFormat::Jpeg),
            "png" => Ok(ThumbnailFormat::Png),
            other => anyhow::bail!("Unsupported thumbnail format: {}", other),
        }
    }
}

/// An encoded thumbnail plus the dimensions of its source.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
}

#[derive(Debug, Serialize)]
struct ThumbnailEntry {
    url: String,
    thumbnail: String,
    format: &'static str,
    thumbnail_size: [u32; 2],
    original_info: Value,
}

#[derive(Debug, Serialize)]
struct ThumbnailFailure {
    url: String,
    error: String,
}

/// Decode `bytes`, shrink to fit within `size` keeping aspect ratio and encode.
pub fn make_thumbnail(
    bytes: &[u8],
    size: (u32, u32),
    format: ThumbnailFormat,
    quality: u8,
) -> anyhow::Result<Thumbnail> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let (original_width, original_height) = reader.into_dimensions()?;
    if original_width > MAX_IMAGE_DIMENSION || original_height > MAX_IMAGE_DIMENSION {
        anyhow::bail!(
            "Image too large ({}x{}, max {})",
            original_width,
            original_height,
            MAX_IMAGE_DIMENSION
        );
    }

    let img = image::load_from_memory(bytes)?;
    let thumb = img.thumbnail(size.0, size.1);

    let mut data = Vec::new();
    match format {
        ThumbnailFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(thumb.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut data, quality))?;
        }
        ThumbnailFormat::Png => {
            thumb.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)?;
        }
    }

    Ok(Thumbnail {
        data,
        width: thumb.width(),
        height: thumb.height(),
        original_width,
        original_height,
    })
}

pub struct ThumbnailsHandler {
    client: reqwest::Client,
}

impl ThumbnailsHandler {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn download(&self, url: &str, timeout: Duration) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        if let Some(len) = response.content_length() {
            if len as usize > MAX_IMAGE_BYTES {
                anyhow::bail!("Image too large ({} bytes)", len);
            }
        }
        let bytes = response.bytes().await?;
        if bytes.len() > MAX_IMAGE_BYTES {
            anyhow::bail!("Image too large ({} bytes)", bytes.len());
        }
        Ok(bytes.to_vec())
    }

    async fn process_one(
        &self,
        url: String,
        size: (u32, u32),
        format: ThumbnailFormat,
        quality: u8,
        timeout: Duration,
    ) -> Result<ThumbnailEntry, ThumbnailFailure> {
        let run = async {
            let bytes = self.download(&url, timeout).await?;
            let size_kb = bytes.len() as f64 / 1024.0;
            let thumb = tokio::task::spawn_blocking(move || {
                make_thumbnail(&bytes, size, format, quality)
            })
            .await??;
            anyhow::Ok((thumb, size_kb))
        };

        let outcome = run.await;
        match outcome {
            Ok((thumb, size_kb)) => Ok(ThumbnailEntry {
                url,
                thumbnail: base64::engine::general_purpose::STANDARD.encode(&thumb.data),
                format: format.as_str(),
                thumbnail_size: [thumb.width, thumb.height],
                original_info: json!({
                    "width": thumb.original_width,
                    "height": thumb.original_height,
                    "size_kb": (size_kb * 100.0).round() / 100.0,
                }),
            }),
            Err(e) => {
                tracing::warn!("Thumbnail for {} failed: {}", url, e);
                Err(ThumbnailFailure {
                    url,
                    error: e.to_string(),
                })
            }
        }
    }
}

impl Default for ThumbnailsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for ThumbnailsHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Thumbnails
    }

    async fn execute(&self, _url: &str, params: &Params) -> anyhow::Result<Params> {
        let image_urls: Vec<String> = params
            .get("image_urls")
            .and_then(|v| v.as_array())
            .ok_or(HandlerError::MissingParam("image_urls"))?
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .take(MAX_IMAGE_URLS)
            .map(str::to_string)
            .collect();

        let max_images = safe_max_images(param_i64(params, "max_images"));
        let size = safe_dimension(thumbnail_size_param(params), MAX_THUMBNAIL_DIMENSION);
        let quality = safe_quality(param_i64(params, "quality"));
        let format = match param_str(params, "format") {
            Some(f) => f.parse()?,
            None => ThumbnailFormat::default(),
        };
        let timeout = safe_timeout(
            param_u64(params, "timeout"),
            MAX_SCRAPING_TIMEOUT_SECS,
            DEFAULT_SCRAPING_TIMEOUT_SECS,
        );

        let total_requested = image_urls.len();
        let outcomes: Vec<_> = stream::iter(image_urls.into_iter().take(max_images))
            .map(|url| self.process_one(url, size, format, quality, timeout))
            .buffered(DOWNLOAD_CONCURRENCY)
            .collect()
            .await;

        let mut thumbnails = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(entry) => thumbnails.push(entry),
                Err(failure) => errors.push(failure),
            }
        }

        tracing::info!(
            "Generated {} of {} thumbnails ({}x{} {})",
            thumbnails.len(),
            total_requested,
            size.0,
            size.1,
            format.as_str()
        );

        let mut result = Params::new();
        result.insert("total_processed".into(), json!(thumbnails.len()));
        result.insert("total_requested".into(), json!(total_requested));
        result.insert("thumbnails".into(), serde_json::to_value(&thumbnails)?);
        result.insert("errors".into(), serde_json::to_value(&errors)?);
        Ok(result)
    }
}

fn thumbnail_size_param(params: &Params) -> Option<(i64, i64)> {
    let pair = params.get("thumbnail_size")?.as_array()?;
    match pair.as_slice() {
        [w, h] => Some((w.as_i64()?, h.as_i64()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_thumbnail_keeps_aspect_ratio() {
        let thumb = make_thumbnail(&png_bytes(400, 200), (150, 150), ThumbnailFormat::Jpeg, 85)
            .unwrap();
        assert_eq!((thumb.width, thumb.height), (150, 75));
        assert_eq!((thumb.original_width, thumb.original_height), (400, 200));
        // JPEG SOI marker
        assert_eq!(&thumb.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_png_thumbnail_decodes() {
        let thumb =
            make_thumbnail(&png_bytes(64, 64), (32, 32), ThumbnailFormat::Png, 85).unwrap();
        let decoded = image::load_from_memory(&thumb.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn test_rejects_garbage_and_oversized_images() {
        assert!(make_thumbnail(b"not an image", (10, 10), ThumbnailFormat::Png, 85).is_err());

        let huge = png_bytes(MAX_IMAGE_DIMENSION + 1, 1);
        let err = make_thumbnail(&huge, (10, 10), ThumbnailFormat::Png, 85).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JPG".parse::<ThumbnailFormat>().unwrap(), ThumbnailFormat::Jpeg);
        assert_eq!("png".parse::<ThumbnailFormat>().unwrap(), ThumbnailFormat::Png);
        assert!("bmp".parse::<ThumbnailFormat>().is_err());
    }

    #[test]
    fn test_thumbnail_size_param() {
        let params = json!({"thumbnail_size": [300, 200]});
        assert_eq!(thumbnail_size_param(params.as_object().unwrap()), Some((300, 200)));
        let params = json!({"thumbnail_size": [300]});
        assert_eq!(thumbnail_size_param(params.as_object().unwrap()), None);
    }

    #[tokio::test]
    async fn test_missing_image_urls_is_error() {
        let handler = ThumbnailsHandler::new();
        let err = handler
            .execute("https://example.com", &Params::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image_urls"));
    }

    #[tokio::test]
    async fn test_empty_image_list_succeeds() {
        let handler = ThumbnailsHandler::new();
        let params = json!({"image_urls": []});
        let result = handler
            .execute("https://example.com", params.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(result["total_requested"], 0);
        assert_eq!(result["total_processed"], 0);
        assert_eq!(result["thumbnails"], json!([]));
    }
}
