//! `ImageCodec` (spec.md §2) — the external decode/resize/encode
//! collaborator. Format detection, the `smart_fit` resize mode (§4.4 step
//! 4: preserve aspect ratio, fit within the box) and re-encoding in the
//! original format live here.

use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::{gif::GifEncoder, jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder};
use image::{DynamicImage, ImageEncoder, ImageFormat};
use resizr_util::Error;

use crate::image_record::MimeType;

#[async_trait]
pub trait ImageCodec: Send + Sync {
    /// Detects format and decodes dimensions without a full resize.
    /// `Err(Error::Processing(_))` for anything that isn't one of the four
    /// supported formats or fails to decode (§4.3 step 1).
    async fn identify(&self, bytes: &[u8]) -> Result<(MimeType, u32, u32), Error>;

    /// Resizes to fit within `(width, height)` (aspect preserved, the
    /// `smart_fit` mode) and re-encodes in `mime_type` at `quality` (JPEG
    /// and WebP only; ignored for PNG/GIF).
    async fn resize_and_encode(
        &self,
        bytes: &[u8],
        mime_type: MimeType,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Vec<u8>, Error>;
}

pub struct ImageRsCodec;

fn mime_from_format(format: ImageFormat) -> Result<MimeType, Error> {
    match format {
        ImageFormat::Jpeg => Ok(MimeType::Jpeg),
        ImageFormat::Png => Ok(MimeType::Png),
        ImageFormat::Gif => Ok(MimeType::Gif),
        ImageFormat::WebP => Ok(MimeType::Webp),
        other => Err(Error::Processing(format!(
            "unsupported image format: {:?}",
            other
        ))),
    }
}

fn encode(image: &DynamicImage, mime_type: MimeType, quality: u8) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    match mime_type {
        MimeType::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut cursor, quality)
                .encode(&rgb, rgb.width(), rgb.height(), image::ColorType::Rgb8)
                .map_err(|e| Error::Processing(format!("jpeg encode: {}", e)))?;
        }
        MimeType::Png => {
            let rgba = image.to_rgba8();
            PngEncoder::new(&mut cursor)
                .write_image(&rgba, rgba.width(), rgba.height(), image::ColorType::Rgba8)
                .map_err(|e| Error::Processing(format!("png encode: {}", e)))?;
        }
        MimeType::Gif => {
            let rgba = image.to_rgba8();
            let mut encoder = GifEncoder::new(&mut cursor);
            encoder
                .encode(&rgba, rgba.width(), rgba.height(), image::ColorType::Rgba8)
                .map_err(|e| Error::Processing(format!("gif encode: {}", e)))?;
        }
        MimeType::Webp => {
            let rgba = image.to_rgba8();
            WebPEncoder::new_lossless(&mut cursor)
                .encode(&rgba, rgba.width(), rgba.height(), image::ColorType::Rgba8)
                .map_err(|e| Error::Processing(format!("webp encode: {}", e)))?;
        }
    }
    Ok(out)
}

#[async_trait]
impl ImageCodec for ImageRsCodec {
    async fn identify(&self, bytes: &[u8]) -> Result<(MimeType, u32, u32), Error> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let format = image::guess_format(&bytes)
                .map_err(|e| Error::Processing(format!("unrecognized image data: {}", e)))?;
            let mime_type = mime_from_format(format)?;
            let image = image::load_from_memory_with_format(&bytes, format)
                .map_err(|e| Error::Processing(format!("decoding image: {}", e)))?;
            Ok((mime_type, image.width(), image.height()))
        })
        .await
        .map_err(|e| Error::Internal(format!("identify task panicked: {}", e)))?
    }

    async fn resize_and_encode(
        &self,
        bytes: &[u8],
        mime_type: MimeType,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Vec<u8>, Error> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes)
                .map_err(|e| Error::Processing(format!("decoding image: {}", e)))?;
            // `resize` (as opposed to `resize_exact`) preserves aspect
            // ratio and fits within the box: the `smart_fit` mode of
            // spec.md §4.4 step 4.
            let resized = image.resize(width, height, image::imageops::FilterType::Lanczos3);
            encode(&resized, mime_type, quality)
        })
        .await
        .map_err(|e| Error::Internal(format!("resize task panicked: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let image = DynamicImage::new_rgb8(100, 80);
        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn identify_reports_dimensions_and_format() {
        let codec = ImageRsCodec;
        let (mime, w, h) = codec.identify(&tiny_png()).await.unwrap();
        assert_eq!(mime, MimeType::Png);
        assert_eq!((w, h), (100, 80));
    }

    #[tokio::test]
    async fn resize_fits_within_box_preserving_aspect() {
        let codec = ImageRsCodec;
        let resized = codec
            .resize_and_encode(&tiny_png(), MimeType::Png, 150, 150, 85)
            .await
            .unwrap();
        let (_, w, h) = codec.identify(&resized).await.unwrap();
        assert!(w <= 150 && h <= 150);
        // 100x80 into a 150x150 box scales up to 150x120 (aspect preserved).
        assert_eq!((w, h), (150, 120));
    }

    #[tokio::test]
    async fn identify_rejects_garbage() {
        let codec = ImageRsCodec;
        assert!(codec.identify(b"not an image").await.is_err());
    }
}
