//! Image encoder: reads a user-selected file into an [`EncodedImage`].
//!
//! No pixel processing happens here. The bytes are only sniffed to pick a
//! MIME type, then base64-encoded as-is.

use crate::types::EncodedImage;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// MIME type declared when neither the content nor the extension identifies the format.
pub const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image is empty")]
    Empty,
    #[error("malformed data URI: {0}")]
    Malformed(String),
}

/// Read an image file and encode it as a data URI.
pub async fn encode(path: impl AsRef<Path>) -> Result<EncodedImage, EncodeError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|source| EncodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() {
        return Err(EncodeError::Empty);
    }

    let mime = detect_mime(&bytes, Some(path));
    tracing::debug!(path = %path.display(), bytes = bytes.len(), mime, "image encoded");

    Ok(EncodedImage::from_bytes(&bytes, mime))
}

/// Pick a MIME type: magic bytes first, then file extension, then JPEG.
pub fn detect_mime(bytes: &[u8], path: Option<&Path>) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .or_else(|| path.and_then(|p| ImageFormat::from_path(p).ok()))
        .map(|format| format.to_mime_type())
        .unwrap_or(FALLBACK_MIME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn sample_image(format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_encode_jpeg_round_trip() {
        let bytes = sample_image(ImageFormat::Jpeg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me.jpg");
        std::fs::write(&path, &bytes).unwrap();

        let encoded = encode(&path).await.unwrap();
        let uri = encoded.to_data_uri();
        assert!(uri.starts_with("data:image/jpeg;base64,"), "got {uri}");
        assert_eq!(encoded.decode(), bytes);

        let reparsed = EncodedImage::parse(&uri).unwrap();
        assert_eq!(reparsed, encoded);
    }

    #[tokio::test]
    async fn test_encode_detects_png_content() {
        // Extension lies; content wins.
        let bytes = sample_image(ImageFormat::Png);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, &bytes).unwrap();

        let encoded = encode(&path).await.unwrap();
        assert_eq!(encoded.mime(), "image/png");
    }

    #[tokio::test]
    async fn test_encode_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = encode(dir.path().join("nope.jpg")).await.unwrap_err();
        assert!(matches!(err, EncodeError::Io { .. }));
    }

    #[tokio::test]
    async fn test_encode_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(encode(&path).await, Err(EncodeError::Empty)));
    }

    #[test]
    fn test_detect_mime_fallbacks() {
        assert_eq!(detect_mime(b"not an image", Some(Path::new("a.webp"))), "image/webp");
        assert_eq!(detect_mime(b"not an image", Some(Path::new("a.bin"))), FALLBACK_MIME);
        assert_eq!(detect_mime(b"not an image", None), FALLBACK_MIME);
    }
}
