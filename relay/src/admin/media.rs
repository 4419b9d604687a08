//! Image uploads: original kept on disk plus a 400x300 centre-cropped thumbnail.

use std::path::Path;

use image::imageops::FilterType;
use image::ImageFormat;
use uuid::Uuid;

use super::store::NewMedia;
use crate::error::RelayError;

pub const THUMBNAIL_WIDTH: u32 = 400;
pub const THUMBNAIL_HEIGHT: u32 = 300;

/// Decode, store and thumbnail one upload. Blocking; run off the async runtime.
pub fn store_upload(
    media_dir: &Path,
    original_name: &str,
    alt: Option<String>,
    data: &[u8],
) -> Result<NewMedia, RelayError> {
    if data.is_empty() {
        return Err(RelayError::BadRequest("empty upload".into()));
    }

    let format = image::guess_format(data)?;
    let decoded = image::load_from_memory_with_format(data, format)?;
    let ext = extension(format);
    let thumb_format = thumbnail_format(format);

    std::fs::create_dir_all(media_dir)?;
    let stem = format!("{}-{}", Uuid::new_v4().simple(), sanitize_stem(original_name));
    let filename = format!("{stem}.{ext}");
    let thumbnail = format!(
        "{stem}-{THUMBNAIL_WIDTH}x{THUMBNAIL_HEIGHT}.{}",
        extension(thumb_format)
    );

    std::fs::write(media_dir.join(&filename), data)?;
    decoded
        .resize_to_fill(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Triangle)
        .save_with_format(media_dir.join(&thumbnail), thumb_format)?;

    Ok(NewMedia {
        filename,
        alt: alt.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
        mime_type: format.to_mime_type().to_string(),
        filesize: i64::try_from(data.len()).unwrap_or(i64::MAX),
        width: decoded.width(),
        height: decoded.height(),
        thumbnail,
    })
}

fn extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}

// Formats without a dependable encoder get PNG thumbnails.
fn thumbnail_format(source: ImageFormat) -> ImageFormat {
    match source {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP => source,
        _ => ImageFormat::Png,
    }
}

fn sanitize_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_thumbnail_is_400_by_300() {
        let dir = tempfile::tempdir().unwrap();
        let media = store_upload(dir.path(), "scene photo.png", Some(" Smoke ".into()), &png(800, 800)).unwrap();

        assert_eq!((media.width, media.height), (800, 800));
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.alt.as_deref(), Some("Smoke"));
        assert!(media.filename.ends_with("-scene_photo.png"));

        let thumb = image::open(dir.path().join(&media.thumbnail)).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT));
        assert!(dir.path().join(&media.filename).exists());
    }

    #[test]
    fn test_non_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = store_upload(dir.path(), "notes.txt", None, b"plain text, not pixels").unwrap_err();
        assert!(matches!(err, RelayError::Media(_)));
    }

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("ঢাকা.jpg"), "____");
        assert_eq!(sanitize_stem(""), "upload");
    }
}
