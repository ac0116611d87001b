use std::path::Path;

use frame_relay_common::frame::{Frame, PixelFormat};
use image::{ColorType, ImageFormat};

use super::SnapshotError;

/// Image format for a snapshot extension such as `jpg` or `.png`.
pub fn image_format_for(extension: &str) -> Result<ImageFormat, SnapshotError> {
    let extension = extension.trim_start_matches('.');
    match ImageFormat::from_extension(extension) {
        Some(format) if format.writing_enabled() => Ok(format),
        _ => Err(SnapshotError::UnsupportedFormat(extension.to_string())),
    }
}

/// Encode `frame` as a still image. The format follows the file extension.
///
/// Blocking; run it on the blocking pool.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<(), SnapshotError> {
    frame
        .validate()
        .map_err(|e| SnapshotError::Frame(e.to_string()))?;
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = image_format_for(&extension)?;

    let color = match frame.format {
        PixelFormat::Rgb24 => ColorType::Rgb8,
        PixelFormat::Gray8 => ColorType::L8,
    };

    image::save_buffer_with_format(
        path,
        &frame.data,
        frame.width(),
        frame.height(),
        color,
        format,
    )
    .map_err(|e| SnapshotError::Encode {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_relay_common::frame::FrameSize;
    use tempfile::TempDir;

    fn frame(format: PixelFormat) -> Frame {
        let size = FrameSize::new(8, 6);
        Frame::new(vec![128u8; size.payload_len(format)], size, format, 0)
    }

    #[test]
    fn writes_decodable_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("still.png");
        save_frame(&frame(PixelFormat::Rgb24), &path).unwrap();

        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[test]
    fn writes_gray_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("still.jpg");
        save_frame(&frame(PixelFormat::Gray8), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unknown_extension_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("still.notanimage");
        let err = save_frame(&frame(PixelFormat::Rgb24), &path).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedFormat(ref e) if e == "notanimage"));
        assert!(!path.exists());
    }

    #[test]
    fn extensions_resolve_to_writable_formats() {
        assert_eq!(image_format_for("jpg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(image_format_for(".png").unwrap(), ImageFormat::Png);
        assert!(image_format_for("avi").is_err());
        assert!(image_format_for("").is_err());
    }

    #[test]
    fn torn_frame_is_rejected() {
        let dir = TempDir::new().unwrap();
        let bad = Frame::new(vec![0u8; 5], FrameSize::new(8, 6), PixelFormat::Rgb24, 0);
        let err = save_frame(&bad, &dir.path().join("bad.png")).unwrap_err();
        assert!(matches!(err, SnapshotError::Frame(_)));
    }
}
