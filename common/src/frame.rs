use bytes::Bytes;

/// Memory layout of a frame's pixel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// 8-bit grayscale, 1 byte per pixel.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Pixel format name as understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray8 => "gray",
        }
    }
}

/// Width and height of a frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Payload length in bytes for a frame of this size in `format`.
    pub fn payload_len(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel()
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One decoded camera sample.
///
/// The pixel payload is an immutable [`Bytes`] buffer: cloning a frame is a
/// reference-count bump and nobody can mutate the pixels after the frame has
/// been built, so every clone is an independent, stable copy.
///
/// `seq` is assigned by the source in capture order. The relay never looks at
/// it; it exists so that drops and duplicates are observable downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub size: FrameSize,
    pub format: PixelFormat,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    /// Build a frame stamped with the current wall-clock time.
    pub fn new(data: impl Into<Bytes>, size: FrameSize, format: PixelFormat, seq: u64) -> Self {
        Self::with_timestamp(
            data,
            size,
            format,
            chrono::Utc::now().timestamp_millis(),
            seq,
        )
    }

    pub fn with_timestamp(
        data: impl Into<Bytes>,
        size: FrameSize,
        format: PixelFormat,
        captured_at_ms: i64,
        seq: u64,
    ) -> Self {
        Self {
            data: data.into(),
            size,
            format,
            captured_at_ms,
            seq,
        }
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    /// Check that the payload length matches the declared size and format.
    pub fn validate(&self) -> Result<(), FrameError> {
        let expected = self.size.payload_len(self.format);
        if self.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: self.data.len(),
                expected,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Capture time as a UTC datetime, falling back to now for out-of-range values.
    pub fn captured_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload is {got} bytes, expected {expected} for {size}")]
    SizeMismatch {
        got: usize,
        expected: usize,
        size: FrameSize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_payload_len() {
        let size = FrameSize::new(4, 2);
        assert_eq!(size.payload_len(PixelFormat::Rgb24), 24);
        assert_eq!(size.payload_len(PixelFormat::Gray8), 8);
    }

    #[test]
    fn validate_accepts_exact_payload() {
        let frame = Frame::new(vec![0u8; 24], FrameSize::new(4, 2), PixelFormat::Rgb24, 0);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_payload() {
        let frame = Frame::new(vec![0u8; 10], FrameSize::new(4, 2), PixelFormat::Rgb24, 0);
        let err = frame.validate().unwrap_err();
        assert!(err.to_string().contains("expected 24"));
    }

    #[test]
    fn clone_shares_payload() {
        let frame = Frame::new(vec![7u8; 8], FrameSize::new(8, 1), PixelFormat::Gray8, 3);
        let copy = frame.clone();
        assert_eq!(copy, frame);
        assert_eq!(copy.data.as_ptr(), frame.data.as_ptr());
    }

    #[test]
    fn captured_at_roundtrips_millis() {
        let frame = Frame::with_timestamp(
            vec![0u8; 1],
            FrameSize::new(1, 1),
            PixelFormat::Gray8,
            1708300000123,
            0,
        );
        assert_eq!(frame.captured_at().timestamp_millis(), 1708300000123);
    }

    #[test]
    fn size_display() {
        assert_eq!(FrameSize::new(640, 480).to_string(), "640x480");
    }
}
