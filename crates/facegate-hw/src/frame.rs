//! Captured frames and pixel conversion.

use image::{DynamicImage, GrayImage};

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number of the buffer this frame came from.
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// View the frame as an image for the inference backend.
    pub fn to_image(&self) -> Result<DynamicImage, FrameError> {
        let expected = (self.width * self.height) as usize;
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .map(DynamicImage::ImageLuma8)
            .ok_or(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            })
    }
}

/// Take the first `width * height` bytes of an 8-bit grayscale buffer.
pub fn grey_plane(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    grey.get(..expected).map(<[u8]>::to_vec).ok_or(FrameError::InvalidLength {
        expected,
        actual: grey.len(),
    })
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert packed 24-bit RGB to grayscale with BT.601 luma weights.
pub fn rgb_to_grayscale(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 3) as usize;
    if rgb.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: rgb.len(),
        });
    }
    Ok(rgb[..expected]
        .chunks_exact(3)
        .map(|p| (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32).round() as u8)
        .collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_plane_drops_padding() {
        let grey = vec![1, 2, 3, 4, 0, 0];
        assert_eq!(grey_plane(&grey, 2, 2).unwrap(), vec![1, 2, 3, 4]);
        assert!(grey_plane(&grey[..3], 2, 2).is_err());
    }

    #[test]
    fn test_rgb_to_grayscale() {
        let rgb = vec![255, 255, 255, 0, 0, 0, 255, 0, 0];
        let gray = rgb_to_grayscale(&rgb, 3, 1).unwrap();
        assert_eq!(gray, vec![255, 0, 76]);
    }

    #[test]
    fn test_frame_to_image() {
        let frame = Frame::new(vec![7u8; 6], 3, 2, 0);
        let image = frame.to_image().unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn test_frame_to_image_short_buffer() {
        let frame = Frame::new(vec![7u8; 5], 3, 2, 0);
        assert!(frame.to_image().is_err());
    }
}
