//! Image decoding into RGBA8 pixels.

use std::path::Path;

use tracing::info;

use crate::error::{ResourceError, ResourceResult};

/// Decoded image, always 4 channels.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    fn from_dynamic(image: image::DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            channels: 4,
            pixels: rgba.into_raw(),
        }
    }
}

/// Decodes the image file at `path` (PNG, JPEG, ...).
pub fn load_image(path: &Path) -> ResourceResult<ImageData> {
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let data = ImageData::from_dynamic(image::open(path)?);
    if data.width == 0 || data.height == 0 {
        return Err(ResourceError::InvalidData {
            path: path.to_path_buf(),
            reason: "image has zero size".to_string(),
        });
    }

    info!("Loaded image {:?}: {}x{}", path, data.width, data.height);
    Ok(data)
}

/// Decodes an in-memory encoded image.
pub fn decode_image(bytes: &[u8]) -> ResourceResult<ImageData> {
    Ok(ImageData::from_dynamic(image::load_from_memory(bytes)?))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    #[test]
    fn test_rgb_is_expanded_to_rgba() {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let data = decode_image(&bytes).unwrap();
        assert_eq!((data.width, data.height, data.channels), (3, 2, 4));
        assert_eq!(data.pixels.len(), 3 * 2 * 4);
        assert_eq!(&data.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            decode_image(b"not an image"),
            Err(ResourceError::Image(_))
        ));
    }
}
