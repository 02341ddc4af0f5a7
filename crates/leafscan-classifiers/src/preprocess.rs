//! Image decoding and tensor preparation

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;
use leafscan_core::{Error, Result};
use std::path::PathBuf;

/// An image to classify
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Image file on disk
    Path(PathBuf),
    /// Encoded image bytes (upload or camera capture)
    Bytes(Vec<u8>),
    /// Already decoded pixels
    Rgb(RgbImage),
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<RgbImage> for ImageInput {
    fn from(image: RgbImage) -> Self {
        Self::Rgb(image)
    }
}

/// Decode an image into RGB pixels
pub fn decode(input: ImageInput) -> Result<RgbImage> {
    let decoded = match input {
        ImageInput::Path(path) => {
            image::open(&path).map_err(|e| Error::decode(format!("{}: {}", path.display(), e)))?
        }
        ImageInput::Bytes(bytes) => image::load_from_memory(&bytes).map_err(|e| Error::decode(e.to_string()))?,
        ImageInput::Rgb(image) => return validate(image),
    };
    validate(decoded.to_rgb8())
}

fn validate(image: RgbImage) -> Result<RgbImage> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::decode("Image has no pixels"));
    }
    Ok(image)
}

/// Decode on the blocking pool
pub async fn decode_async(input: ImageInput) -> Result<RgbImage> {
    tokio::task::spawn_blocking(move || decode(input))
        .await
        .map_err(|e| Error::internal(format!("Image decode task failed: {}", e)))?
}

/// Bilinear resize straight to `height x width`, without cropping
pub fn resize_bilinear(image: &RgbImage, height: usize, width: usize) -> RgbImage {
    if image.height() as usize == height && image.width() as usize == width {
        return image.clone();
    }
    image::imageops::resize(image, width as u32, height as u32, FilterType::Triangle)
}

/// Scale pixels to `[0, 1]` and add a batch dimension: `[1, H, W, 3]`
pub fn to_input_tensor(image: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
    Tensor::from_vec(data, (1, height as usize, width as usize, 3), device)
        .map_err(|e| Error::inference(format!("Failed to create input tensor: {}", e)))
}
