use std::path::Path;

use image::{DynamicImage, ImageBuffer, Luma, Primitive, RgbImage};
use ndarray::{Array2, ArrayView2};

use crate::errors::{Result, SegEvalError};

/// Reads a single-channel label image (8 or 16 bit) into a `(height, width)` label map.
pub fn load_label_map(path: &Path) -> Result<Array2<u32>> {
    let image = open_image(path, "load label image")?;
    label_map_from_image(&image).map_err(|e| match e {
        SegEvalError::Validation { field, reason } => SegEvalError::Validation {
            field: format!("{} ({})", field, path.display()),
            reason,
        },
        other => other,
    })
}

/// Reads any image as 8-bit RGB.
pub fn load_rgb_image(path: &Path) -> Result<RgbImage> {
    Ok(open_image(path, "load image")?.into_rgb8())
}

fn open_image(path: &Path, operation: &str) -> Result<DynamicImage> {
    image::open(path).map_err(|e| SegEvalError::ImageProcessing {
        path: path.display().to_string(),
        operation: operation.to_string(),
        source: Box::new(e),
    })
}

pub fn label_map_from_image(image: &DynamicImage) -> Result<Array2<u32>> {
    match image {
        DynamicImage::ImageLuma8(buffer) => Ok(luma_to_labels(buffer)),
        DynamicImage::ImageLuma16(buffer) => Ok(luma_to_labels(buffer)),
        other => Err(SegEvalError::Validation {
            field: "label image".to_string(),
            reason: format!(
                "must be an 8 or 16 bit grayscale id map, got {:?}; colour-coded masks must be converted to class ids first",
                other.color()
            ),
        }),
    }
}

fn luma_to_labels<S>(buffer: &ImageBuffer<Luma<S>, Vec<S>>) -> Array2<u32>
where
    S: Primitive + Into<u32>,
{
    let (width, height) = buffer.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        buffer.get_pixel(x as u32, y as u32).0[0].into()
    })
}

/// Encodes a label map as a 16 bit grayscale image.
pub fn label_map_to_image(labels: ArrayView2<'_, u32>) -> Result<ImageBuffer<Luma<u16>, Vec<u16>>> {
    let (height, width) = labels.dim();
    let pixels = labels
        .iter()
        .map(|&label| {
            u16::try_from(label).map_err(|_| SegEvalError::Validation {
                field: "label".to_string(),
                reason: format!("{} does not fit a 16 bit label image", label),
            })
        })
        .collect::<Result<Vec<u16>>>()?;

    ImageBuffer::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
        SegEvalError::Validation {
            field: "label image".to_string(),
            reason: "pixel buffer does not match the label map size".to_string(),
        }
    })
}

/// Marks every pixel valid except those carrying `ignore_label`.
pub fn valid_mask(ground_truth: ArrayView2<'_, u32>, ignore_label: Option<u32>) -> Array2<bool> {
    match ignore_label {
        Some(ignore) => ground_truth.mapv(|label| label != ignore),
        None => Array2::from_elem(ground_truth.dim(), true),
    }
}
