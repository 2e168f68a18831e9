use image::{imageops, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

use crate::errors::{Result, SegEvalError};

/// Label assigned by [`LabelColorMapper::color_to_label`] to pixels whose colour is not in the palette.
pub const UNKNOWN_LABEL: u32 = u32::MAX;

/// Weight of the colourised labels in [`LabelColorMapper::overlay`]; the image gets the rest.
pub const OVERLAY_ALPHA: f32 = 0.4;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// Converts between label maps and colour images through a fixed palette.
///
/// Label maps are `(height, width)` arrays; colour images are `image::RgbImage`. The mapper
/// never reads or writes files.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelColorMapper {
    palette: Vec<Rgb<u8>>,
    mask_color: Rgb<u8>,
}

impl LabelColorMapper {
    pub fn new(palette: Vec<Rgb<u8>>) -> Result<Self> {
        if palette.is_empty() {
            return Err(SegEvalError::InvalidPalette {
                reason: "palette is empty".to_string(),
            });
        }
        Ok(Self {
            palette,
            mask_color: Rgb([255, 255, 255]),
        })
    }

    pub const fn with_mask_color(mut self, mask_color: Rgb<u8>) -> Self {
        self.mask_color = mask_color;
        self
    }

    pub fn palette(&self) -> &[Rgb<u8>] {
        &self.palette
    }

    pub const fn mask_color(&self) -> Rgb<u8> {
        self.mask_color
    }

    pub fn color_of(&self, label: u32) -> Result<Rgb<u8>> {
        self.palette
            .get(label as usize)
            .copied()
            .ok_or(SegEvalError::LabelOutOfPalette {
                label,
                palette_len: self.palette.len(),
            })
    }

    /// Looks every label up in the palette.
    ///
    /// With a `mask`, a pixel is painted with the mask colour only when its palette colour is
    /// pure black AND its mask value is `false`. Masked pixels with any other colour keep it.
    pub fn labels_to_color(
        &self,
        labels: ArrayView2<'_, u32>,
        mask: Option<ArrayView2<'_, bool>>,
    ) -> Result<RgbImage> {
        if let Some(mask) = &mask {
            if mask.dim() != labels.dim() {
                return Err(SegEvalError::shape_mismatch(
                    "label map",
                    labels.shape(),
                    "mask",
                    mask.shape(),
                ));
            }
        }

        let (width, height) = image_dimensions(labels.dim())?;
        let mut output = RgbImage::new(width, height);

        for ((y, x), &label) in labels.indexed_iter() {
            let mut color = self.color_of(label)?;
            if let Some(mask) = &mask {
                if color == BACKGROUND && !mask[[y, x]] {
                    color = self.mask_color;
                }
            }
            output.put_pixel(x as u32, y as u32, color);
        }

        Ok(output)
    }

    /// Blends palette colours by per-pixel class weights.
    ///
    /// `probabilities` is `(height, width, classes)` with one weight per palette entry; the
    /// result is `(height, width, 3)`. Weights are used as given, nothing is normalised.
    pub fn prediction_to_color(&self, probabilities: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (height, width, classes) = probabilities.dim();
        if classes != self.palette.len() {
            return Err(SegEvalError::shape_mismatch(
                "probability map",
                probabilities.shape(),
                "palette",
                &[self.palette.len(), 3],
            ));
        }

        let palette = Array2::from_shape_fn((classes, 3), |(id, channel)| {
            f32::from(self.palette[id][channel])
        });
        let weights = probabilities.to_shape((height * width, classes))?;
        let blended = weights.dot(&palette);

        Ok(blended.into_shape_with_order((height, width, 3))?)
    }

    /// Inverse of [`labels_to_color`](Self::labels_to_color).
    ///
    /// Experimental: only available with the `experimental` feature, otherwise it fails with
    /// [`SegEvalError::Experimental`]. Pixels whose colour is not in the palette become
    /// [`UNKNOWN_LABEL`]; a colour listed more than once in the palette is an error.
    pub fn color_to_label(&self, colors: &RgbImage) -> Result<Array2<u32>> {
        if !cfg!(feature = "experimental") {
            return Err(SegEvalError::Experimental {
                operation: "color_to_label",
            });
        }
        self.decode_colors(colors)
    }

    fn decode_colors(&self, colors: &RgbImage) -> Result<Array2<u32>> {
        let (width, height) = colors.dimensions();
        let mut labels = Array2::from_elem((height as usize, width as usize), UNKNOWN_LABEL);

        for (x, y, pixel) in colors.enumerate_pixels() {
            let mut matches = self
                .palette
                .iter()
                .enumerate()
                .filter(|(_, color)| *color == pixel)
                .map(|(id, _)| id);

            if let Some(first) = matches.next() {
                if let Some(second) = matches.next() {
                    return Err(SegEvalError::AmbiguousColor {
                        x,
                        y,
                        first,
                        second,
                    });
                }
                labels[[y as usize, x as usize]] = first as u32;
            }
        }

        Ok(labels)
    }

    /// First palette id whose colour is pure black, the only colour the mask rule repaints.
    pub fn background_label(&self) -> Option<u32> {
        self.palette
            .iter()
            .position(|&color| color == BACKGROUND)
            .map(|id| id as u32)
    }

    /// Stacks the image, the colourised ground truth and the colourised prediction vertically.
    pub fn stack_comparison(
        &self,
        image: &RgbImage,
        ground_truth: ArrayView2<'_, u32>,
        prediction: ArrayView2<'_, u32>,
    ) -> Result<RgbImage> {
        self.stack_comparison_masked(image, ground_truth, prediction, None)
    }

    /// [`stack_comparison`](Self::stack_comparison) with `gt_mask` applied to the ground-truth
    /// panel as in [`labels_to_color`](Self::labels_to_color).
    pub fn stack_comparison_masked(
        &self,
        image: &RgbImage,
        ground_truth: ArrayView2<'_, u32>,
        prediction: ArrayView2<'_, u32>,
        gt_mask: Option<ArrayView2<'_, bool>>,
    ) -> Result<RgbImage> {
        let panels = [
            image.clone(),
            self.labels_to_color(ground_truth, gt_mask)?,
            self.labels_to_color(prediction, None)?,
        ];

        let width = image.width();
        if let Some(panel) = panels.iter().find(|p| p.width() != width) {
            return Err(SegEvalError::shape_mismatch(
                "image",
                &[image.height() as usize, width as usize],
                "label map",
                &[panel.height() as usize, panel.width() as usize],
            ));
        }

        let height = panels.iter().map(RgbImage::height).sum();
        let mut canvas = RgbImage::new(width, height);
        let mut y = 0i64;
        for panel in &panels {
            imageops::replace(&mut canvas, panel, 0, y);
            y += i64::from(panel.height());
        }

        Ok(canvas)
    }

    /// Blends the colourised ground truth over the image with [`OVERLAY_ALPHA`].
    pub fn overlay(&self, image: &RgbImage, ground_truth: ArrayView2<'_, u32>) -> Result<RgbImage> {
        self.overlay_masked(image, ground_truth, None)
    }

    /// [`overlay`](Self::overlay) with `gt_mask` applied as in [`labels_to_color`](Self::labels_to_color).
    pub fn overlay_masked(
        &self,
        image: &RgbImage,
        ground_truth: ArrayView2<'_, u32>,
        gt_mask: Option<ArrayView2<'_, bool>>,
    ) -> Result<RgbImage> {
        let labels = self.labels_to_color(ground_truth, gt_mask)?;
        if labels.dimensions() != image.dimensions() {
            return Err(SegEvalError::shape_mismatch(
                "image",
                &[image.height() as usize, image.width() as usize],
                "label map",
                ground_truth.shape(),
            ));
        }

        let mut output = image.clone();
        for (out, label) in output.pixels_mut().zip(labels.pixels()) {
            for (o, &l) in out.0.iter_mut().zip(label.0.iter()) {
                let blended = OVERLAY_ALPHA * f32::from(l) + (1.0 - OVERLAY_ALPHA) * f32::from(*o);
                *o = blended.round() as u8;
            }
        }

        Ok(output)
    }
}

fn image_dimensions((height, width): (usize, usize)) -> Result<(u32, u32)> {
    let to_u32 = |value: usize, field: &str| {
        u32::try_from(value).map_err(|_| SegEvalError::Validation {
            field: field.to_string(),
            reason: format!("{} does not fit an image dimension", value),
        })
    };
    Ok((to_u32(width, "width")?, to_u32(height, "height")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_class_mapper() -> LabelColorMapper {
        LabelColorMapper::new(vec![Rgb([0, 0, 0]), Rgb([255, 0, 0])]).unwrap()
    }

    #[test]
    fn test_labels_to_color() -> Result<()> {
        let mapper = two_class_mapper();
        let labels = array![[0u32, 1], [1, 0]];

        let colors = mapper.labels_to_color(labels.view(), None)?;

        assert_eq!(colors.dimensions(), (2, 2));
        assert_eq!(*colors.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*colors.get_pixel(1, 0), Rgb([255, 0, 0]));
        assert_eq!(*colors.get_pixel(0, 1), Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_labels_to_color_non_square() -> Result<()> {
        let mapper = two_class_mapper();
        let labels = array![[0u32, 0, 1]];

        let colors = mapper.labels_to_color(labels.view(), None)?;

        assert_eq!(colors.dimensions(), (3, 1));
        assert_eq!(*colors.get_pixel(2, 0), Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_mask_only_recolors_black_pixels() -> Result<()> {
        let mapper = two_class_mapper().with_mask_color(Rgb([10, 20, 30]));
        let labels = array![[0u32, 1], [0, 1]];
        let mask = array![[false, false], [true, true]];

        let colors = mapper.labels_to_color(labels.view(), Some(mask.view()))?;

        assert_eq!(*colors.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert_eq!(*colors.get_pixel(1, 0), Rgb([255, 0, 0]));
        assert_eq!(*colors.get_pixel(0, 1), Rgb([0, 0, 0]));
        assert_eq!(*colors.get_pixel(1, 1), Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_label_outside_palette_is_rejected() {
        let mapper = two_class_mapper();
        let labels = array![[0u32, 2]];

        let err = mapper.labels_to_color(labels.view(), None).unwrap_err();
        assert!(matches!(
            err,
            SegEvalError::LabelOutOfPalette {
                label: 2,
                palette_len: 2
            }
        ));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let mapper = two_class_mapper();
        let labels = array![[0u32, 1]];
        let mask = array![[true], [false]];

        let err = mapper
            .labels_to_color(labels.view(), Some(mask.view()))
            .unwrap_err();
        assert!(matches!(err, SegEvalError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_prediction_to_color_blends() -> Result<()> {
        let mapper = LabelColorMapper::new(vec![Rgb([0, 0, 200]), Rgb([100, 0, 0])])?;
        let probabilities = array![[[1.0f32, 0.0], [0.5, 0.5]], [[0.0, 1.0], [0.25, 0.25]]];

        let blended = mapper.prediction_to_color(probabilities.view())?;

        assert_eq!(blended.dim(), (2, 2, 3));
        assert_eq!(blended[[0, 0, 2]], 200.0);
        assert_eq!(blended[[0, 1, 0]], 50.0);
        assert_eq!(blended[[0, 1, 2]], 100.0);
        assert_eq!(blended[[1, 0, 0]], 100.0);
        // not normalised
        assert_eq!(blended[[1, 1, 0]], 25.0);
        assert_eq!(blended[[1, 1, 2]], 50.0);
        Ok(())
    }

    #[test]
    fn test_prediction_to_color_needs_one_weight_per_color() {
        let mapper = two_class_mapper();
        let probabilities = ndarray::Array3::<f32>::zeros((2, 2, 3));
        assert!(mapper.prediction_to_color(probabilities.view()).is_err());
    }

    #[test]
    fn test_decode_colors_roundtrip() -> Result<()> {
        let mapper = LabelColorMapper::new(crate::palette::voc_palette(21))?;
        let labels = ndarray::Array2::from_shape_fn((5, 7), |(y, x)| ((y * 7 + x) % 21) as u32);

        let colors = mapper.labels_to_color(labels.view(), None)?;
        assert_eq!(mapper.decode_colors(&colors)?, labels);
        Ok(())
    }

    #[test]
    fn test_decode_colors_unknown_and_ambiguous() -> Result<()> {
        let mapper = two_class_mapper();
        let mut colors = RgbImage::new(2, 1);
        colors.put_pixel(1, 0, Rgb([1, 2, 3]));

        let labels = mapper.decode_colors(&colors)?;
        assert_eq!(labels, array![[0, UNKNOWN_LABEL]]);

        let duplicated = LabelColorMapper::new(vec![Rgb([0, 0, 0]), Rgb([0, 0, 0])])?;
        let err = duplicated.decode_colors(&colors).unwrap_err();
        assert!(matches!(
            err,
            SegEvalError::AmbiguousColor {
                first: 0,
                second: 1,
                ..
            }
        ));
        Ok(())
    }

    #[cfg(not(feature = "experimental"))]
    #[test]
    fn test_color_to_label_is_disabled_by_default() {
        let mapper = two_class_mapper();
        let err = mapper.color_to_label(&RgbImage::new(1, 1)).unwrap_err();
        assert!(matches!(
            err,
            SegEvalError::Experimental {
                operation: "color_to_label"
            }
        ));
    }

    #[cfg(feature = "experimental")]
    #[test]
    fn test_color_to_label_enabled() -> Result<()> {
        let mapper = two_class_mapper();
        let labels = array![[1u32, 0]];
        let colors = mapper.labels_to_color(labels.view(), None)?;
        assert_eq!(mapper.color_to_label(&colors)?, labels);
        Ok(())
    }

    #[test]
    fn test_stack_comparison() -> Result<()> {
        let mapper = two_class_mapper();
        let image = RgbImage::from_pixel(2, 1, Rgb([7, 7, 7]));
        let gt = array![[1u32, 0]];
        let pred = array![[0u32, 1]];

        let stacked = mapper.stack_comparison(&image, gt.view(), pred.view())?;

        assert_eq!(stacked.dimensions(), (2, 3));
        assert_eq!(*stacked.get_pixel(0, 0), Rgb([7, 7, 7]));
        assert_eq!(*stacked.get_pixel(0, 1), Rgb([255, 0, 0]));
        assert_eq!(*stacked.get_pixel(1, 1), Rgb([0, 0, 0]));
        assert_eq!(*stacked.get_pixel(1, 2), Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_stack_comparison_width_mismatch() {
        let mapper = two_class_mapper();
        let image = RgbImage::new(3, 1);
        let labels = array![[1u32, 0]];

        assert!(mapper
            .stack_comparison(&image, labels.view(), labels.view())
            .is_err());
    }

    #[test]
    fn test_overlay_weights() -> Result<()> {
        let mapper = two_class_mapper();
        let image = RgbImage::from_pixel(2, 1, Rgb([100, 50, 0]));
        let gt = array![[1u32, 0]];

        let blended = mapper.overlay(&image, gt.view())?;

        assert_eq!(*blended.get_pixel(0, 0), Rgb([162, 30, 0]));
        assert_eq!(*blended.get_pixel(1, 0), Rgb([60, 30, 0]));
        Ok(())
    }

    #[test]
    fn test_masked_panels_paint_black_masked_pixels() -> Result<()> {
        let mapper = two_class_mapper();
        let image = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        let gt = array![[0u32, 0]];
        let mask = array![[true, false]];

        let stacked = mapper.stack_comparison_masked(&image, gt.view(), gt.view(), Some(mask.view()))?;
        assert_eq!(*stacked.get_pixel(0, 1), Rgb([0, 0, 0]));
        assert_eq!(*stacked.get_pixel(1, 1), mapper.mask_color());
        // prediction panel is never masked
        assert_eq!(*stacked.get_pixel(1, 2), Rgb([0, 0, 0]));

        let blended = mapper.overlay_masked(&image, gt.view(), Some(mask.view()))?;
        assert_eq!(*blended.get_pixel(0, 0), Rgb([60, 60, 60]));
        assert_eq!(*blended.get_pixel(1, 0), Rgb([162, 162, 162]));
        Ok(())
    }

    #[test]
    fn test_background_label() -> Result<()> {
        assert_eq!(two_class_mapper().background_label(), Some(0));
        let no_black = LabelColorMapper::new(vec![Rgb([1, 0, 0]), Rgb([0, 2, 0])])?;
        assert_eq!(no_black.background_label(), None);
        Ok(())
    }

    #[test]
    fn test_overlay_dimension_mismatch() {
        let mapper = two_class_mapper();
        let image = RgbImage::new(2, 2);
        let gt = array![[1u32, 0]];

        assert!(mapper.overlay(&image, gt.view()).is_err());
    }

    #[test]
    fn test_empty_palette_is_rejected() {
        assert!(LabelColorMapper::new(Vec::new()).is_err());
    }
}
