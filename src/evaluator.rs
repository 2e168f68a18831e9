use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use ndarray::{ArrayView2, Zip};
use rayon::prelude::*;

use crate::color::LabelColorMapper;
use crate::config::{Config, VisMode};
use crate::errors::{Result, SegEvalError};
use crate::label_image::valid_mask;
use crate::metric::SegmentationMetric;
use crate::traits::{LabelPair, LabelPairSource};

/// Where and how visualisations are written.
#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    pub output_dir: PathBuf,
    pub mapper: LabelColorMapper,
    pub mode: VisMode,
    pub format: String,
}

/// Runs one evaluation pass over every sample of a [`LabelPairSource`].
///
/// Samples are processed on the rayon pool. Each worker accumulates into its own
/// [`SegmentationMetric`] and the partial results are merged at the end.
pub struct Evaluator<S: LabelPairSource> {
    source: S,
    num_classes: usize,
    class_names: Option<Vec<String>>,
    ignore_label: Option<u32>,
    visualization: Option<VisualizationOptions>,
    show_progress: bool,
}

impl<S: LabelPairSource> Evaluator<S> {
    pub const fn new(source: S, num_classes: usize) -> Self {
        Self {
            source,
            num_classes,
            class_names: None,
            ignore_label: None,
            visualization: None,
            show_progress: false,
        }
    }

    pub fn from_config(source: S, config: &Config) -> Result<Self> {
        let mut evaluator = Self::new(source, config.num_classes)
            .with_ignore_label(config.ignore_label)
            .with_progress(true);
        if let Some(names) = config.class_names() {
            evaluator = evaluator.with_class_names(names.to_vec());
        }
        if let Some(output_dir) = &config.vis_dir {
            evaluator = evaluator.with_visualization(VisualizationOptions {
                output_dir: output_dir.clone(),
                mapper: config.color_mapper()?,
                mode: config.vis_mode,
                format: config.format.clone(),
            });
        }
        Ok(evaluator)
    }

    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = Some(class_names);
        self
    }

    pub const fn with_ignore_label(mut self, ignore_label: Option<u32>) -> Self {
        self.ignore_label = ignore_label;
        self
    }

    pub fn with_visualization(mut self, visualization: VisualizationOptions) -> Self {
        self.visualization = Some(visualization);
        self
    }

    pub const fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn empty_metric(&self) -> Result<SegmentationMetric> {
        match &self.class_names {
            Some(names) => SegmentationMetric::with_class_names(self.num_classes, names.clone()),
            None => SegmentationMetric::new(self.num_classes),
        }
    }

    pub fn evaluate(&self) -> Result<SegmentationMetric> {
        let keys = self.source.keys()?;
        let empty = self.empty_metric()?;

        if keys.is_empty() {
            tracing::warn!("no samples to evaluate");
            return Ok(empty);
        }
        tracing::info!(samples = keys.len(), "evaluating");

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(keys.len() as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| SegEvalError::Configuration {
                    message: e.to_string(),
                })?
                .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let metric = keys
            .par_iter()
            .progress_with(progress_bar.clone())
            .try_fold(
                || empty.clone(),
                |mut metric, key| -> Result<SegmentationMetric> {
                    let pair = self.source.load(key)?;
                    self.accumulate(&mut metric, &pair)?;
                    Ok(metric)
                },
            )
            .try_reduce(
                || empty.clone(),
                |mut left, right| {
                    left.merge(&right)?;
                    Ok(left)
                },
            )?;

        progress_bar.finish();

        let unobserved = metric.unobserved_classes();
        if !unobserved.is_empty() {
            tracing::warn!(classes = ?unobserved, "classes never observed, their IoU is NaN");
        }
        Ok(metric)
    }

    fn accumulate(&self, metric: &mut SegmentationMetric, pair: &LabelPair) -> Result<()> {
        let mask = valid_mask(pair.ground_truth.view(), self.ignore_label);
        metric
            .add(pair.ground_truth.view(), pair.prediction.view(), mask.view())
            .inspect_err(|e| {
                tracing::error!(key = %pair.key.display(), error = %e, "failed to accumulate sample");
            })?;

        // A failed visualisation costs one image, never the counts.
        if let Some(options) = &self.visualization {
            if let Err(e) = self.visualize(options, pair, mask.view()) {
                tracing::warn!(key = %pair.key.display(), error = %e, "failed to write visualisation");
            }
        }
        Ok(())
    }

    fn visualize(
        &self,
        options: &VisualizationOptions,
        pair: &LabelPair,
        mask: ArrayView2<'_, bool>,
    ) -> Result<()> {
        let Some(image) = &pair.image else {
            tracing::warn!(key = %pair.key.display(), "no input image, skipping visualisation");
            return Ok(());
        };

        // Ignored ids usually have no palette entry. Drawing them with the black background id
        // lets the mask rule paint them in the mask colour.
        let ground_truth = match options.mapper.background_label() {
            Some(background) => Zip::from(&pair.ground_truth)
                .and(&mask)
                .map_collect(|&label, &valid| if valid { label } else { background }),
            None => pair.ground_truth.clone(),
        };

        let output = match options.mode {
            VisMode::Stack => options.mapper.stack_comparison_masked(
                image,
                ground_truth.view(),
                pair.prediction.view(),
                Some(mask),
            )?,
            VisMode::Overlay => {
                options
                    .mapper
                    .overlay_masked(image, ground_truth.view(), Some(mask))?
            }
        };

        let output_file = options
            .output_dir
            .join(&pair.key)
            .with_extension(&options.format);
        create_parent_dir(&output_file)?;

        let format = ImageFormat::from_extension(&options.format).unwrap_or(ImageFormat::Png);
        output
            .save_with_format(&output_file, format)
            .map_err(|e| SegEvalError::ImageProcessing {
                path: output_file.display().to_string(),
                operation: "save visualisation".to_string(),
                source: Box::new(e),
            })?;

        tracing::debug!(path = %output_file.display(), "saved visualisation");
        Ok(())
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SegEvalError::FileSystem {
            path: parent.to_path_buf(),
            operation: "create output directory".to_string(),
            source: e,
        })?;
    }
    Ok(())
}
