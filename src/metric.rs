use std::fmt;

use ndarray::{ArrayView, Dimension};
use num_traits::ToPrimitive;

use crate::errors::{Result, SegEvalError};

const GROUND_TRUTH: &str = "ground truth";
const PREDICTION: &str = "prediction";
const VALID_MASK: &str = "valid mask";

/// Streaming multi-class confusion counts for semantic segmentation.
///
/// Counts are accumulated batch by batch through [`SegmentationMetric::add`] and the derived
/// metrics (IoU, mean IoU, pixel accuracy) can be read at any time. Nothing is ever finalised.
///
/// For every class `c`, `tp[c] + fp[c] + fn[c] + tn[c]` equals the number of valid pixels
/// summed over the batches in which `c` was relevant, i.e. occurred anywhere in the ground
/// truth or the prediction.
///
/// The accumulator is not meant to be shared between threads while adding. Give each worker
/// its own instance and combine them with [`SegmentationMetric::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMetric {
    num_classes: usize,
    class_names: Option<Vec<String>>,
    tps: Vec<u64>,
    fps: Vec<u64>,
    fns: Vec<u64>,
    tns: Vec<u64>,
    count: u64,
}

/// Counts gathered from one batch before they are committed.
struct BatchCounts {
    relevant: Vec<bool>,
    tps: Vec<u64>,
    fps: Vec<u64>,
    fns: Vec<u64>,
    tns: Vec<u64>,
    valid: u64,
}

impl BatchCounts {
    fn new(num_classes: usize) -> Self {
        Self {
            relevant: vec![false; num_classes],
            tps: vec![0; num_classes],
            fps: vec![0; num_classes],
            fns: vec![0; num_classes],
            tns: vec![0; num_classes],
            valid: 0,
        }
    }

    fn relevant_classes(&self) -> impl Iterator<Item = usize> + '_ {
        self.relevant
            .iter()
            .enumerate()
            .filter_map(|(class_id, &seen)| seen.then_some(class_id))
    }
}

impl SegmentationMetric {
    /// Creates an empty accumulator. `num_classes` must be positive.
    pub fn new(num_classes: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(SegEvalError::Validation {
                field: "num_classes".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            num_classes,
            class_names: None,
            tps: vec![0; num_classes],
            fps: vec![0; num_classes],
            fns: vec![0; num_classes],
            tns: vec![0; num_classes],
            count: 0,
        })
    }

    /// Creates an accumulator whose IoU table is keyed by `class_names`.
    ///
    /// The length is checked when the table is built, not here.
    pub fn with_class_names<I, S>(num_classes: usize, class_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut metric = Self::new(num_classes)?;
        metric.class_names = Some(class_names.into_iter().map(Into::into).collect());
        Ok(metric)
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn class_names(&self) -> Option<&[String]> {
        self.class_names.as_deref()
    }

    pub fn true_positives(&self) -> &[u64] {
        &self.tps
    }

    pub fn false_positives(&self) -> &[u64] {
        &self.fps
    }

    pub fn false_negatives(&self) -> &[u64] {
        &self.fns
    }

    pub fn true_negatives(&self) -> &[u64] {
        &self.tns
    }

    /// Total number of masked-in pixels seen so far.
    pub const fn valid_pixel_count(&self) -> u64 {
        self.count
    }

    /// Accumulates one batch.
    ///
    /// `ground_truth`, `prediction` and `valid_mask` must have the same shape; only positions
    /// where `valid_mask` is `true` are counted. Every class id occurring anywhere in either
    /// label map is relevant for this batch and receives counts, including `tn` for classes
    /// that only occur at masked-out positions.
    ///
    /// Ids that cannot index a counter (negative, or `>= num_classes`) are rejected when they
    /// sit at a valid position and skipped when they sit at a masked-out one, so ignore labels
    /// such as 255 or -1 can stay in the ground truth.
    ///
    /// On error the accumulator is left untouched.
    pub fn add<L, D>(
        &mut self,
        ground_truth: ArrayView<'_, L, D>,
        prediction: ArrayView<'_, L, D>,
        valid_mask: ArrayView<'_, bool, D>,
    ) -> Result<()>
    where
        L: ToPrimitive + Copy,
        D: Dimension,
    {
        if ground_truth.shape() != prediction.shape() {
            return Err(SegEvalError::shape_mismatch(
                GROUND_TRUTH,
                ground_truth.shape(),
                PREDICTION,
                prediction.shape(),
            ));
        }
        if ground_truth.shape() != valid_mask.shape() {
            return Err(SegEvalError::shape_mismatch(
                GROUND_TRUTH,
                ground_truth.shape(),
                VALID_MASK,
                valid_mask.shape(),
            ));
        }

        let batch = self.count_batch(&ground_truth, &prediction, &valid_mask)?;
        self.commit(&batch);

        tracing::trace!(
            valid_pixels = batch.valid,
            relevant_classes = batch.relevant_classes().count(),
            "accumulated batch"
        );
        Ok(())
    }

    fn count_batch<L, D>(
        &self,
        ground_truth: &ArrayView<'_, L, D>,
        prediction: &ArrayView<'_, L, D>,
        valid_mask: &ArrayView<'_, bool, D>,
    ) -> Result<BatchCounts>
    where
        L: ToPrimitive + Copy,
        D: Dimension,
    {
        let mut batch = BatchCounts::new(self.num_classes);

        for ((gt, pred), &valid) in ground_truth
            .iter()
            .zip(prediction.iter())
            .zip(valid_mask.iter())
        {
            if !valid {
                if let Some(gt) = self.masked_class_id(*gt) {
                    batch.relevant[gt] = true;
                }
                if let Some(pred) = self.masked_class_id(*pred) {
                    batch.relevant[pred] = true;
                }
                continue;
            }

            let gt = self.valid_class_id(*gt, GROUND_TRUTH)?;
            let pred = self.valid_class_id(*pred, PREDICTION)?;
            batch.relevant[gt] = true;
            batch.relevant[pred] = true;
            batch.valid += 1;

            if gt == pred {
                batch.tps[gt] += 1;
            } else {
                batch.fns[gt] += 1;
                batch.fps[pred] += 1;
            }
        }

        // tn is whatever remains of the valid pixels once tp, fp and fn are taken out.
        let relevant: Vec<usize> = batch.relevant_classes().collect();
        for class_id in relevant {
            let (tp, fp, fn_) = (
                batch.tps[class_id],
                batch.fps[class_id],
                batch.fns[class_id],
            );
            batch.tns[class_id] = batch
                .valid
                .checked_sub(tp + fp + fn_)
                .ok_or(SegEvalError::CountMismatch {
                    class_id,
                    tp,
                    fp,
                    fn_,
                    valid: batch.valid,
                })?;
        }

        Ok(batch)
    }

    fn valid_class_id<L: ToPrimitive>(&self, label: L, source_map: &'static str) -> Result<usize> {
        let class_id = label
            .to_usize()
            .ok_or(SegEvalError::InvalidLabel { source_map })?;
        if class_id >= self.num_classes {
            return Err(SegEvalError::ClassOutOfRange {
                class_id,
                num_classes: self.num_classes,
                source_map,
            });
        }
        Ok(class_id)
    }

    fn masked_class_id<L: ToPrimitive>(&self, label: L) -> Option<usize> {
        label.to_usize().filter(|&id| id < self.num_classes)
    }

    fn commit(&mut self, batch: &BatchCounts) {
        self.count += batch.valid;
        for class_id in batch.relevant_classes() {
            self.tps[class_id] += batch.tps[class_id];
            self.fps[class_id] += batch.fps[class_id];
            self.fns[class_id] += batch.fns[class_id];
            self.tns[class_id] += batch.tns[class_id];
        }
    }

    /// Folds the counts of another accumulator into this one.
    ///
    /// All counters are plain sums, so merging is commutative and associative.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.num_classes != other.num_classes {
            return Err(SegEvalError::ClassCountMismatch {
                left: self.num_classes,
                right: other.num_classes,
            });
        }

        for (dst, src) in [
            (&mut self.tps, &other.tps),
            (&mut self.fps, &other.fps),
            (&mut self.fns, &other.fns),
            (&mut self.tns, &other.tns),
        ] {
            dst.iter_mut().zip(src).for_each(|(d, s)| *d += s);
        }
        self.count += other.count;

        tracing::debug!(valid_pixels = other.count, "merged accumulator");
        Ok(())
    }

    /// Per-class IoU `tp / (tp + fp + fn)` in class-index order.
    ///
    /// A class that was never seen in ground truth or prediction yields NaN.
    pub fn ious(&self) -> Vec<f64> {
        (0..self.num_classes)
            .map(|c| {
                let tp = self.tps[c] as f64;
                tp / (tp + self.fps[c] as f64 + self.fns[c] as f64)
            })
            .collect()
    }

    /// Ordered class label → IoU table, labelled by class name or by class index.
    pub fn iou_table(&self) -> Result<IouTable> {
        let labels: Vec<String> = match &self.class_names {
            Some(names) => {
                if names.len() != self.num_classes {
                    return Err(SegEvalError::ClassNamesMismatch {
                        expected: self.num_classes,
                        actual: names.len(),
                    });
                }
                names.clone()
            }
            None => (0..self.num_classes).map(|c| c.to_string()).collect(),
        };

        Ok(IouTable {
            entries: labels.into_iter().zip(self.ious()).collect(),
        })
    }

    /// Mean of the per-class IoU, optionally leaving out class 0.
    ///
    /// NaN from unobserved classes is not filtered out and propagates into the mean.
    pub fn mean_iou(&self, ignore_first: bool) -> f64 {
        let ious = self.ious();
        let ious = if ignore_first { &ious[1..] } else { &ious[..] };
        ious.iter().sum::<f64>() / ious.len() as f64
    }

    /// Pixel accuracy `sum(tp) / valid_pixel_count`. NaN before any valid pixel was added.
    pub fn accuracy(&self) -> f64 {
        self.tps.iter().sum::<u64>() as f64 / self.count as f64
    }

    /// Classes with `tp + fp + fn == 0`, whose IoU is NaN.
    pub fn unobserved_classes(&self) -> Vec<usize> {
        (0..self.num_classes)
            .filter(|&c| self.tps[c] + self.fps[c] + self.fns[c] == 0)
            .collect()
    }

    /// Snapshot of every derived metric.
    pub fn report(&self, ignore_first: bool) -> Result<MetricReport> {
        Ok(MetricReport {
            per_class: self.iou_table()?,
            mean_iou: self.mean_iou(ignore_first),
            accuracy: self.accuracy(),
            valid_pixels: self.count,
        })
    }
}

/// Class label → IoU, in class-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct IouTable {
    entries: Vec<(String, f64)>,
}

impl IouTable {
    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == label)
            .map(|&(_, iou)| iou)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, iou)| (name.as_str(), *iou))
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|&(_, iou)| iou).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Metrics read from an accumulator at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReport {
    pub per_class: IouTable,
    pub mean_iou: f64,
    pub accuracy: f64,
    pub valid_pixels: u64,
}

fn fmt_metric(value: f64) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.4}", value)
    }
}

impl fmt::Display for MetricReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .per_class
            .iter()
            .map(|(name, _)| name.len())
            .chain(["pixel accuracy".len()])
            .max()
            .unwrap_or_default();

        writeln!(f, "{:<width$}  {:>8}", "class", "IoU")?;
        for (name, iou) in self.per_class.iter() {
            writeln!(f, "{:<width$}  {:>8}", name, fmt_metric(iou))?;
        }
        writeln!(f, "{:<width$}  {:>8}", "mean IoU", fmt_metric(self.mean_iou))?;
        writeln!(f, "{:<width$}  {:>8}", "pixel accuracy", fmt_metric(self.accuracy))?;
        write!(f, "{:<width$}  {:>8}", "valid pixels", self.valid_pixels)
    }
}
