//! Streaming evaluation of semantic segmentation results.
//!
//! [`SegmentationMetric`] accumulates per-class confusion counts from batches of ground truth,
//! prediction and validity mask and derives IoU, mean IoU and pixel accuracy on demand.
//! [`LabelColorMapper`] turns label maps into colour images for visual inspection.
//!
//! The library only emits `tracing` events; installing a subscriber is up to the caller.

pub mod color;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod label_image;
pub mod metric;
pub mod mocks;
pub mod palette;
pub mod source;
pub mod traits;

pub use color::{LabelColorMapper, UNKNOWN_LABEL};
pub use config::{Config, VisMode};
pub use errors::{Result, SegEvalError};
pub use evaluator::{Evaluator, VisualizationOptions};
pub use metric::{IouTable, MetricReport, SegmentationMetric};
pub use source::DirectoryPairSource;
pub use traits::*;
