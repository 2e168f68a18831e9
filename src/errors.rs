use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for segmentation evaluation.
///
/// # Why structured errors
///
/// Every variant that reports a broken invariant carries the offending shapes or ids, so a
/// caller can tell which batch or palette entry is at fault without parsing the message.
/// None of these are recovered locally: they all signal corrupted input from the caller.
#[derive(Error, Debug)]
pub enum SegEvalError {
    #[error("Shape mismatch: {left_name} has shape {left:?} but {right_name} has shape {right:?}")]
    ShapeMismatch {
        left_name: &'static str,
        left: Vec<usize>,
        right_name: &'static str,
        right: Vec<usize>,
    },

    #[error("Class id {class_id} is out of range for {num_classes} classes (found in {source_map})")]
    ClassOutOfRange {
        class_id: usize,
        num_classes: usize,
        source_map: &'static str,
    },

    #[error("Label in {source_map} is not a valid class id")]
    InvalidLabel { source_map: &'static str },

    #[error(
        "Confusion counts for class {class_id} do not add up: tp={tp} fp={fp} fn={fn_} exceed {valid} valid pixels"
    )]
    CountMismatch {
        class_id: usize,
        tp: u64,
        fp: u64,
        fn_: u64,
        valid: u64,
    },

    #[error("Expected {expected} class names but got {actual}")]
    ClassNamesMismatch { expected: usize, actual: usize },

    #[error("Accumulators disagree on class count: {left} vs {right}")]
    ClassCountMismatch { left: usize, right: usize },

    #[error("Label {label} has no palette entry (palette has {palette_len} colors)")]
    LabelOutOfPalette { label: u32, palette_len: usize },

    #[error("Pixel ({x}, {y}) matches palette entries {first} and {second}")]
    AmbiguousColor {
        x: u32,
        y: u32,
        first: usize,
        second: usize,
    },

    #[error("Invalid palette: {reason}")]
    InvalidPalette { reason: String },

    #[error("{operation} is experimental; enable the `experimental` feature to use it")]
    Experimental { operation: &'static str },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SegEvalError>;

impl SegEvalError {
    pub(crate) fn shape_mismatch(
        left_name: &'static str,
        left: &[usize],
        right_name: &'static str,
        right: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            left_name,
            left: left.to_vec(),
            right_name,
            right: right.to_vec(),
        }
    }
}

/// Convert anyhow errors to configuration errors.
///
/// Only the driver touches anyhow; inside the library everything stays structured.
impl From<anyhow::Error> for SegEvalError {
    fn from(err: anyhow::Error) -> Self {
        SegEvalError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build `SegEvalError::FileSystem` itself;
/// this conversion is the fallback for call sites without that context.
impl From<std::io::Error> for SegEvalError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for SegEvalError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ndarray shape errors to validation errors.
///
/// ndarray does not report the shapes involved, so these cannot become `ShapeMismatch`.
impl From<ndarray::ShapeError> for SegEvalError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Validation {
            field: "array shape".to_string(),
            reason: err.to_string(),
        }
    }
}
