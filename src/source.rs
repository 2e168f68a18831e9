use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::{Result, SegEvalError};
use crate::label_image::{load_label_map, load_rgb_image};
use crate::traits::{LabelPair, LabelPairSource};

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "webp", "bmp", "tiff", "tif"];

/// Ground-truth and prediction label images stored in two parallel directory trees.
///
/// Files are paired by their path relative to the ground-truth root. The prediction (and the
/// optional input image) may use a different extension than the ground truth.
///
/// Label files must decode to 8 or 16 bit grayscale, one class id per pixel. Colour-coded masks
/// (such as the indexed PNGs shipped with PASCAL VOC) decode to RGB and fail to load; convert them
/// to id maps first.
#[derive(Debug, Clone)]
pub struct DirectoryPairSource {
    gt_dir: PathBuf,
    pred_dir: PathBuf,
    image_dir: Option<PathBuf>,
}

impl DirectoryPairSource {
    pub fn new(gt_dir: impl Into<PathBuf>, pred_dir: impl Into<PathBuf>) -> Self {
        Self {
            gt_dir: gt_dir.into(),
            pred_dir: pred_dir.into(),
            image_dir: None,
        }
    }

    pub fn with_image_dir(mut self, image_dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(image_dir.into());
        self
    }

    pub fn is_supported_image_format(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// `root/key` if it exists, otherwise the first `root/key` with a supported extension.
    fn resolve(root: &Path, key: &Path) -> Result<PathBuf> {
        let exact = root.join(key);
        if exact.is_file() {
            return Ok(exact);
        }

        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| exact.with_extension(ext))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| SegEvalError::FileSystem {
                path: exact.clone(),
                operation: "find matching file".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no file matches this key",
                ),
            })
    }
}

impl LabelPairSource for DirectoryPairSource {
    fn keys(&self) -> Result<Vec<PathBuf>> {
        if !self.gt_dir.is_dir() {
            return Err(SegEvalError::FileSystem {
                path: self.gt_dir.clone(),
                operation: "check directory".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "ground-truth directory does not exist",
                ),
            });
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.gt_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !Self::is_supported_image_format(path) {
                continue;
            }
            let key = path
                .strip_prefix(&self.gt_dir)
                .map_err(|_| SegEvalError::FileSystem {
                    path: path.to_path_buf(),
                    operation: "relative path".to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "file is not inside the ground-truth directory",
                    ),
                })?;
            keys.push(key.to_path_buf());
        }

        Ok(keys)
    }

    fn load(&self, key: &Path) -> Result<LabelPair> {
        let ground_truth = load_label_map(&self.gt_dir.join(key))?;
        let prediction = load_label_map(&Self::resolve(&self.pred_dir, key)?)?;
        let image = match &self.image_dir {
            Some(dir) => Some(load_rgb_image(&Self::resolve(dir, key)?)?),
            None => None,
        };

        Ok(LabelPair {
            key: key.to_path_buf(),
            ground_truth,
            prediction,
            image,
        })
    }
}
