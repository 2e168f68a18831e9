use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use image::ImageFormat;

use crate::color::LabelColorMapper;
use crate::errors::{Result, SegEvalError};
use crate::palette::{parse_palette, voc_palette};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum VisMode {
    /// Image, ground truth and prediction stacked vertically
    Stack,
    /// Ground truth blended over the image
    Overlay,
}

/// Evaluate predicted label images against ground truth
#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory of ground-truth label images. Each file must be a single-channel 8 or 16 bit
    /// grayscale PNG holding class ids; palette-coloured or RGB masks are rejected
    pub gt_dir: PathBuf,

    /// Directory of predicted label images, mirroring `gt_dir` (same grayscale id format)
    pub pred_dir: PathBuf,

    #[arg(short, long)]
    pub num_classes: usize,

    /// Comma separated, one per class
    #[arg(long, value_delimiter = ',')]
    pub class_names: Vec<String>,

    /// Ground-truth label excluded from all counts (e.g. 255)
    #[arg(long)]
    pub ignore_label: Option<u32>,

    /// Leave class 0 out of the mean IoU
    #[arg(long)]
    pub ignore_first: bool,

    /// Directory of input images, needed for visualisations
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Write visualisations here
    #[arg(long, requires = "image_dir")]
    pub vis_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = VisMode::Stack)]
    pub vis_mode: VisMode,

    /// File with one `r,g,b` line per class; defaults to the PASCAL VOC colour map
    #[arg(long)]
    pub palette: Option<PathBuf>,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(long)]
    pub num_threads: Option<usize>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(SegEvalError::Validation {
                field: "num_classes".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !self.class_names.is_empty() && self.class_names.len() != self.num_classes {
            return Err(SegEvalError::ClassNamesMismatch {
                expected: self.num_classes,
                actual: self.class_names.len(),
            });
        }

        let dirs = [Some(&self.gt_dir), Some(&self.pred_dir), self.image_dir.as_ref()];
        for dir in dirs.into_iter().flatten() {
            if !dir.is_dir() {
                return Err(SegEvalError::Configuration {
                    message: format!("{} is not a directory", dir.display()),
                });
            }
        }

        Ok(())
    }

    pub fn class_names(&self) -> Option<&[String]> {
        (!self.class_names.is_empty()).then_some(self.class_names.as_slice())
    }

    /// Palette from `--palette`, or the VOC colour map sized to `num_classes`.
    pub fn color_mapper(&self) -> Result<LabelColorMapper> {
        let palette = match &self.palette {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| SegEvalError::FileSystem {
                    path: path.clone(),
                    operation: "read palette".to_string(),
                    source: e,
                })?;
                parse_palette(&text)?
            }
            None => voc_palette(self.num_classes),
        };
        LabelColorMapper::new(palette)
    }
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> std::result::Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("seg-eval").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_minimal() {
        let config = parse(&["gt", "pred", "-n", "3"]).unwrap();
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.format, "png");
        assert_eq!(config.vis_mode, VisMode::Stack);
        assert!(config.class_names().is_none());
        assert!(config.ignore_label.is_none());
    }

    #[test]
    fn test_parse_class_names_and_ignore_label() {
        let config = parse(&[
            "gt",
            "pred",
            "-n",
            "2",
            "--class-names",
            "road,sky",
            "--ignore-label",
            "255",
            "--ignore-first",
        ])
        .unwrap();
        assert_eq!(config.class_names(), Some(&["road".to_string(), "sky".to_string()][..]));
        assert_eq!(config.ignore_label, Some(255));
        assert!(config.ignore_first);
    }

    #[test]
    fn test_vis_dir_requires_image_dir() {
        assert!(parse(&["gt", "pred", "-n", "2", "--vis-dir", "vis"]).is_err());
        assert!(parse(&["gt", "pred", "-n", "2", "--vis-dir", "vis", "--image-dir", "img"]).is_ok());
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(parse(&["gt", "pred", "-n", "2", "--format", "xyz"]).is_err());
    }

    #[test]
    fn test_validate() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path().to_str().unwrap();

        let config = parse(&[dir, dir, "-n", "2"]).unwrap();
        config.validate()?;

        let config = parse(&[dir, dir, "-n", "2", "--class-names", "a,b,c"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(SegEvalError::ClassNamesMismatch { .. })
        ));

        let config = parse(&[dir, "/nonexistent/pred", "-n", "2"]).unwrap();
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_color_mapper_from_palette_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let palette_path = temp_dir.path().join("palette.txt");
        fs::write(&palette_path, "0,0,0\n255,0,0\n")?;

        let config = parse(&["gt", "pred", "-n", "2", "--palette", palette_path.to_str().unwrap()])
            .unwrap();
        assert_eq!(config.color_mapper()?.palette().len(), 2);

        let config = parse(&["gt", "pred", "-n", "5"]).unwrap();
        assert_eq!(config.color_mapper()?.palette().len(), 5);
        Ok(())
    }
}
