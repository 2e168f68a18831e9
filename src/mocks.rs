use std::path::{Path, PathBuf};

use crate::errors::{Result, SegEvalError};
use crate::traits::{LabelPair, LabelPairSource};

/// In-memory sample source for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPairSource {
    pairs: Vec<LabelPair>,
}

impl InMemoryPairSource {
    pub fn new(pairs: Vec<LabelPair>) -> Self {
        Self { pairs }
    }

    pub fn push(&mut self, pair: LabelPair) {
        self.pairs.push(pair);
    }
}

impl LabelPairSource for InMemoryPairSource {
    fn keys(&self) -> Result<Vec<PathBuf>> {
        Ok(self.pairs.iter().map(|pair| pair.key.clone()).collect())
    }

    fn load(&self, key: &Path) -> Result<LabelPair> {
        self.pairs
            .iter()
            .find(|pair| pair.key == key)
            .cloned()
            .ok_or_else(|| SegEvalError::FileSystem {
                path: key.to_path_buf(),
                operation: "mock lookup".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such sample"),
            })
    }
}
