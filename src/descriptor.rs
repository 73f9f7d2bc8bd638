//! Image descriptor - the parsed header a store is opened from

use crate::error::{Result, StoreError};
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One backing file and the byte offset its voxel payload starts at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSegmentRef {
    /// Path of the gzip-compressed file
    pub name: PathBuf,
    /// Offset of the payload within the decompressed file
    pub start: u64,
}

impl FileSegmentRef {
    pub fn new(name: impl Into<PathBuf>, start: u64) -> Self {
        Self {
            name: name.into(),
            start,
        }
    }
}

/// Already-parsed description of an image: what it holds and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Image name, used in diagnostics
    pub name: String,

    /// Voxel data type
    pub datatype: DataType,

    /// Number of voxels along each axis
    pub dims: Vec<usize>,

    /// Backing files, in segment order
    #[serde(default)]
    pub files: Vec<FileSegmentRef>,
}

impl ImageDescriptor {
    /// Create a descriptor with no backing files yet
    pub fn new(name: impl Into<String>, datatype: DataType, dims: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            datatype,
            dims,
            files: Vec::new(),
        }
    }

    /// Append a backing file
    pub fn with_file(mut self, name: impl Into<PathBuf>, start: u64) -> Self {
        self.files.push(FileSegmentRef::new(name, start));
        self
    }

    /// Append `count` files named `<prefix>-000.gz`, `<prefix>-001.gz`, ...
    pub fn with_segment_files(mut self, prefix: impl AsRef<Path>, count: usize, start: u64) -> Self {
        let prefix = prefix.as_ref();
        let stem = prefix
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        for n in 0..count {
            let name = prefix.with_file_name(format!("{}-{:03}.gz", stem, n));
            self.files.push(FileSegmentRef::new(name, start));
        }
        self
    }

    /// Total number of voxels, or `None` if the product overflows
    pub fn checked_voxel_count(&self) -> Option<usize> {
        if self.dims.is_empty() {
            return Some(0);
        }
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Number of backing files
    pub fn segment_count(&self) -> usize {
        self.files.len()
    }

    /// Parse a descriptor from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a descriptor from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
