//! gzvol - segmented, gzip-compressed voxel buffer store
//!
//! Loads a multi-dimensional image that is split across one or more
//! gzip-compressed files into a single contiguous in-memory buffer, and writes
//! that buffer back on close.
//!
//! # Features
//!
//! - Each backing file holds an opaque lead-in followed by an equal share of
//!   the voxel payload, preserved verbatim across load/store
//! - Byte-aligned data is exposed as one flat region; 1-bit data spread over
//!   several files is exposed per file
//! - Read-write stores rewrite every file from scratch on close
//! - Explicit, injectable diagnostic sink for worker threads
//!
//! # Example
//!
//! ```rust,no_run
//! use gzvol::{DataType, ImageDescriptor, SegmentedImageStore, StoreOptions};
//!
//! # fn example() -> gzvol::Result<()> {
//! let descriptor = ImageDescriptor::new("mask", DataType::U8, vec![64, 64, 32])
//!     .with_segment_files("/data/mask", 2, 0);
//!
//! let mut store = SegmentedImageStore::open(descriptor, StoreOptions::create())?;
//! store.data_mut()[0] = 1;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod gz;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports
pub use config::Config;
pub use descriptor::{FileSegmentRef, ImageDescriptor};
pub use diagnostics::{DiagnosticSink, LogLevel, SinkActivation};
pub use error::{Result, StoreError};
pub use gz::{CompressionLevel, GzStream, OpenMode};
pub use store::{SegmentLayout, SegmentedImageStore, StoreOptions, UNBOUNDED_SEGMENT};
pub use types::DataType;

/// Version of the crate
pub const GZVOL_VERSION: &str = env!("CARGO_PKG_VERSION");
