//! Segmented image store - the main API for loading and storing voxel buffers
//!
//! An image may be split across several gzip-compressed files. Each file holds
//! an opaque lead-in followed by an equal share of the voxel payload. The store
//! decompresses every file's payload into one contiguous buffer on open and,
//! when opened read-write, rewrites every file from scratch on close.

use crate::config::Config;
use crate::descriptor::ImageDescriptor;
use crate::diagnostics::DiagnosticSink;
use crate::error::{Result, StoreError};
use crate::gz::{CompressionLevel, GzStream, OpenMode};
use crate::utils::{bytes_for_voxels, format_bytes};
use futures::future::try_join_all;
use std::ops::Range;
use tracing::{debug, error, trace};

/// `segment_voxel_count` of a store whose whole buffer is one addressable region
pub const UNBOUNDED_SEGMENT: usize = usize::MAX;

/// How the buffer is exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLayout {
    /// One address covering the whole buffer
    ByteGranular,
    /// One address per file, for 1-bit data spread over several files
    BitPacked,
}

/// Options controlling how a store is opened and closed
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Create the image from scratch instead of loading its files
    pub is_new: bool,

    /// Write the buffer back to the files on close
    pub read_write: bool,

    /// Bytes preceding the payload in every file
    pub lead_in: Option<Vec<u8>>,

    /// Gzip level for write-back
    pub compression: CompressionLevel,

    /// Reject voxel counts that do not split evenly across the files
    pub strict_layout: bool,

    /// Where error conditions are reported
    pub sink: Option<DiagnosticSink>,
}

impl StoreOptions {
    /// Options for a brand-new image, written on close
    pub fn create() -> Self {
        Self {
            is_new: true,
            read_write: true,
            ..Default::default()
        }
    }

    /// Options for loading existing files without writing them back
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Options for loading existing files and writing them back on close
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Defaults taken from a configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            compression: config.compression_level,
            ..Default::default()
        }
    }

    pub fn with_new(mut self, is_new: bool) -> Self {
        self.is_new = is_new;
        self
    }

    pub fn with_read_write(mut self, read_write: bool) -> Self {
        self.read_write = read_write;
        self
    }

    pub fn with_lead_in(mut self, lead_in: impl Into<Vec<u8>>) -> Self {
        self.lead_in = Some(lead_in.into());
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    pub fn with_strict_layout(mut self, strict: bool) -> Self {
        self.strict_layout = strict;
        self
    }

    pub fn with_sink(mut self, sink: DiagnosticSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// Voxel buffer backed by one or more gzip-compressed files
#[derive(Debug)]
pub struct SegmentedImageStore {
    descriptor: ImageDescriptor,
    options: StoreOptions,
    segment_voxel_count: usize,
    bytes_per_segment: usize,
    buffer: Vec<u8>,
    addresses: Vec<Range<usize>>,
    lead_in: Option<Vec<u8>>,
    closed: bool,
}

impl SegmentedImageStore {
    /// Create an unloaded store; [`load`](Self::load) allocates and fills it.
    pub fn new(descriptor: ImageDescriptor, mut options: StoreOptions) -> Self {
        let lead_in = options.lead_in.take();
        Self {
            descriptor,
            options,
            segment_voxel_count: 0,
            bytes_per_segment: 0,
            buffer: Vec::new(),
            addresses: Vec::new(),
            lead_in,
            closed: false,
        }
    }

    /// Create and load a store in one step
    pub fn open(descriptor: ImageDescriptor, options: StoreOptions) -> Result<Self> {
        let mut store = Self::new(descriptor, options);
        store.load()?;
        Ok(store)
    }

    /// Allocate the buffer and, for existing images, decompress every file
    /// into it.
    ///
    /// On failure the store stays unloaded and owns no buffer.
    pub fn load(&mut self) -> Result<()> {
        if self.is_loaded() {
            return Err(StoreError::Configuration(format!(
                "image \"{}\" is already loaded",
                self.descriptor.name
            )));
        }
        self.execute().map_err(|e| self.report(e))
    }

    fn execute(&mut self) -> Result<()> {
        let name = &self.descriptor.name;
        let count = self.descriptor.files.len();
        if count == 0 {
            return Err(StoreError::Configuration(format!(
                "no files specified in header for image \"{}\"",
                name
            )));
        }

        let voxels = self.descriptor.checked_voxel_count().ok_or_else(|| {
            StoreError::Capacity(format!(
                "voxel count of image \"{}\" overflows the address space",
                name
            ))
        })?;
        if self.options.strict_layout && voxels % count != 0 {
            return Err(StoreError::Configuration(format!(
                "{} voxels of image \"{}\" do not split evenly across {} files",
                voxels, name, count
            )));
        }
        let segment_voxel_count = voxels / count;

        let bits = self.descriptor.datatype.bits();
        let segment_bytes = bytes_for_voxels(bits, segment_voxel_count);
        let total = segment_bytes * count as u128;
        if total > isize::MAX as u128 {
            return Err(StoreError::Capacity(format!(
                "image \"{}\" is larger than maximum accessible memory",
                name
            )));
        }
        let bytes_per_segment = segment_bytes as usize;
        let total = total as usize;

        let mut buffer = Vec::new();
        buffer.try_reserve_exact(total).map_err(|e| {
            StoreError::Allocation(format!(
                "failed to allocate memory for image \"{}\": {}",
                name, e
            ))
        })?;
        buffer.resize(total, 0);

        debug!(
            image = %name,
            files = count,
            size = %format_bytes(total),
            "loading image"
        );
        if !self.options.is_new {
            self.read_segments(&mut buffer, bytes_per_segment)?;
        }
        if self.options.read_write {
            self.check_lead_in()?;
        }

        let bit_packed = self.descriptor.datatype.is_bit_packed() && count > 1;
        self.addresses = if bit_packed {
            (0..count)
                .map(|n| n * bytes_per_segment..(n + 1) * bytes_per_segment)
                .collect()
        } else {
            vec![0..total]
        };
        self.segment_voxel_count = if bit_packed {
            segment_voxel_count
        } else {
            UNBOUNDED_SEGMENT
        };
        self.bytes_per_segment = bytes_per_segment;
        self.buffer = buffer;

        trace!(
            image = %self.descriptor.name,
            addresses = self.addresses.len(),
            "image loaded"
        );
        Ok(())
    }

    /// Fill `buffer` from the files, capturing the lead-in from the first
    /// file when none was supplied.
    fn read_segments(&mut self, buffer: &mut [u8], bytes_per_segment: usize) -> Result<()> {
        let capture = self.lead_in.is_none()
            && self.descriptor.files.first().is_some_and(|f| f.start > 0);

        for (n, file) in self.descriptor.files.iter().enumerate() {
            trace!(file = %file.name.display(), start = file.start, "reading segment");
            let mut stream = GzStream::open(&file.name, OpenMode::Read)?;
            if n == 0 && capture {
                let size = usize::try_from(file.start).map_err(|_| {
                    StoreError::Capacity(format!(
                        "lead-in of \"{}\" is too large",
                        file.name.display()
                    ))
                })?;
                let mut lead_in = vec![0u8; size];
                stream.read_exact(&mut lead_in)?;
                self.lead_in = Some(lead_in);
            } else {
                stream.seek(file.start)?;
            }
            let offset = n * bytes_per_segment;
            stream.read_exact(&mut buffer[offset..offset + bytes_per_segment])?;
        }
        Ok(())
    }

    /// Every file must start its payload right after the lead-in
    fn check_lead_in(&self) -> Result<()> {
        let size = self.lead_in_size() as u64;
        match self.descriptor.files.iter().find(|f| f.start != size) {
            Some(file) => Err(StoreError::Configuration(format!(
                "data in \"{}\" starts at {} but the lead-in is {} bytes",
                file.name.display(),
                file.start,
                size
            ))),
            None => Ok(()),
        }
    }

    /// Write back (if read-write) and release the buffer.
    ///
    /// Dropping the store does the same but can only report errors.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        self.closed = true;
        let buffer = std::mem::take(&mut self.buffer);
        let loaded = !std::mem::take(&mut self.addresses).is_empty();

        let result = if loaded && self.options.read_write {
            self.write_segments(&buffer)
        } else {
            Ok(())
        };
        drop(buffer);
        self.lead_in = None;
        result.map_err(|e| self.report(e))
    }

    fn write_segments(&self, buffer: &[u8]) -> Result<()> {
        let lead_in_size = self.lead_in_size() as u64;
        let bytes_per_segment = self.bytes_per_segment;
        debug!(
            image = %self.descriptor.name,
            files = self.descriptor.files.len(),
            "writing image"
        );

        for (n, file) in self.descriptor.files.iter().enumerate() {
            assert_eq!(
                file.start,
                lead_in_size,
                "payload offset of \"{}\" no longer matches the lead-in",
                file.name.display()
            );
            trace!(file = %file.name.display(), "writing segment");
            let mut stream =
                GzStream::open_with_level(&file.name, OpenMode::Write, self.options.compression)?;
            if let Some(lead_in) = &self.lead_in {
                stream.write(lead_in)?;
            }
            let offset = n * bytes_per_segment;
            stream.write(&buffer[offset..offset + bytes_per_segment])?;
            stream.finish()?;
        }
        Ok(())
    }

    fn report(&self, err: StoreError) -> StoreError {
        if let Some(sink) = &self.options.sink {
            sink.error(&err.to_string());
        }
        err
    }

    /// Open on the blocking thread pool
    pub async fn open_async(descriptor: ImageDescriptor, options: StoreOptions) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(descriptor, options))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Close on the blocking thread pool
    pub async fn close_async(self) -> Result<()> {
        tokio::task::spawn_blocking(move || self.close())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Open several independent images concurrently.
    ///
    /// If any fails, the stores already opened are dropped, which closes them.
    pub async fn open_all(
        descriptors: Vec<ImageDescriptor>,
        options: StoreOptions,
    ) -> Result<Vec<Self>> {
        let futures = descriptors
            .into_iter()
            .map(|descriptor| Self::open_async(descriptor, options.clone()));
        try_join_all(futures).await
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn is_loaded(&self) -> bool {
        !self.addresses.is_empty()
    }

    pub fn is_new(&self) -> bool {
        self.options.is_new
    }

    pub fn is_read_write(&self) -> bool {
        self.options.read_write
    }

    /// Number of backing files
    pub fn segment_count(&self) -> usize {
        self.descriptor.files.len()
    }

    /// Decompressed payload size of each file
    pub fn bytes_per_segment(&self) -> usize {
        self.bytes_per_segment
    }

    /// Voxels per addressable segment, or [`UNBOUNDED_SEGMENT`]
    pub fn segment_voxel_count(&self) -> usize {
        self.segment_voxel_count
    }

    pub fn layout(&self) -> SegmentLayout {
        if self.addresses.len() > 1 {
            SegmentLayout::BitPacked
        } else {
            SegmentLayout::ByteGranular
        }
    }

    /// Byte ranges of the addressable segments within [`data`](Self::data)
    pub fn segment_addresses(&self) -> &[Range<usize>] {
        &self.addresses
    }

    pub fn lead_in(&self) -> Option<&[u8]> {
        self.lead_in.as_deref()
    }

    pub fn lead_in_size(&self) -> usize {
        self.lead_in.as_ref().map_or(0, Vec::len)
    }

    /// The whole buffer
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Bytes of addressable segment `index`
    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        let range = self.addresses.get(index)?.clone();
        Some(&self.buffer[range])
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let range = self.addresses.get(index)?.clone();
        Some(&mut self.buffer[range])
    }

    /// Payload of file `n`, whatever the layout
    pub fn file_payload(&self, n: usize) -> Option<&[u8]> {
        let range = self.file_range(n)?;
        Some(&self.buffer[range])
    }

    pub fn file_payload_mut(&mut self, n: usize) -> Option<&mut [u8]> {
        let range = self.file_range(n)?;
        Some(&mut self.buffer[range])
    }

    fn file_range(&self, n: usize) -> Option<Range<usize>> {
        if !self.is_loaded() || n >= self.segment_count() {
            return None;
        }
        Some(n * self.bytes_per_segment..(n + 1) * self.bytes_per_segment)
    }

    /// Read bit `bit` of segment `index` (least significant bit first)
    pub fn get_bit(&self, index: usize, bit: usize) -> Result<bool> {
        let segment = self.segment(index).ok_or_else(|| missing_segment(index))?;
        let byte = segment
            .get(bit / 8)
            .ok_or_else(|| bit_out_of_range(bit, segment.len()))?;
        Ok((byte >> (bit % 8)) & 1 == 1)
    }

    pub fn set_bit(&mut self, index: usize, bit: usize, value: bool) -> Result<()> {
        let segment = self.segment_mut(index).ok_or_else(|| missing_segment(index))?;
        let len = segment.len();
        let byte = segment
            .get_mut(bit / 8)
            .ok_or_else(|| bit_out_of_range(bit, len))?;
        let mask = 1u8 << (bit % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        Ok(())
    }
}

fn missing_segment(index: usize) -> StoreError {
    StoreError::OutOfBounds(format!("no segment at address {}", index))
}

fn bit_out_of_range(bit: usize, len: usize) -> StoreError {
    StoreError::OutOfBounds(format!("bit {} beyond segment of {} bytes", bit, len))
}

impl Drop for SegmentedImageStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.release() {
            error!(image = %self.descriptor.name, error = %e, "failed to close image");
        }
    }
}
