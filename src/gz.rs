//! Gzip-compressed file streams
//!
//! A backing file is gzip data over `lead-in ‖ payload`. Reading accepts any
//! number of concatenated members and is sequential: seeking decompresses and
//! discards. Writing always truncates and produces a single member.

use crate::error::{Result, StoreError};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

impl From<u8> for CompressionLevel {
    fn from(level: u8) -> Self {
        Self::new(level)
    }
}

impl From<CompressionLevel> for u8 {
    fn from(level: CompressionLevel) -> Self {
        level.0
    }
}

/// How a stream is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// "rb"
    Read,
    /// "wb" - creates or truncates
    Write,
}

impl OpenMode {
    /// Parse a mode string ("rb" / "wb", the "b" is optional)
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "r" | "rb" => Ok(OpenMode::Read),
            "w" | "wb" => Ok(OpenMode::Write),
            _ => Err(StoreError::Configuration(format!(
                "Unsupported stream mode: {}",
                mode
            ))),
        }
    }
}

enum Inner {
    Reader(MultiGzDecoder<BufReader<File>>),
    Writer(GzEncoder<BufWriter<File>>),
}

/// An open gzip stream over one file
pub struct GzStream {
    path: PathBuf,
    inner: Option<Inner>,
    position: u64,
}

impl GzStream {
    /// Open a file for reading or writing at the default compression level
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open_with_level(path, mode, CompressionLevel::default())
    }

    /// Open a file, compressing writes at `level`
    pub fn open_with_level(
        path: impl AsRef<Path>,
        mode: OpenMode,
        level: CompressionLevel,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = match mode {
            OpenMode::Read => {
                let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
                Inner::Reader(MultiGzDecoder::new(BufReader::new(file)))
            }
            OpenMode::Write => {
                let file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
                Inner::Writer(GzEncoder::new(
                    BufWriter::new(file),
                    FlateCompression::new(level.value() as u32),
                ))
            }
        };
        Ok(Self {
            path,
            inner: Some(inner),
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current offset in the decompressed stream
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move to `offset` in the decompressed stream.
    ///
    /// Only forward seeks are possible while reading; a write stream cannot
    /// seek at all.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset == self.position {
            return Ok(());
        }
        if offset < self.position {
            return Err(self.error(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("backward seek from {} to {}", self.position, offset),
            )));
        }

        let wanted = offset - self.position;
        let skipped = match self.inner.as_mut() {
            Some(Inner::Reader(reader)) => {
                io::copy(&mut reader.by_ref().take(wanted), &mut io::sink())
                    .map_err(|e| StoreError::io(&self.path, e))?
            }
            _ => {
                return Err(self.error(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seek on a gzip write stream",
                )))
            }
        };
        self.position += skipped;
        if skipped < wanted {
            return Err(self.error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file ends at {} before seek target {}", self.position, offset),
            )));
        }
        Ok(())
    }

    /// Read into `buf` until it is full or the stream ends; returns the count
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let reader = match self.inner.as_mut() {
            Some(Inner::Reader(reader)) => reader,
            _ => {
                return Err(StoreError::io(
                    &self.path,
                    io::Error::new(io::ErrorKind::Unsupported, "read on a gzip write stream"),
                ))
            }
        };

        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StoreError::io(&self.path, e)),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    /// Read exactly `buf.len()` bytes; a short read is an error
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.read(buf)?;
        if got < buf.len() {
            return Err(self.error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, read {}", buf.len(), got),
            )));
        }
        Ok(())
    }

    /// Compress and write all of `buf`
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        match self.inner.as_mut() {
            Some(Inner::Writer(writer)) => {
                writer
                    .write_all(buf)
                    .map_err(|e| StoreError::io(&self.path, e))?;
                self.position += buf.len() as u64;
                Ok(())
            }
            _ => Err(self.error(io::Error::new(
                io::ErrorKind::Unsupported,
                "write on a gzip read stream",
            ))),
        }
    }

    /// Finish the gzip member and flush to disk.
    ///
    /// Dropping a write stream finishes it too, but swallows any error.
    pub fn finish(mut self) -> Result<()> {
        if let Some(Inner::Writer(writer)) = self.inner.take() {
            let mut file = writer
                .finish()
                .map_err(|e| StoreError::io(&self.path, e))?;
            file.flush().map_err(|e| StoreError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn error(&self, source: io::Error) -> StoreError {
        StoreError::io(&self.path, source)
    }
}

/// Decompress a whole file into memory
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|e| StoreError::io(path, e))?;
    Ok(data)
}

/// Compress `data` into a new file, replacing any existing content
pub fn write_all(path: impl AsRef<Path>, data: &[u8], level: CompressionLevel) -> Result<()> {
    let mut stream = GzStream::open_with_level(path, OpenMode::Write, level)?;
    stream.write(data)?;
    stream.finish()
}
