//! Voxel data types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data types a voxel buffer can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// 1-bit mask, packed eight voxels per byte
    Bit = 0,
    /// Unsigned 8-bit integer
    U8 = 1,
    /// Unsigned 16-bit integer
    U16 = 2,
    /// Unsigned 32-bit integer
    U32 = 3,
    /// Unsigned 64-bit integer
    U64 = 4,
    /// Signed 8-bit integer
    I8 = 5,
    /// Signed 16-bit integer
    I16 = 6,
    /// Signed 32-bit integer
    I32 = 7,
    /// Signed 64-bit integer
    I64 = 8,
    /// 32-bit floating point
    F32 = 9,
    /// 64-bit floating point
    F64 = 10,
    /// Complex pair of 32-bit floats
    CF32 = 11,
    /// Complex pair of 64-bit floats
    CF64 = 12,
}

impl DataType {
    /// Number of bits one voxel occupies on disk and in memory
    pub fn bits(&self) -> usize {
        match self {
            DataType::Bit => 1,
            DataType::U8 | DataType::I8 => 8,
            DataType::U16 | DataType::I16 => 16,
            DataType::U32 | DataType::I32 | DataType::F32 => 32,
            DataType::U64 | DataType::I64 | DataType::F64 | DataType::CF32 => 64,
            DataType::CF64 => 128,
        }
    }

    /// True when voxels do not fall on byte boundaries
    pub fn is_bit_packed(&self) -> bool {
        self.bits() == 1
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
