//! Utility functions

/// Bytes needed to hold `voxels` voxels of `bits` bits each, rounded up.
///
/// Computed in 128 bits so callers can bound-check before narrowing.
pub fn bytes_for_voxels(bits: usize, voxels: usize) -> u128 {
    (bits as u128 * voxels as u128).div_ceil(8)
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
