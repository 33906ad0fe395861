use std::io::{Read, Seek, SeekFrom};

use super::error::FileSourceError;
use super::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Legacy,
    PcapNg,
}

/// Read the leading magic bytes, rewind, and decide the container format.
///
/// # Errors
/// `FileSourceError::Io` when fewer than four bytes are available and
/// `FileSourceError::UnknownMagic` when the bytes match no known format.
pub fn detect_format<R: Read + Seek>(reader: &mut R) -> Result<FileFormat, FileSourceError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;

    if magic == layout::PCAPNG_MAGIC {
        Ok(FileFormat::PcapNg)
    } else if layout::LEGACY_MAGICS.contains(&magic) {
        Ok(FileFormat::Legacy)
    } else {
        Err(FileSourceError::UnknownMagic { magic })
    }
}

pub fn legacy_ts_to_seconds(ts_sec: u32, ts_frac: u32, nanosecond: bool) -> f64 {
    let scale = if nanosecond { 1e-9 } else { 1e-6 };
    ts_sec as f64 + ts_frac as f64 * scale
}

pub fn pcapng_ts_to_seconds(ts_high: u32, ts_low: u32, tsresol: u8) -> f64 {
    let ts = ((ts_high as u64) << 32) | (ts_low as u64);
    let scale = if tsresol == layout::TSRESOL_NANOS { 1e-9 } else { 1e-6 };
    ts as f64 * scale
}
