use crate::{Result, TransferError};

/// The five-call block-device surface consumed by a disk-image conversion tool.
///
/// Calls take `&self` so a caller may share the device between threads; implementations
/// serialize the data path internally.
pub trait BlockDevice {
    /// Capacity in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` with the bytes at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Make `[offset, offset + len)` read back as zeros. `may_trim` allows deallocating the range
    /// instead of writing zeros.
    fn zero(&self, offset: u64, len: u64, may_trim: bool) -> Result<()>;

    /// Tear the device down, committing or discarding what was written.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Reject requests that reach past `capacity`.
pub(crate) fn check_bounds(offset: u64, len: u64, capacity: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(TransferError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}
