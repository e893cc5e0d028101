//! Shared atomic byte region backing table rows.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// A fixed-size byte region shared between threads.
///
/// This is the arena primitive for table rows: a single logical writer per
/// byte range (the local participant for its own row, a transport channel for
/// remote rows) with any number of concurrent readers. Accesses are relaxed
/// per-byte atomics, so a reader racing a multi-byte write can observe a torn
/// value; the table's consistency model treats remote rows as eventually
/// consistent, never synchronously fresh, so torn reads are accepted.
///
/// All accessors are bounds-checked and panic on violation. Out-of-range
/// access is a local usage bug, not a recoverable condition.
#[derive(Clone)]
pub struct SharedBytes {
    bytes: Arc<[AtomicU8]>,
}

impl SharedBytes {
    /// Allocate a zero-filled region of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        let bytes: Arc<[AtomicU8]> = (0..len).map(|_| AtomicU8::new(0)).collect();
        Self { bytes }
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Load a single byte.
    pub fn load(&self, offset: usize) -> u8 {
        self.bytes[offset].load(Ordering::Relaxed)
    }

    /// Store a single byte.
    pub fn store(&self, offset: usize, value: u8) {
        self.bytes[offset].store(value, Ordering::Relaxed);
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    pub fn read_into(&self, offset: usize, out: &mut [u8]) {
        self.check_range(offset, out.len());
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.bytes[offset + i].load(Ordering::Relaxed);
        }
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn write_from(&self, offset: usize, src: &[u8]) {
        self.check_range(offset, src.len());
        for (i, byte) in src.iter().enumerate() {
            self.bytes[offset + i].store(*byte, Ordering::Relaxed);
        }
    }

    /// Copy `len` bytes from `self[src_offset..]` into `dst[dst_offset..]`.
    pub fn copy_into(&self, src_offset: usize, dst: &SharedBytes, dst_offset: usize, len: usize) {
        self.check_range(src_offset, len);
        dst.check_range(dst_offset, len);
        for i in 0..len {
            let byte = self.bytes[src_offset + i].load(Ordering::Relaxed);
            dst.bytes[dst_offset + i].store(byte, Ordering::Relaxed);
        }
    }

    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.bytes.len()),
            "byte range {}..{} out of bounds for region of {} bytes",
            offset,
            offset.saturating_add(len),
            self.bytes.len()
        );
    }
}

impl std::fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBytes")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let region = SharedBytes::zeroed(16);
        assert_eq!(region.len(), 16);
        for i in 0..16 {
            assert_eq!(region.load(i), 0);
        }
    }

    #[test]
    fn test_write_and_read() {
        let region = SharedBytes::zeroed(8);
        region.write_from(2, &[0xaa, 0xbb, 0xcc]);

        let mut out = [0u8; 3];
        region.read_into(2, &mut out);
        assert_eq!(out, [0xaa, 0xbb, 0xcc]);
        assert_eq!(region.load(0), 0);
        assert_eq!(region.load(5), 0);
    }

    #[test]
    fn test_copy_between_regions() {
        let src = SharedBytes::zeroed(8);
        let dst = SharedBytes::zeroed(8);
        src.write_from(0, &[1, 2, 3, 4]);

        src.copy_into(1, &dst, 5, 3);

        let mut out = [0u8; 3];
        dst.read_into(5, &mut out);
        assert_eq!(out, [2, 3, 4]);
        assert_eq!(dst.load(0), 0);
    }

    #[test]
    fn test_clone_shares_storage() {
        let a = SharedBytes::zeroed(4);
        let b = a.clone();
        a.store(1, 42);
        assert_eq!(b.load(1), 42);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_read_out_of_bounds_panics() {
        let region = SharedBytes::zeroed(4);
        let mut out = [0u8; 2];
        region.read_into(3, &mut out);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_write_out_of_bounds_panics() {
        let region = SharedBytes::zeroed(4);
        region.write_from(4, &[1]);
    }
}
