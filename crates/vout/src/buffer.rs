use bytemuck::{Pod, Zeroable};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::AllocationError;

pub const STAGING_ALIGNMENT: usize = 16;

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(16))]
struct Block([u8; STAGING_ALIGNMENT]);

/// CPU-side pixel storage backing one texture unit.
///
/// The start of the byte range is always 16-byte aligned. Writers (the frame
/// producer) and readers (texture uploads) go through [`StagingBuffer::lock`].
pub struct StagingBuffer {
    len: usize,
    blocks: Mutex<Vec<Block>>,
}

impl StagingBuffer {
    /// Allocates `len` zeroed bytes, reporting exhaustion instead of aborting.
    pub fn zeroed(len: usize) -> Result<Self, AllocationError> {
        let count = len.div_ceil(STAGING_ALIGNMENT);
        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(count)
            .map_err(|_| AllocationError::Buffer { len })?;
        blocks.resize(count, Block::zeroed());
        Ok(Self {
            len,
            blocks: Mutex::new(blocks),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Locks the buffer and exposes exactly `len` bytes.
    pub fn lock(&self) -> MappedMutexGuard<'_, [u8]> {
        let len = self.len;
        MutexGuard::map(self.blocks.lock(), move |blocks| {
            &mut bytemuck::cast_slice_mut::<Block, u8>(blocks)[..len]
        })
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_aligned_and_zeroed() {
        for len in [1usize, 15, 16, 17, 4096 * 3 + 5] {
            let buffer = StagingBuffer::zeroed(len).unwrap();
            let bytes = buffer.lock();
            assert_eq!(bytes.len(), len);
            assert_eq!(bytes.as_ptr() as usize % STAGING_ALIGNMENT, 0);
            assert!(bytes.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn writes_are_visible_to_later_locks() {
        let buffer = StagingBuffer::zeroed(8).unwrap();
        buffer.lock().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&*buffer.lock(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn impossible_sizes_fail_cleanly() {
        let err = StagingBuffer::zeroed(usize::MAX - 64).unwrap_err();
        assert_eq!(err, AllocationError::Buffer { len: usize::MAX - 64 });
    }
}
