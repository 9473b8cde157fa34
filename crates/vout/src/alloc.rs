use std::sync::Arc;

use crate::buffer::StagingBuffer;
use crate::error::AllocationError;
use crate::format::VideoFormat;
use crate::picture::{Picture, PictureHooks, PicturePool, Plane};

/// Where the backend gets CPU memory, pictures and the pool from.
///
/// Each constructor has a matching release call, invoked exactly once for
/// every object it handed out.
pub trait FrameAllocator: Send + Sync {
    fn alloc_buffer(&self, len: usize) -> Result<Arc<StagingBuffer>, AllocationError> {
        StagingBuffer::zeroed(len).map(Arc::new)
    }

    fn free_buffer(&self, buffer: Arc<StagingBuffer>) {
        drop(buffer);
    }

    fn new_picture(
        &self,
        format: &VideoFormat,
        plane: Plane,
        buffer: Arc<StagingBuffer>,
        unit: Option<usize>,
    ) -> Result<Picture, AllocationError> {
        Ok(Picture::new(*format, plane, buffer, unit))
    }

    fn delete_picture(&self, picture: Picture) {
        drop(picture);
    }

    /// Assembles the pool. On failure the pictures are disposed of through
    /// `delete_picture` before returning.
    fn new_pool(
        &self,
        pictures: Vec<Picture>,
        hooks: Option<Arc<dyn PictureHooks>>,
    ) -> Result<PicturePool, AllocationError> {
        Ok(PicturePool::new(pictures, hooks))
    }

    fn release_pool(&self, pool: PicturePool) {
        drop(pool);
    }
}

/// Plain heap allocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

impl FrameAllocator for SystemAllocator {}
