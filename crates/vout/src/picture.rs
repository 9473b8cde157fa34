//! Pooled frames handed to the decoder side.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex};

use crate::buffer::StagingBuffer;
use crate::format::VideoFormat;

/// Geometry of the single plane a picture exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plane {
    /// Bytes per line as seen by the writer.
    pub pitch: usize,
    pub lines: usize,
}

/// A frame slot wrapping one staging buffer.
#[derive(Debug)]
pub struct Picture {
    format: VideoFormat,
    plane: Plane,
    buffer: Arc<StagingBuffer>,
    unit: Option<usize>,
}

impl Picture {
    pub fn new(
        format: VideoFormat,
        plane: Plane,
        buffer: Arc<StagingBuffer>,
        unit: Option<usize>,
    ) -> Self {
        Self {
            format,
            plane,
            buffer,
            unit,
        }
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn plane(&self) -> Plane {
        self.plane
    }

    pub fn buffer(&self) -> &Arc<StagingBuffer> {
        &self.buffer
    }

    /// Texture unit this picture is permanently bound to, when the backend
    /// keeps one texture per frame.
    pub fn texture_unit(&self) -> Option<usize> {
        self.unit
    }

    /// Locks the pixel storage for writing or uploading.
    pub fn pixels(&self) -> MappedMutexGuard<'_, [u8]> {
        self.buffer.lock()
    }
}

/// Callbacks run when a picture leaves or re-enters the pool.
pub trait PictureHooks: Send + Sync {
    fn on_checkout(&self, picture: &Picture);

    fn on_checkin(&self, _picture: &Picture) {}
}

struct PoolInner {
    pictures: Vec<Picture>,
    in_use: Mutex<Vec<bool>>,
    hooks: Option<Arc<dyn PictureHooks>>,
}

/// Fixed set of pictures with exclusive checkout.
#[derive(Clone)]
pub struct PicturePool {
    inner: Arc<PoolInner>,
}

impl PicturePool {
    pub fn new(pictures: Vec<Picture>, hooks: Option<Arc<dyn PictureHooks>>) -> Self {
        let in_use = Mutex::new(vec![false; pictures.len()]);
        Self {
            inner: Arc::new(PoolInner {
                pictures,
                in_use,
                hooks,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.pictures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pictures.is_empty()
    }

    pub fn pictures(&self) -> &[Picture] {
        &self.inner.pictures
    }

    /// Number of pictures not currently checked out.
    pub fn available(&self) -> usize {
        self.inner.in_use.lock().iter().filter(|used| !**used).count()
    }

    pub fn has_hooks(&self) -> bool {
        self.inner.hooks.is_some()
    }

    /// Checks out a free picture, or `None` when every slot is leased.
    pub fn acquire(&self) -> Option<PictureLease> {
        let index = {
            let mut in_use = self.inner.in_use.lock();
            let index = in_use.iter().position(|used| !used)?;
            in_use[index] = true;
            index
        };
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_checkout(&self.inner.pictures[index]);
        }
        Some(PictureLease {
            pool: self.clone(),
            index,
        })
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Takes the pictures back once every other handle is gone.
    pub fn into_pictures(self) -> Result<Vec<Picture>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Ok(inner.pictures),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl std::fmt::Debug for PicturePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PicturePool")
            .field("pictures", &self.len())
            .field("available", &self.available())
            .field("hooks", &self.has_hooks())
            .finish()
    }
}

/// A checked-out picture. Dropping it returns the slot to the pool.
pub struct PictureLease {
    pool: PicturePool,
    index: usize,
}

impl PictureLease {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for PictureLease {
    type Target = Picture;

    fn deref(&self) -> &Picture {
        &self.pool.inner.pictures[self.index]
    }
}

impl Drop for PictureLease {
    fn drop(&mut self) {
        let inner = &self.pool.inner;
        if let Some(hooks) = &inner.hooks {
            hooks.on_checkin(&inner.pictures[self.index]);
        }
        inner.in_use.lock()[self.index] = false;
    }
}

impl std::fmt::Debug for PictureLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PictureLease")
            .field("index", &self.index)
            .finish()
    }
}
