//! Staging buffers, the picture pool and the GL textures fed from them.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::alloc::FrameAllocator;
use crate::buffer::StagingBuffer;
use crate::error::{AllocationError, BackendError};
use crate::format::{Profile, TextureLayout, VideoFormat};
use crate::gl::{self, ContextGuard, Gl, GlContext};
use crate::picture::{Picture, PictureHooks, PicturePool, Plane};
use crate::pipeline::{self, UploadRegion};

/// Where a client-storage texture lives on the dual-texture profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageHint {
    /// Texture memory mapped from the staging buffer over the bus.
    #[default]
    Shared,
    /// Driver-managed copy in video memory.
    Cached,
}

impl StorageHint {
    fn gl_code(self) -> u32 {
        match self {
            StorageHint::Shared => gl::STORAGE_SHARED_APPLE,
            StorageHint::Cached => gl::STORAGE_CACHED_APPLE,
        }
    }
}

/// State reachable both from the backend and from pool hooks.
pub(crate) struct Shared {
    pub(crate) context: Arc<dyn GlContext>,
    pub(crate) layout: TextureLayout,
    pub(crate) storage_hint: StorageHint,
    /// Texture names, one per unit; empty until created.
    pub(crate) textures: Mutex<Vec<u32>>,
}

impl Shared {
    /// Creates the textures if they do not exist yet. Returns whether they exist.
    ///
    /// The caller holds the context.
    pub(crate) fn ensure_textures(&self, gl: &dyn Gl, buffers: &[Arc<StagingBuffer>]) -> bool {
        let mut textures = self.textures.lock();
        if textures.is_empty() && !buffers.is_empty() {
            *textures = create_textures(gl, &self.layout, self.storage_hint, buffers);
            tracing::debug!(textures = ?*textures, "created display textures");
        }
        !textures.is_empty()
    }

    pub(crate) fn take_textures(&self) -> Vec<u32> {
        std::mem::take(&mut *self.textures.lock())
    }
}

/// The CPU side of the texture set: staging buffers and the pool built over
/// them. Both are absent until the first pool request.
#[derive(Default)]
pub(crate) struct TextureSet {
    pool: Option<PicturePool>,
    buffers: Vec<Arc<StagingBuffer>>,
}

impl TextureSet {
    pub(crate) fn buffers(&self) -> &[Arc<StagingBuffer>] {
        &self.buffers
    }

    pub(crate) fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns the pool, building it and the textures on first use.
    pub(crate) fn pool(
        &mut self,
        shared: &Arc<Shared>,
        format: &VideoFormat,
        allocator: &dyn FrameAllocator,
    ) -> Result<PicturePool, BackendError> {
        if let Some(pool) = &self.pool {
            if shared.textures.lock().is_empty() {
                self.try_create_textures(shared);
            }
            return Ok(pool.clone());
        }

        let (pool, buffers) = build_pool(shared, format, allocator)?;
        tracing::debug!(
            pictures = pool.len(),
            bytes = shared.layout.staging_len(),
            profile = %shared.layout.profile,
            "picture pool ready"
        );
        self.pool = Some(pool.clone());
        self.buffers = buffers;
        self.try_create_textures(shared);
        Ok(pool)
    }

    fn try_create_textures(&self, shared: &Shared) {
        match ContextGuard::acquire(&*shared.context) {
            Ok(guard) => {
                shared.ensure_textures(&*guard, &self.buffers);
            }
            Err(err) => {
                tracing::warn!(error = %err, "context unavailable, texture creation deferred");
            }
        }
    }

    /// Hands the pool and then every buffer back to the allocator.
    pub(crate) fn release(&mut self, allocator: &dyn FrameAllocator) {
        if let Some(pool) = self.pool.take() {
            allocator.release_pool(pool);
            for buffer in self.buffers.drain(..) {
                allocator.free_buffer(buffer);
            }
        }
    }
}

fn build_pool(
    shared: &Arc<Shared>,
    format: &VideoFormat,
    allocator: &dyn FrameAllocator,
) -> Result<(PicturePool, Vec<Arc<StagingBuffer>>), BackendError> {
    let layout = &shared.layout;
    let mut buffers = Vec::with_capacity(layout.units);
    let mut pictures = Vec::with_capacity(layout.units);

    let plane = Plane {
        pitch: format.width as usize * layout.pixel_size as usize,
        lines: format.height as usize,
    };
    let bound = layout.profile == Profile::DualTextureDirect;

    let built: Result<(), AllocationError> = (|| {
        for unit in 0..layout.units {
            let buffer = allocator.alloc_buffer(layout.staging_len())?;
            buffers.push(Arc::clone(&buffer));
            let unit = bound.then_some(unit);
            pictures.push(allocator.new_picture(format, plane, buffer, unit)?);
        }
        Ok(())
    })();

    let result = built.and_then(|()| {
        let hooks: Option<Arc<dyn PictureHooks>> = bound.then(|| {
            Arc::new(ClientStorageHooks {
                shared: Arc::downgrade(shared),
            }) as Arc<dyn PictureHooks>
        });
        allocator.new_pool(std::mem::take(&mut pictures), hooks)
    });

    match result {
        Ok(pool) => Ok((pool, buffers)),
        Err(err) => {
            for picture in pictures {
                allocator.delete_picture(picture);
            }
            for buffer in buffers {
                allocator.free_buffer(buffer);
            }
            tracing::debug!(error = %err, "picture pool creation rolled back");
            Err(err.into())
        }
    }
}

fn create_textures(
    gl: &dyn Gl,
    layout: &TextureLayout,
    hint: StorageHint,
    buffers: &[Arc<StagingBuffer>],
) -> Vec<u32> {
    let target = layout.target;
    let textures = gl.gen_textures(layout.units);

    for (&texture, buffer) in textures.iter().zip(buffers) {
        gl.bind_texture(target, texture);

        if layout.profile != Profile::Constrained {
            gl.tex_parameter_f(target, gl::TEXTURE_PRIORITY, 1.0);
            gl.tex_env_i(gl::TEXTURE_ENV, gl::TEXTURE_ENV_MODE, gl::MODULATE as i32);
        }

        gl.tex_parameter_i(target, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
        gl.tex_parameter_i(target, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
        gl.tex_parameter_i(target, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i(target, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);

        if layout.profile == Profile::DualTextureDirect {
            // Texture storage aliases the staging buffer instead of a driver copy.
            gl.enable(gl::UNPACK_CLIENT_STORAGE_APPLE);
            gl.pixel_store_i(gl::UNPACK_CLIENT_STORAGE_APPLE, 1);
            gl.tex_parameter_i(target, gl::TEXTURE_STORAGE_HINT_APPLE, hint.gl_code() as i32);
        }

        // Storage is defined once here; frames only ever update sub-regions.
        let pixels = buffer.lock();
        gl.tex_image_2d(
            target,
            0,
            layout.format,
            layout.width,
            layout.height,
            layout.format,
            layout.ty,
            Some(&*pixels),
        );
    }

    textures
}

/// Re-uploads a picture's texture when it is checked out, before the producer
/// overwrites the buffer.
struct ClientStorageHooks {
    shared: Weak<Shared>,
}

impl PictureHooks for ClientStorageHooks {
    fn on_checkout(&self, picture: &Picture) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some(unit) = picture.texture_unit() else {
            return;
        };
        let region = match UploadRegion::of(&shared.layout, picture) {
            Ok(region) => region,
            Err(err) => {
                tracing::warn!(unit, error = %err, "skipping checkout upload");
                return;
            }
        };
        let Ok(guard) = ContextGuard::acquire(&*shared.context) else {
            return;
        };
        let textures = shared.textures.lock();
        if let Some(&texture) = textures.get(unit) {
            guard.bind_texture(shared.layout.target, texture);
            pipeline::upload(&*guard, &shared.layout, picture, region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Capabilities;
    use crate::chroma::Chroma;
    use crate::format::negotiate;
    use crate::recording::{Call, CallLog, RecordingAllocator, RecordingContext};

    fn shared(context: Arc<RecordingContext>, profile: Profile) -> (Arc<Shared>, VideoFormat) {
        let caps = Capabilities {
            fragment_program: None,
            non_power_of_two_textures: true,
        };
        let (format, layout) =
            negotiate(&VideoFormat::new(Chroma::I420, 64, 32), profile, &caps).unwrap();
        let shared = Arc::new(Shared {
            context,
            layout,
            storage_hint: StorageHint::Shared,
            textures: Mutex::new(Vec::new()),
        });
        (shared, format)
    }

    #[test]
    fn dual_profile_builds_bound_pictures_with_hooks() {
        let context = Arc::new(RecordingContext::builder().build());
        let (shared, format) = shared(context.clone(), Profile::DualTextureDirect);
        let allocator = RecordingAllocator::new(context.log());
        let mut set = TextureSet::default();

        let pool = set.pool(&shared, &format, &allocator).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.has_hooks());
        assert_eq!(pool.pictures()[1].texture_unit(), Some(1));
        assert_eq!(pool.pictures()[0].plane().pitch, 64 * 2);
        assert_eq!(shared.textures.lock().len(), 2);

        let calls = context.calls();
        assert!(calls.contains(&Call::PixelStoreI {
            pname: gl::UNPACK_CLIENT_STORAGE_APPLE,
            param: 1
        }));
        assert!(calls.contains(&Call::TexParameterI {
            target: gl::TEXTURE_RECTANGLE,
            pname: gl::TEXTURE_STORAGE_HINT_APPLE,
            param: gl::STORAGE_SHARED_APPLE as i32,
        }));
        let full_uploads = calls
            .iter()
            .filter(|call| matches!(call, Call::TexImage2D { .. }))
            .count();
        assert_eq!(full_uploads, 2);

        set.release(&allocator);
        assert_eq!(allocator.live_buffers(), 0);
        assert_eq!(allocator.live_pictures(), 0);
    }

    #[test]
    fn constrained_profile_skips_priority_and_env() {
        let context = Arc::new(RecordingContext::builder().build());
        let (shared, format) = shared(context.clone(), Profile::Constrained);
        let allocator = RecordingAllocator::new(context.log());
        let mut set = TextureSet::default();

        let pool = set.pool(&shared, &format, &allocator).unwrap();
        assert!(!pool.has_hooks());
        assert_eq!(pool.pictures()[0].texture_unit(), None);
        let calls = context.calls();
        assert!(!calls
            .iter()
            .any(|call| matches!(call, Call::TexParameterF { .. } | Call::TexEnvI { .. })));
        assert!(calls.contains(&Call::TexParameterI {
            target: gl::TEXTURE_2D,
            pname: gl::TEXTURE_WRAP_T,
            param: gl::CLAMP_TO_EDGE as i32,
        }));
        set.release(&allocator);
    }

    #[test]
    fn checkout_reuploads_the_leased_texture() {
        let context = Arc::new(RecordingContext::builder().build());
        let (shared, format) = shared(context.clone(), Profile::DualTextureDirect);
        let allocator = RecordingAllocator::new(CallLog::new());
        let mut set = TextureSet::default();
        let pool = set.pool(&shared, &format, &allocator).unwrap();
        let textures = shared.textures.lock().clone();
        context.clear_calls();

        let _first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!(second.texture_unit(), Some(1));

        let binds: Vec<u32> = context
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::BindTexture { texture, .. } => Some(*texture),
                _ => None,
            })
            .collect();
        assert_eq!(binds, textures);
        let uploads = context
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::TexSubImage2D { width: 64, height: 32, .. }))
            .count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn hooks_do_nothing_once_the_backend_is_gone() {
        let context = Arc::new(RecordingContext::builder().build());
        let (shared, format) = shared(context.clone(), Profile::DualTextureDirect);
        let allocator = RecordingAllocator::new(CallLog::new());
        let mut set = TextureSet::default();
        let pool = set.pool(&shared, &format, &allocator).unwrap();
        drop(shared);
        context.clear_calls();

        assert!(pool.acquire().is_some());
        assert!(context.calls().is_empty());
    }
}
