use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::alloc::{FrameAllocator, SystemAllocator};
use crate::caps::Capabilities;
use crate::error::BackendError;
use crate::format::{negotiate, Profile, TextureLayout, VideoFormat};
use crate::gl::{self, ContextGuard, GlContext};
use crate::picture::{Picture, PicturePool};
use crate::pipeline;
use crate::program::FragmentProgram;
use crate::textures::{Shared, StorageHint, TextureSet};

/// Construction-time choices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOptions {
    /// Overrides the build target's profile.
    pub profile: Option<Profile>,
    /// `!!ARBfp1.0` source to build when the context supports it.
    pub fragment_program: Option<String>,
    pub storage_hint: StorageHint,
}

/// Displays decoded frames on one graphics context.
///
/// Dropping the backend deletes its GPU objects (when the context can still
/// be acquired) and then returns the pool and staging buffers to the
/// allocator.
pub struct DisplayBackend {
    shared: Arc<Shared>,
    format: VideoFormat,
    caps: Capabilities,
    program: Option<FragmentProgram>,
    textures: TextureSet,
    allocator: Arc<dyn FrameAllocator>,
}

impl DisplayBackend {
    /// Probes `context`, negotiates a display format and rewrites `format`
    /// with it.
    pub fn new(
        context: Arc<dyn GlContext>,
        format: &mut VideoFormat,
        options: BackendOptions,
    ) -> Result<Self, BackendError> {
        Self::with_allocator(context, format, options, Arc::new(SystemAllocator))
    }

    pub fn with_allocator(
        context: Arc<dyn GlContext>,
        format: &mut VideoFormat,
        options: BackendOptions,
        allocator: Arc<dyn FrameAllocator>,
    ) -> Result<Self, BackendError> {
        let profile = options.profile.unwrap_or_else(Profile::native);

        let guard = ContextGuard::acquire(&*context)?;
        let caps = Capabilities::probe(&guard, profile);
        let (negotiated, layout) = negotiate(format, profile, &caps)?;

        let program = match (caps.fragment_program, options.fragment_program.as_deref()) {
            (Some(entry), Some(source)) => FragmentProgram::build(&*guard, entry, source),
            _ => None,
        };

        guard.disable(gl::BLEND);
        guard.disable(gl::DEPTH_TEST);
        guard.depth_mask(false);
        guard.disable(gl::CULL_FACE);
        guard.clear_color(0.0, 0.0, 0.0, 1.0);
        guard.clear(gl::COLOR_BUFFER_BIT);
        drop(guard);

        *format = negotiated;
        tracing::debug!(
            %profile,
            chroma = %negotiated.chroma,
            program = program.as_ref().map_or(0, FragmentProgram::id),
            "display backend ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                context,
                layout,
                storage_hint: options.storage_hint,
                textures: Mutex::new(Vec::new()),
            }),
            format: negotiated,
            caps,
            program,
            textures: TextureSet::default(),
            allocator,
        })
    }

    /// The negotiated format every submitted frame must use.
    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn layout(&self) -> &TextureLayout {
        &self.shared.layout
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Id of the active fragment program, 0 on the fixed-function path.
    pub fn program_id(&self) -> u32 {
        self.program.as_ref().map_or(0, FragmentProgram::id)
    }

    /// Texture names created so far, empty until the first successful pool
    /// request with the context available.
    pub fn texture_names(&self) -> Vec<u32> {
        self.shared.textures.lock().clone()
    }

    /// Returns the picture pool, creating buffers and textures on first call.
    ///
    /// Later calls return the same pool. A failed first call leaves no state
    /// behind and may be retried.
    pub fn pool(&mut self) -> Result<PicturePool, BackendError> {
        self.textures
            .pool(&self.shared, &self.format, self.allocator.as_ref())
    }

    /// Stages `picture` for the next [`display`](Self::display).
    pub fn prepare(&mut self, picture: &Picture) -> Result<(), BackendError> {
        let guard = ContextGuard::acquire(&*self.shared.context)?;
        self.shared.ensure_textures(&*guard, self.textures.buffers());
        let textures = self.shared.textures.lock();
        pipeline::stage(
            &*guard,
            &self.shared.layout,
            &textures,
            self.textures.buffers(),
            picture,
        )
    }

    /// Draws the visible crop of `source` and presents it.
    ///
    /// The crop must lie inside the negotiated frame.
    pub fn display(&self, source: &VideoFormat) -> Result<(), BackendError> {
        source.ensure_crop_within(self.format.width, self.format.height)?;
        let guard = ContextGuard::acquire(&*self.shared.context)?;
        pipeline::draw(&*guard, &self.shared.layout, self.program_id(), source);
        guard.swap();
        Ok(())
    }

    fn teardown(&mut self) {
        match ContextGuard::acquire(&*self.shared.context) {
            Ok(guard) => {
                guard.finish();
                guard.flush();
                let textures = self.shared.take_textures();
                if !textures.is_empty() {
                    guard.delete_textures(&textures);
                }
                if let Some(program) = self.program.take() {
                    program.delete(&*guard);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "context unavailable, skipping GPU teardown");
            }
        }
        if self.textures.has_pool() {
            self.textures.release(self.allocator.as_ref());
        }
    }
}

impl Drop for DisplayBackend {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for DisplayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayBackend")
            .field("format", &self.format)
            .field("layout", &self.shared.layout)
            .field("program", &self.program_id())
            .field("pool", &self.textures.has_pool())
            .finish()
    }
}
