//! Video output through a GL-style graphics context.
//!
//! `vout` takes decoded frames in CPU memory and puts them on screen through
//! textures. The flow is:
//!
//! ```text
//!   DisplayBackend::new ──▶ probe caps ──▶ negotiate format ──▶ render state
//!          │
//!          ▼
//!   pool() ──▶ staging buffers ──▶ pictures ──▶ PicturePool ──▶ GL textures
//!          │
//!          ▼
//!   per frame: lease ─▶ fill ─▶ prepare() ─▶ display() ─▶ swap
//!          │
//!          ▼
//!   Drop ──▶ delete textures/program ──▶ release pool ──▶ free buffers
//! ```
//!
//! The context itself is abstracted by [`GlContext`] and [`Gl`]; `vout-wgpu`
//! provides a headless implementation, and the `recording` module (built with
//! the `testing` feature) an instrumented one for tests.

mod alloc;
mod backend;
mod buffer;
mod caps;
mod chroma;
mod error;
mod format;
pub mod gl;
mod picture;
mod pipeline;
mod program;
#[cfg(any(test, feature = "testing"))]
pub mod recording;
mod textures;

pub use alloc::{FrameAllocator, SystemAllocator};
pub use backend::{BackendOptions, DisplayBackend};
pub use buffer::{StagingBuffer, STAGING_ALIGNMENT};
pub use caps::{Capabilities, ProgramEntryPoints};
pub use chroma::{describe, Chroma, ChromaDescription, PlaneRatio};
pub use error::{AllocationError, BackendError, ContextError};
pub use format::{aligned_size, negotiate, Profile, TextureLayout, VideoFormat};
pub use gl::{ContextGuard, Gl, GlContext, Primitive, ProcAddress, Quad};
pub use picture::{Picture, PictureHooks, PictureLease, PicturePool, Plane};
pub use pipeline::{display_quad, texture_coords};
pub use program::FragmentProgram;
pub use textures::StorageHint;
