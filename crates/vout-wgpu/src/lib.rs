//! Headless [`vout::GlContext`] on top of `wgpu`.
//!
//! ```text
//!   vout::DisplayBackend ──▶ Gl commands ──▶ WgpuContext
//!                                              │ tex uploads ─▶ CPU convert ─▶ RGBA8 textures
//!                                              │ clear/draw  ─▶ queued
//!                                              └ swap        ─▶ one render pass ─▶ off-screen target
//! ```
//!
//! No extension entry points resolve, so fragment programs are never offered
//! and the backend always takes the fixed-function path.

mod context;
pub mod convert;
mod device;
mod shader;

pub use context::{RgbaFrame, WgpuContext};
