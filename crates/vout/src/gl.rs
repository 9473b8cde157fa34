//! The graphics context seam.
//!
//! `GlContext` is the windowing-side contract (make current, release, swap,
//! extension lookup) and `Gl` is the subset of GL commands the backend issues.
//! Enumerants are plain `u32` codes, named after their GL counterparts.

use std::num::NonZeroUsize;
use std::ops::Deref;

use crate::caps::ProgramEntryPoints;
use crate::error::ContextError;

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;

pub const EXTENSIONS: u32 = 0x1F03;

pub const BLEND: u32 = 0x0BE2;
pub const CULL_FACE: u32 = 0x0B44;
pub const DEPTH_TEST: u32 = 0x0B71;
pub const COLOR_BUFFER_BIT: u32 = 0x0000_4000;

pub const TEXTURE_2D: u32 = 0x0DE1;
pub const TEXTURE_RECTANGLE: u32 = 0x84F5;

pub const RGB: u32 = 0x1907;
pub const RGBA: u32 = 0x1908;
pub const YCBCR_422_APPLE: u32 = 0x85B9;

pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const UNSIGNED_SHORT_5_6_5: u32 = 0x8363;
pub const UNSIGNED_SHORT_8_8_APPLE: u32 = 0x85BA;

pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
pub const TEXTURE_WRAP_S: u32 = 0x2802;
pub const TEXTURE_WRAP_T: u32 = 0x2803;
pub const TEXTURE_PRIORITY: u32 = 0x8066;
pub const NEAREST: u32 = 0x2600;
pub const LINEAR: u32 = 0x2601;
pub const CLAMP_TO_EDGE: u32 = 0x812F;

pub const TEXTURE_ENV: u32 = 0x2300;
pub const TEXTURE_ENV_MODE: u32 = 0x2200;
pub const MODULATE: u32 = 0x2100;

pub const UNPACK_CLIENT_STORAGE_APPLE: u32 = 0x85B2;
pub const TEXTURE_STORAGE_HINT_APPLE: u32 = 0x85BC;
pub const STORAGE_CACHED_APPLE: u32 = 0x85BE;
pub const STORAGE_SHARED_APPLE: u32 = 0x85BF;

pub const FRAGMENT_PROGRAM_ARB: u32 = 0x8804;
pub const PROGRAM_FORMAT_ASCII_ARB: u32 = 0x8875;
pub const PROGRAM_ERROR_POSITION_ARB: u32 = 0x864B;
pub const PROGRAM_ERROR_STRING_ARB: u32 = 0x8874;

/// An entry point returned by the context's extension lookup.
///
/// Only its presence matters to the backend; invoking it is left to the
/// `Gl` implementation that handed it out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcAddress(NonZeroUsize);

impl ProcAddress {
    pub fn new(address: usize) -> Option<Self> {
        NonZeroUsize::new(address).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Primitive assembly used for the display quad.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    /// Four vertices in winding order (desktop immediate mode).
    Polygon,
    /// Four vertices in strip order (client arrays on GL ES).
    TriangleStrip,
}

/// A textured quad in normalized device coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub primitive: Primitive,
    pub positions: [[f32; 2]; 4],
    pub tex_coords: [[f32; 2]; 4],
}

/// GL commands issued by the backend. Every call happens while the owning
/// context is acquired.
pub trait Gl {
    fn get_string(&self, name: u32) -> Option<String>;
    fn get_integer(&self, pname: u32) -> i32;
    fn get_error(&self) -> u32;

    fn enable(&self, cap: u32);
    fn disable(&self, cap: u32);
    fn depth_mask(&self, flag: bool);
    fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32);
    fn clear(&self, mask: u32);

    fn gen_textures(&self, count: usize) -> Vec<u32>;
    fn delete_textures(&self, textures: &[u32]);
    fn bind_texture(&self, target: u32, texture: u32);
    fn tex_parameter_i(&self, target: u32, pname: u32, param: i32);
    fn tex_parameter_f(&self, target: u32, pname: u32, param: f32);
    fn tex_env_i(&self, target: u32, pname: u32, param: i32);
    fn pixel_store_i(&self, pname: u32, param: i32);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    );
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    );

    fn draw_quad(&self, quad: &Quad);
    fn finish(&self);
    fn flush(&self);

    fn gen_program(&self, entry: &ProgramEntryPoints) -> u32;
    fn bind_program(&self, entry: &ProgramEntryPoints, target: u32, program: u32);
    fn program_string(&self, entry: &ProgramEntryPoints, target: u32, format: u32, source: &[u8]);
    fn delete_program(&self, entry: &ProgramEntryPoints, program: u32);
}

/// The windowing-side half of a graphics context.
///
/// `acquire` is exclusive and non-reentrant: it blocks other threads until the
/// matching `release`.
pub trait GlContext: Send + Sync {
    fn acquire(&self) -> Result<(), ContextError>;
    fn release(&self);
    fn swap(&self);
    fn proc_address(&self, name: &str) -> Option<ProcAddress>;
    fn gl(&self) -> &dyn Gl;
}

/// Holds a context acquired for the guard's lifetime and releases it on drop.
pub struct ContextGuard<'a> {
    context: &'a dyn GlContext,
}

impl<'a> ContextGuard<'a> {
    pub fn acquire(context: &'a dyn GlContext) -> Result<Self, ContextError> {
        context.acquire()?;
        Ok(Self { context })
    }

    pub fn swap(&self) {
        self.context.swap();
    }

    pub fn proc_address(&self, name: &str) -> Option<ProcAddress> {
        self.context.proc_address(name)
    }
}

impl<'a> Deref for ContextGuard<'a> {
    type Target = dyn Gl + 'a;

    fn deref(&self) -> &Self::Target {
        self.context.gl()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.release();
    }
}

/// Whole-token search of a space separated GL extension string.
pub fn has_extension(extensions: &str, name: &str) -> bool {
    extensions.split_ascii_whitespace().any(|ext| ext == name)
}
