//! Format negotiation: which chroma the backend accepts, and the texture
//! geometry it needs to display it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::caps::Capabilities;
use crate::chroma::Chroma;
use crate::error::BackendError;
use crate::gl;

const BIG_ENDIAN: bool = cfg!(target_endian = "big");

/// Platform configuration selected once, at construction.
///
/// Every later decision (buffer count, upload order, coordinate
/// normalization) reads this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// 16-bit RGB textures for GL ES class hardware.
    Constrained,
    /// YUV 4:2:2 rectangle textures backed directly by client memory. The
    /// driver wants the texture re-specified *before* the CPU rewrites the
    /// buffer, so every pooled frame gets its own texture.
    DualTextureDirect,
    /// 32-bit RGB textures, buffer written then uploaded.
    Generic,
}

impl Profile {
    /// Profile matching the build target.
    pub fn native() -> Self {
        if cfg!(feature = "gles") {
            Profile::Constrained
        } else if cfg!(target_os = "macos") {
            Profile::DualTextureDirect
        } else {
            Profile::Generic
        }
    }

    /// Number of texture units (and staging buffers) the profile needs.
    pub fn texture_units(self) -> usize {
        match self {
            Profile::DualTextureDirect => 2,
            Profile::Constrained | Profile::Generic => 1,
        }
    }

    /// True when uploads happen on pool checkout instead of in `prepare`.
    pub fn uploads_on_checkout(self) -> bool {
        matches!(self, Profile::DualTextureDirect)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Constrained => f.write_str("constrained"),
            Profile::DualTextureDirect => f.write_str("dual-texture-direct"),
            Profile::Generic => f.write_str("generic"),
        }
    }
}

/// Description of the frames exchanged with the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub chroma: Chroma,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    pub rmask: u32,
    pub gmask: u32,
    pub bmask: u32,
}

impl VideoFormat {
    /// A format whose visible area is the whole frame.
    pub fn new(chroma: Chroma, width: u32, height: u32) -> Self {
        Self {
            chroma,
            width,
            height,
            x_offset: 0,
            y_offset: 0,
            visible_width: width,
            visible_height: height,
            rmask: 0,
            gmask: 0,
            bmask: 0,
        }
    }

    pub fn with_crop(mut self, x_offset: u32, y_offset: u32, width: u32, height: u32) -> Self {
        self.x_offset = x_offset;
        self.y_offset = y_offset;
        self.visible_width = width;
        self.visible_height = height;
        self
    }

    /// Fails unless the visible crop lies inside a `width` x `height` frame.
    pub(crate) fn ensure_crop_within(&self, width: u32, height: u32) -> Result<(), BackendError> {
        let right = self.x_offset.checked_add(self.visible_width);
        let bottom = self.y_offset.checked_add(self.visible_height);
        match (right, bottom) {
            (Some(right), Some(bottom)) if right <= width && bottom <= height => Ok(()),
            _ => Err(BackendError::invalid_format(format!(
                "crop {}x{}+{}+{} does not fit a {}x{} frame",
                self.visible_width, self.visible_height, self.x_offset, self.y_offset, width, height
            ))),
        }
    }

    fn with_chroma(mut self, chroma: Chroma) -> Self {
        self.chroma = chroma;
        self
    }

    fn with_masks(mut self, rmask: u32, gmask: u32, bmask: u32) -> Self {
        self.rmask = rmask;
        self.gmask = gmask;
        self.bmask = bmask;
        self
    }
}

/// Texture geometry and GL codes agreed on at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureLayout {
    pub profile: Profile,
    pub target: u32,
    pub format: u32,
    pub ty: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_size: u32,
    pub units: usize,
}

impl TextureLayout {
    /// `TEXTURE_2D` samples in 0..1; rectangle textures sample in texels.
    pub fn normalized_coordinates(&self) -> bool {
        self.target == gl::TEXTURE_2D
    }

    /// Size in bytes of one staging buffer.
    pub fn staging_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_size as usize
    }
}

/// Smallest power of two greater than or equal to `size`.
pub fn aligned_size(size: u32) -> Option<u32> {
    size.checked_next_power_of_two()
}

/// Picks the chroma, masks and texture layout for `requested`.
///
/// The returned format replaces the caller's: every frame submitted
/// afterwards must use it.
pub fn negotiate(
    requested: &VideoFormat,
    profile: Profile,
    caps: &Capabilities,
) -> Result<(VideoFormat, TextureLayout), BackendError> {
    if requested.width == 0 || requested.height == 0 {
        return Err(BackendError::invalid_format(format!(
            "source dimensions must be non-zero, got {}x{}",
            requested.width, requested.height
        )));
    }

    let mut format = *requested;
    if format.visible_width == 0 || format.visible_height == 0 {
        format = format.with_crop(0, 0, format.width, format.height);
    }
    format.ensure_crop_within(format.width, format.height)?;

    let (format, target, tex_format, ty) = match profile {
        Profile::Constrained => {
            let format = format.with_chroma(Chroma::Rv16);
            let format = if BIG_ENDIAN {
                format.with_masks(0x001f, 0x07e0, 0xf800)
            } else {
                format.with_masks(0xf800, 0x07e0, 0x001f)
            };
            (format, gl::TEXTURE_2D, gl::RGB, gl::UNSIGNED_SHORT_5_6_5)
        }
        Profile::DualTextureDirect => {
            let chroma = if BIG_ENDIAN { Chroma::Yuyv } else { Chroma::Uyvy };
            (
                format.with_chroma(chroma).with_masks(0, 0, 0),
                gl::TEXTURE_RECTANGLE,
                gl::YCBCR_422_APPLE,
                gl::UNSIGNED_SHORT_8_8_APPLE,
            )
        }
        Profile::Generic => {
            let format = format.with_chroma(Chroma::Rv32);
            let format = if BIG_ENDIAN {
                format.with_masks(0xff00_0000, 0x00ff_0000, 0x0000_ff00)
            } else {
                format.with_masks(0x0000_00ff, 0x0000_ff00, 0x00ff_0000)
            };
            (format, gl::TEXTURE_2D, gl::RGBA, gl::UNSIGNED_BYTE)
        }
    };

    let description = format
        .chroma
        .description()
        .ok_or(BackendError::UnknownChroma(format.chroma))?;

    let (width, height) = if caps.non_power_of_two_textures {
        (format.width, format.height)
    } else {
        let width = aligned_size(format.width);
        let height = aligned_size(format.height);
        match (width, height) {
            (Some(width), Some(height)) => (width, height),
            _ => {
                return Err(BackendError::invalid_format(format!(
                    "{}x{} cannot be rounded to a power-of-two texture",
                    format.width, format.height
                )))
            }
        }
    };

    let layout = TextureLayout {
        profile,
        target,
        format: tex_format,
        ty,
        width,
        height,
        pixel_size: description.pixel_size,
        units: profile.texture_units(),
    };

    tracing::debug!(
        requested = %requested.chroma,
        chosen = %format.chroma,
        source_width = format.width,
        source_height = format.height,
        texture_width = layout.width,
        texture_height = layout.height,
        %profile,
        "negotiated display format"
    );

    Ok((format, layout))
}
