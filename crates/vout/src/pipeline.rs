//! Per-frame work: staging pixels into a texture and drawing the crop.

use std::sync::Arc;

use crate::buffer::StagingBuffer;
use crate::error::BackendError;
use crate::format::{Profile, TextureLayout, VideoFormat};
use crate::gl::{Gl, Primitive, Quad};
use crate::picture::Picture;

/// Extent of one sub-region update, checked against the texture and the
/// buffer behind the picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct UploadRegion {
    width: u32,
    lines: u32,
    len: usize,
}

impl UploadRegion {
    pub(crate) fn of(layout: &TextureLayout, picture: &Picture) -> Result<Self, BackendError> {
        let plane = picture.plane();
        let width = plane.pitch / layout.pixel_size as usize;
        if width > layout.width as usize || plane.lines > layout.height as usize {
            return Err(BackendError::invalid_picture(format!(
                "{}x{} plane exceeds the {}x{} texture",
                width, plane.lines, layout.width, layout.height
            )));
        }
        let buffer_len = picture.buffer().len();
        match plane.pitch.checked_mul(plane.lines) {
            Some(len) if len <= buffer_len => Ok(Self {
                width: width as u32,
                lines: plane.lines as u32,
                len,
            }),
            _ => Err(BackendError::invalid_picture(format!(
                "{} lines of {} bytes overrun a {} byte buffer",
                plane.lines, plane.pitch, buffer_len
            ))),
        }
    }
}

/// Sub-region update of the currently bound texture from `picture`'s buffer.
pub(crate) fn upload(gl: &dyn Gl, layout: &TextureLayout, picture: &Picture, region: UploadRegion) {
    let pixels = picture.pixels();
    gl.tex_sub_image_2d(
        layout.target,
        0,
        0,
        0,
        region.width,
        region.lines,
        layout.format,
        layout.ty,
        &pixels[..region.len],
    );
}

/// Makes `picture` the texture content for the next draw.
///
/// Pictures bound to their own texture were uploaded on checkout and only
/// need binding, provided they wrap this backend's buffer for that unit.
/// Otherwise the shared texture receives one sub-region update.
pub(crate) fn stage(
    gl: &dyn Gl,
    layout: &TextureLayout,
    textures: &[u32],
    buffers: &[Arc<StagingBuffer>],
    picture: &Picture,
) -> Result<(), BackendError> {
    if layout.profile.uploads_on_checkout() {
        let unit = picture
            .texture_unit()
            .ok_or(BackendError::UnboundPicture)?;
        let owned = buffers
            .get(unit)
            .is_some_and(|buffer| Arc::ptr_eq(buffer, picture.buffer()));
        if !owned {
            return Err(BackendError::UnboundPicture);
        }
        let texture = textures.get(unit).ok_or(BackendError::UnboundPicture)?;
        gl.bind_texture(layout.target, *texture);
    } else {
        let texture = textures.first().ok_or(BackendError::NoTextures)?;
        let region = UploadRegion::of(layout, picture)?;
        gl.bind_texture(layout.target, *texture);
        upload(gl, layout, picture, region);
    }
    Ok(())
}

/// Texture-space rectangle `[left, top, right, bottom]` of the visible crop.
pub fn texture_coords(layout: &TextureLayout, source: &VideoFormat) -> [f32; 4] {
    let (norm_w, norm_h) = if layout.normalized_coordinates() {
        (layout.width as f32, layout.height as f32)
    } else {
        (1.0, 1.0)
    };
    let left = source.x_offset as f32 / norm_w;
    let top = source.y_offset as f32 / norm_h;
    let right = (u64::from(source.x_offset) + u64::from(source.visible_width)) as f32 / norm_w;
    let bottom = (u64::from(source.y_offset) + u64::from(source.visible_height)) as f32 / norm_h;
    [left, top, right, bottom]
}

/// The full-viewport quad sampling the visible crop.
pub fn display_quad(layout: &TextureLayout, source: &VideoFormat) -> Quad {
    let [x, y, w, h] = texture_coords(layout, source);
    match layout.profile {
        Profile::Constrained => Quad {
            primitive: Primitive::TriangleStrip,
            positions: [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]],
            tex_coords: [[x, h], [w, h], [x, y], [w, y]],
        },
        Profile::DualTextureDirect | Profile::Generic => Quad {
            primitive: Primitive::Polygon,
            positions: [[-1.0, 1.0], [1.0, 1.0], [1.0, -1.0], [-1.0, -1.0]],
            tex_coords: [[x, y], [w, y], [w, h], [x, h]],
        },
    }
}

/// Clears, draws the quad with either the program or the texture target
/// enabled, then disables it again.
pub(crate) fn draw(gl: &dyn Gl, layout: &TextureLayout, program: u32, source: &VideoFormat) {
    use crate::gl::{COLOR_BUFFER_BIT, FRAGMENT_PROGRAM_ARB};

    gl.clear(COLOR_BUFFER_BIT);
    let cap = if program != 0 {
        FRAGMENT_PROGRAM_ARB
    } else {
        layout.target
    };
    gl.enable(cap);
    gl.draw_quad(&display_quad(layout, source));
    gl.disable(cap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Capabilities;
    use crate::chroma::Chroma;
    use crate::format::negotiate;

    fn layout(profile: Profile, npot: bool, width: u32, height: u32) -> (VideoFormat, TextureLayout) {
        let caps = Capabilities {
            fragment_program: None,
            non_power_of_two_textures: npot,
        };
        negotiate(&VideoFormat::new(Chroma::Rv32, width, height), profile, &caps).unwrap()
    }

    #[test]
    fn full_texture_crop_reaches_exactly_one() {
        let (format, layout) = layout(Profile::Generic, false, 256, 128);
        assert_eq!(texture_coords(&layout, &format), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn padded_textures_sample_a_fraction() {
        let (format, layout) = layout(Profile::Generic, false, 640, 480);
        let format = format.with_crop(64, 0, 512, 480);
        let [x, y, w, h] = texture_coords(&layout, &format);
        assert_eq!((x, y), (64.0 / 1024.0, 0.0));
        assert_eq!(w, 576.0 / 1024.0);
        assert_eq!(h, 480.0 / 512.0);
    }

    #[test]
    fn rectangle_targets_use_texel_coordinates() {
        let (format, layout) = layout(Profile::DualTextureDirect, true, 720, 480);
        let format = format.with_crop(8, 4, 704, 472);
        assert_eq!(texture_coords(&layout, &format), [8.0, 4.0, 712.0, 476.0]);
    }

    #[test]
    fn constrained_quad_is_a_strip_with_flipped_rows() {
        let (format, layout) = layout(Profile::Constrained, true, 320, 240);
        let quad = display_quad(&layout, &format);
        assert_eq!(quad.primitive, Primitive::TriangleStrip);
        assert_eq!(quad.positions[0], [-1.0, -1.0]);
        assert_eq!(quad.tex_coords[0], [0.0, 1.0]);
        assert_eq!(quad.tex_coords[3], [1.0, 0.0]);
    }

    #[test]
    fn desktop_quad_is_a_polygon_from_top_left() {
        let (format, layout) = layout(Profile::Generic, true, 320, 240);
        let quad = display_quad(&layout, &format);
        assert_eq!(quad.primitive, Primitive::Polygon);
        assert_eq!(quad.positions[0], [-1.0, 1.0]);
        assert_eq!(quad.tex_coords, [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn coordinates_past_u32_do_not_wrap() {
        let (format, layout) = layout(Profile::DualTextureDirect, true, 64, 64);
        let format = format.with_crop(u32::MAX, 0, 2, 64);
        let [x, _, w, _] = texture_coords(&layout, &format);
        assert!(w >= x);
        assert_eq!(w, (u64::from(u32::MAX) + 2) as f32);
    }

    #[test]
    fn upload_region_must_fit_texture_and_buffer() {
        use crate::buffer::StagingBuffer;
        use crate::picture::Plane;

        let (format, layout) = layout(Profile::Generic, true, 64, 64);
        let picture = |pitch: usize, lines: usize, len: usize| {
            Picture::new(
                format,
                Plane { pitch, lines },
                Arc::new(StagingBuffer::zeroed(len).unwrap()),
                None,
            )
        };

        let full = UploadRegion::of(&layout, &picture(64 * 4, 64, 64 * 64 * 4)).unwrap();
        assert_eq!(full, UploadRegion { width: 64, lines: 64, len: 64 * 64 * 4 });

        for (pitch, lines, len) in [
            (4096 * 4, 4096, 16),
            (64 * 4, 64, 64 * 63 * 4),
            (128 * 4, 1, 128 * 4),
            (64 * 4, 65, 64 * 65 * 4),
            (usize::MAX / 2, 2, 16),
        ] {
            let err = UploadRegion::of(&layout, &picture(pitch, lines, len)).unwrap_err();
            assert!(matches!(err, BackendError::InvalidPicture(_)), "{pitch}x{lines}");
        }
    }
}
