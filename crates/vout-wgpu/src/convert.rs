//! CPU conversion of uploaded pixels into the RGBA8 textures wgpu samples.

use vout::gl;

/// Memory layout of pixels handed to `TexImage`/`TexSubImage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Packing {
    Rgba8,
    Rgb565,
    Uyvy,
    Yuyv,
}

impl Packing {
    /// Maps a GL `(format, type)` pair to a packing, `None` when unsupported.
    pub fn from_gl(format: u32, ty: u32) -> Option<Self> {
        match (format, ty) {
            (gl::RGBA, gl::UNSIGNED_BYTE) => Some(Packing::Rgba8),
            (gl::RGB, gl::UNSIGNED_SHORT_5_6_5) => Some(Packing::Rgb565),
            // 8_8 components are read as native-endian shorts.
            (gl::YCBCR_422_APPLE, gl::UNSIGNED_SHORT_8_8_APPLE) => {
                if cfg!(target_endian = "big") {
                    Some(Packing::Yuyv)
                } else {
                    Some(Packing::Uyvy)
                }
            }
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Packing::Rgba8 => 4,
            Packing::Rgb565 | Packing::Uyvy | Packing::Yuyv => 2,
        }
    }

    /// Bytes needed for a `width` x `height` region.
    pub fn region_len(self, width: usize, height: usize) -> usize {
        match self {
            // Chroma pairs cover two pixels, odd widths still read a full pair.
            Packing::Uyvy | Packing::Yuyv => width.div_ceil(2) * 4 * height,
            _ => width * height * self.bytes_per_pixel(),
        }
    }
}

/// Converts a tightly packed `width` x `height` region to RGBA8.
pub fn to_rgba8(packing: Packing, src: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; width * height * 4];
    match packing {
        Packing::Rgba8 => {
            let len = out.len().min(src.len());
            out[..len].copy_from_slice(&src[..len]);
        }
        Packing::Rgb565 => {
            for (dst, px) in out.chunks_exact_mut(4).zip(src.chunks_exact(2)) {
                let value = u16::from_ne_bytes([px[0], px[1]]);
                dst.copy_from_slice(&expand_565(value));
            }
        }
        Packing::Uyvy | Packing::Yuyv => {
            let row_in = width.div_ceil(2) * 4;
            for (row_out, row_src) in out.chunks_exact_mut(width * 4).zip(src.chunks(row_in)) {
                for (x, dst) in row_out.chunks_exact_mut(4).enumerate() {
                    let base = (x / 2) * 4;
                    let Some(pair) = row_src.get(base..base + 4) else {
                        break;
                    };
                    let (y0, u, y1, v) = match packing {
                        Packing::Uyvy => (pair[1], pair[0], pair[3], pair[2]),
                        _ => (pair[0], pair[1], pair[2], pair[3]),
                    };
                    let y = if x % 2 == 0 { y0 } else { y1 };
                    dst.copy_from_slice(&yuv_to_rgba(y, u, v));
                }
            }
        }
    }
    out
}

fn expand_565(value: u16) -> [u8; 4] {
    let r = ((value >> 11) & 0x1f) as u8;
    let g = ((value >> 5) & 0x3f) as u8;
    let b = (value & 0x1f) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
}

/// BT.601 limited range.
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |value: i32| ((value + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
        255,
    ]
}
