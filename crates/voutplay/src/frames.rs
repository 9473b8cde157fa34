use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbaImage;
use vout::{Chroma, Plane, VideoFormat};
use voutconfig::Pattern;

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

const CHECKER_CELL: u32 = 32;
const MOVING_STEP: u64 = 4;

/// Where the producer gets its RGBA content from.
pub enum FrameSource {
    Pattern(Pattern),
    Image(RgbaImage),
}

impl FrameSource {
    /// Loads `image` scaled to `width` x `height`, or falls back to `pattern`.
    pub fn load(
        image: Option<&Path>,
        pattern: Option<Pattern>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let Some(path) = image else {
            return Ok(FrameSource::Pattern(pattern.unwrap_or_default()));
        };
        let decoded = image::open(path)
            .with_context(|| format!("failed to open source image at {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            source_width = decoded.width(),
            source_height = decoded.height(),
            "loaded still image"
        );
        let scaled = decoded
            .resize_exact(width, height, FilterType::Triangle)
            .to_rgba8();
        Ok(FrameSource::Image(scaled))
    }

    pub fn describe(&self) -> String {
        match self {
            FrameSource::Pattern(pattern) => format!("pattern:{pattern}"),
            FrameSource::Image(image) => format!("image:{}x{}", image.width(), image.height()),
        }
    }

    /// RGBA8 content of frame `index`, tightly packed.
    pub fn render(&self, index: u64, width: u32, height: u32) -> Vec<u8> {
        match self {
            FrameSource::Image(image) => image.as_raw().clone(),
            FrameSource::Pattern(pattern) => {
                let mut out = Vec::with_capacity(width as usize * height as usize * 4);
                for y in 0..height {
                    for x in 0..width {
                        let [r, g, b] = pattern_pixel(*pattern, index, x, y, width, height);
                        out.extend_from_slice(&[r, g, b, 255]);
                    }
                }
                out
            }
        }
    }
}

fn pattern_pixel(pattern: Pattern, index: u64, x: u32, y: u32, width: u32, height: u32) -> [u8; 3] {
    match pattern {
        Pattern::Bars => bar_at(x, width),
        Pattern::Moving => {
            let shift = ((index * MOVING_STEP) % u64::from(width)) as u32;
            bar_at((x + shift) % width, width)
        }
        Pattern::Gradient => [
            ramp(x, width),
            ramp(y, height),
            128,
        ],
        Pattern::Checker => {
            if ((x / CHECKER_CELL) + (y / CHECKER_CELL)) % 2 == 0 {
                [255, 255, 255]
            } else {
                [0, 0, 0]
            }
        }
    }
}

fn bar_at(x: u32, width: u32) -> [u8; 3] {
    let bar = (u64::from(x) * BARS.len() as u64 / u64::from(width)) as usize;
    BARS[bar.min(BARS.len() - 1)]
}

fn ramp(value: u32, extent: u32) -> u8 {
    if extent <= 1 {
        return 0;
    }
    (u64::from(value) * 255 / u64::from(extent - 1)) as u8
}

/// Writes tightly packed RGBA into a picture of the negotiated chroma.
pub fn write_frame(
    rgba: &[u8],
    format: &VideoFormat,
    plane: Plane,
    dst: &mut [u8],
) -> Result<()> {
    let width = format.width as usize;
    let rows = rgba
        .chunks_exact(width * 4)
        .zip(dst.chunks_mut(plane.pitch))
        .take(plane.lines);

    match format.chroma {
        Chroma::Rv32 => {
            for (src, line) in rows {
                let len = src.len().min(line.len());
                line[..len].copy_from_slice(&src[..len]);
            }
        }
        Chroma::Rv16 => {
            for (src, line) in rows {
                for (px, out) in src.chunks_exact(4).zip(line.chunks_exact_mut(2)) {
                    out.copy_from_slice(&pack_565(px[0], px[1], px[2]).to_ne_bytes());
                }
            }
        }
        Chroma::Uyvy | Chroma::Yuyv => {
            let uyvy = format.chroma == Chroma::Uyvy;
            for (src, line) in rows {
                for (pair, out) in src.chunks(8).zip(line.chunks_exact_mut(4)) {
                    let first = rgb_to_yuv(pair[0], pair[1], pair[2]);
                    let second = match pair.get(4..7) {
                        Some(px) => rgb_to_yuv(px[0], px[1], px[2]),
                        None => first,
                    };
                    let u = ((u16::from(first[1]) + u16::from(second[1])) / 2) as u8;
                    let v = ((u16::from(first[2]) + u16::from(second[2])) / 2) as u8;
                    if uyvy {
                        out.copy_from_slice(&[u, first[0], v, second[0]]);
                    } else {
                        out.copy_from_slice(&[first[0], u, second[0], v]);
                    }
                }
            }
        }
        other => anyhow::bail!("the player cannot fill {other} frames"),
    }
    Ok(())
}

fn pack_565(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3)
}

/// BT.601 limited range.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    [
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    ]
}
