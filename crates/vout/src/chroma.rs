//! Chroma identifiers and the table describing their memory layout.
//!
//! Only packed formats are ever negotiated for display; planar entries exist so
//! that requests coming from a decoder can be described and logged.

use std::fmt;

/// Four-character pixel format code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Chroma {
    /// Packed RGB 5:6:5, 16 bits per pixel.
    Rv16,
    /// Packed RGB, 24 bits per pixel.
    Rv24,
    /// Packed RGB(A), 32 bits per pixel.
    Rv32,
    /// Packed YUV 4:2:2, U Y V Y byte order.
    Uyvy,
    /// Packed YUV 4:2:2, Y U Y V byte order.
    Yuyv,
    /// Planar YUV 4:2:0.
    I420,
    /// Planar YVU 4:2:0.
    Yv12,
    /// Semi-planar YUV 4:2:0.
    Nv12,
    /// Planar YUV 4:2:2.
    I422,
    /// Planar YUV 4:4:4.
    I444,
    /// Any code this table does not know about.
    Other([u8; 4]),
}

impl Chroma {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Chroma::Rv16 => *b"RV16",
            Chroma::Rv24 => *b"RV24",
            Chroma::Rv32 => *b"RV32",
            Chroma::Uyvy => *b"UYVY",
            Chroma::Yuyv => *b"YUYV",
            Chroma::I420 => *b"I420",
            Chroma::Yv12 => *b"YV12",
            Chroma::Nv12 => *b"NV12",
            Chroma::I422 => *b"I422",
            Chroma::I444 => *b"I444",
            Chroma::Other(code) => code,
        }
    }

    pub fn from_fourcc(code: [u8; 4]) -> Self {
        match &code {
            b"RV16" => Chroma::Rv16,
            b"RV24" => Chroma::Rv24,
            b"RV32" => Chroma::Rv32,
            b"UYVY" => Chroma::Uyvy,
            b"YUYV" | b"YUY2" => Chroma::Yuyv,
            b"I420" => Chroma::I420,
            b"YV12" => Chroma::Yv12,
            b"NV12" => Chroma::Nv12,
            b"I422" => Chroma::I422,
            b"I444" => Chroma::I444,
            _ => Chroma::Other(code),
        }
    }

    /// Looks up the layout of this chroma in the static table.
    pub fn description(self) -> Option<&'static ChromaDescription> {
        describe(self)
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Chroma::Uyvy | Chroma::Yuyv | Chroma::I420 | Chroma::Yv12 | Chroma::Nv12 | Chroma::I422 | Chroma::I444
        )
    }
}

impl fmt::Display for Chroma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        for byte in code {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

/// Subsampling of one plane relative to the luma/full-size plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneRatio {
    pub width_num: u32,
    pub width_den: u32,
    pub height_num: u32,
    pub height_den: u32,
}

const FULL: PlaneRatio = PlaneRatio {
    width_num: 1,
    width_den: 1,
    height_num: 1,
    height_den: 1,
};

const HALF_BOTH: PlaneRatio = PlaneRatio {
    width_num: 1,
    width_den: 2,
    height_num: 1,
    height_den: 2,
};

const HALF_WIDTH: PlaneRatio = PlaneRatio {
    width_num: 1,
    width_den: 2,
    height_num: 1,
    height_den: 1,
};

const FULL_WIDTH_HALF_HEIGHT: PlaneRatio = PlaneRatio {
    width_num: 1,
    width_den: 1,
    height_num: 1,
    height_den: 2,
};

/// Memory layout of a chroma: bytes per pixel of each plane and plane ratios.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChromaDescription {
    pub pixel_size: u32,
    pub planes: &'static [PlaneRatio],
}

impl ChromaDescription {
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn is_packed(&self) -> bool {
        self.planes.len() == 1
    }
}

static RV16: ChromaDescription = ChromaDescription {
    pixel_size: 2,
    planes: &[FULL],
};
static RV24: ChromaDescription = ChromaDescription {
    pixel_size: 3,
    planes: &[FULL],
};
static RV32: ChromaDescription = ChromaDescription {
    pixel_size: 4,
    planes: &[FULL],
};
static PACKED_422: ChromaDescription = ChromaDescription {
    pixel_size: 2,
    planes: &[FULL],
};
static PLANAR_420: ChromaDescription = ChromaDescription {
    pixel_size: 1,
    planes: &[FULL, HALF_BOTH, HALF_BOTH],
};
static SEMI_PLANAR_420: ChromaDescription = ChromaDescription {
    pixel_size: 1,
    planes: &[FULL, FULL_WIDTH_HALF_HEIGHT],
};
static PLANAR_422: ChromaDescription = ChromaDescription {
    pixel_size: 1,
    planes: &[FULL, HALF_WIDTH, HALF_WIDTH],
};
static PLANAR_444: ChromaDescription = ChromaDescription {
    pixel_size: 1,
    planes: &[FULL, FULL, FULL],
};

pub fn describe(chroma: Chroma) -> Option<&'static ChromaDescription> {
    match chroma {
        Chroma::Rv16 => Some(&RV16),
        Chroma::Rv24 => Some(&RV24),
        Chroma::Rv32 => Some(&RV32),
        Chroma::Uyvy | Chroma::Yuyv => Some(&PACKED_422),
        Chroma::I420 | Chroma::Yv12 => Some(&PLANAR_420),
        Chroma::Nv12 => Some(&SEMI_PLANAR_420),
        Chroma::I422 => Some(&PLANAR_422),
        Chroma::I444 => Some(&PLANAR_444),
        Chroma::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_formats_report_pixel_sizes() {
        assert_eq!(Chroma::Rv16.description().unwrap().pixel_size, 2);
        assert_eq!(Chroma::Rv32.description().unwrap().pixel_size, 4);
        assert_eq!(Chroma::Uyvy.description().unwrap().pixel_size, 2);
        assert!(Chroma::Yuyv.description().unwrap().is_packed());
        assert_eq!(Chroma::I420.description().unwrap().plane_count(), 3);
    }

    #[test]
    fn fourcc_codes_round_trip_through_the_table() {
        assert_eq!(Chroma::from_fourcc(*b"UYVY"), Chroma::Uyvy);
        assert_eq!(Chroma::from_fourcc(*b"YUY2"), Chroma::Yuyv);
        let unknown = Chroma::from_fourcc(*b"ABCD");
        assert_eq!(unknown, Chroma::Other(*b"ABCD"));
        assert!(unknown.description().is_none());
        assert_eq!(unknown.to_string(), "ABCD");
    }
}
