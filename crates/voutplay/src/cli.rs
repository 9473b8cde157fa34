use std::path::PathBuf;

use clap::Parser;
use vout::Profile;
use voutconfig::{Crop, Pattern};

#[derive(Parser, Debug)]
#[command(
    name = "voutplay",
    author,
    version,
    about = "Plays synthetic frames through the vout display backend"
)]
pub struct Cli {
    /// Player configuration TOML; flags below override its values.
    #[arg(long, value_name = "FILE", env = "VOUTPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Source frame size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Visible area inside the frame (`WIDTHxHEIGHT+X+Y`).
    #[arg(long, value_name = "WxH+X+Y", value_parser = parse_crop)]
    pub crop: Option<Crop>,

    /// Number of frames to present before exiting.
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Pace presentation to this rate (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Display profile: `constrained`, `dual-texture-direct` or `generic`.
    #[arg(long, value_name = "PROFILE", value_parser = parse_profile)]
    pub profile: Option<Profile>,

    /// Test pattern: `bars`, `gradient`, `checker` or `moving`.
    #[arg(long, value_name = "NAME", value_parser = parse_pattern, conflicts_with = "image")]
    pub pattern: Option<Pattern>,

    /// Still image shown on every frame instead of a pattern.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Fragment program source to load when the context supports it.
    #[arg(long, value_name = "PATH")]
    pub fragment_program: Option<PathBuf>,

    /// Write the last presented frame to this PNG path.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Print the negotiated format and texture layout, then exit.
    #[arg(long)]
    pub print_format: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{w}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

pub fn parse_crop(value: &str) -> Result<Crop, String> {
    let trimmed = value.trim();
    let (size, offsets) = match trimmed.split_once('+') {
        Some((size, offsets)) => (size, Some(offsets)),
        None => (trimmed, None),
    };
    let (width, height) = parse_size(size)?;
    let (x, y) = match offsets {
        None => (0, 0),
        Some(offsets) => {
            let (x, y) = offsets
                .split_once('+')
                .ok_or_else(|| "expected WIDTHxHEIGHT+X+Y".to_string())?;
            let x = x
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid crop x offset '{x}'"))?;
            let y = y
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid crop y offset '{y}'"))?;
            (x, y)
        }
    };
    Ok(Crop {
        x,
        y,
        width,
        height,
    })
}

pub fn parse_profile(value: &str) -> Result<Profile, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("profile must not be empty".into());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "constrained" | "gles" | "rgb565" => Ok(Profile::Constrained),
        "dual-texture-direct" | "dual" | "client-storage" => Ok(Profile::DualTextureDirect),
        "generic" | "rgba" => Ok(Profile::Generic),
        "native" | "auto" => Ok(Profile::native()),
        other => Err(format!(
            "unknown profile '{other}' (expected constrained, dual-texture-direct or generic)"
        )),
    }
}

pub fn parse_pattern(value: &str) -> Result<Pattern, String> {
    value.parse()
}
