use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use vout::{Chroma, Profile, StorageHint, VideoFormat};

/// Frames played when neither `frames` nor `duration` bound playback.
pub const DEFAULT_FRAMES: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Synthetic picture content written by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    #[default]
    Bars,
    Gradient,
    Checker,
    Moving,
}

impl Pattern {
    pub fn name(self) -> &'static str {
        match self {
            Pattern::Bars => "bars",
            Pattern::Gradient => "gradient",
            Pattern::Checker => "checker",
            Pattern::Moving => "moving",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bars" | "colorbars" => Ok(Pattern::Bars),
            "gradient" => Ok(Pattern::Gradient),
            "checker" | "checkerboard" => Ok(Pattern::Checker),
            "moving" => Ok(Pattern::Moving),
            other => Err(format!(
                "unknown pattern '{other}' (expected bars, gradient, checker or moving)"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    pub version: u32,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub playback: PlaybackSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Crop {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceSection {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Four-character code the decoder would hand over before negotiation.
    #[serde(default)]
    pub chroma: Option<String>,
    #[serde(default)]
    pub crop: Option<Crop>,
    #[serde(default)]
    pub pattern: Option<Pattern>,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            chroma: None,
            crop: None,
            pattern: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendSection {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub storage_hint: StorageHint,
    /// Path to `!!ARBfp1.0` source.
    #[serde(default)]
    pub fragment_program: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlaybackSection {
    #[serde(default)]
    pub frames: Option<u64>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    360
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            source: SourceSection::default(),
            backend: BackendSection::default(),
            playback: PlaybackSection::default(),
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PlayerConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// The decoder-side chroma, I420 when the config leaves it out.
    pub fn requested_chroma(&self) -> Chroma {
        match self.source.chroma.as_deref().map(str::as_bytes) {
            Some(&[a, b, c, d]) => Chroma::from_fourcc([a, b, c, d]),
            _ => Chroma::I420,
        }
    }

    /// The format the player asks the backend for before negotiation.
    pub fn requested_format(&self) -> VideoFormat {
        let format = VideoFormat::new(
            self.requested_chroma(),
            self.source.width,
            self.source.height,
        );
        match self.source.crop {
            Some(crop) => format.with_crop(crop.x, crop.y, crop.width, crop.height),
            None => format,
        }
    }

    /// How many frames to present. `frames` wins, then `duration` at `fps`.
    pub fn frame_limit(&self) -> u64 {
        if let Some(frames) = self.playback.frames {
            return frames;
        }
        match (self.playback.duration, self.playback.fps) {
            (Some(duration), Some(fps)) if fps > 0.0 => {
                (duration.as_secs_f64() * f64::from(fps)).ceil().max(1.0) as u64
            }
            _ => DEFAULT_FRAMES,
        }
    }

    /// Pacing between frames, `None` for uncapped.
    pub fn frame_interval(&self) -> Option<Duration> {
        match self.playback.fps {
            Some(fps) if fps > 0.0 => Some(Duration::from_secs_f32(1.0 / fps)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let source = &self.source;
        if source.width == 0 || source.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "source size must be non-zero, got {}x{}",
                source.width, source.height
            )));
        }

        if let Some(chroma) = &source.chroma {
            if chroma.len() != 4 || !chroma.bytes().all(|byte| byte.is_ascii_graphic()) {
                return Err(ConfigError::Invalid(format!(
                    "source.chroma '{chroma}' must be a four-character code"
                )));
            }
        }

        if let Some(crop) = source.crop {
            if crop.width == 0 || crop.height == 0 {
                return Err(ConfigError::Invalid(
                    "source.crop width and height must be greater than zero".into(),
                ));
            }
            let right = crop.x.checked_add(crop.width);
            let bottom = crop.y.checked_add(crop.height);
            let inside = matches!(
                (right, bottom),
                (Some(right), Some(bottom)) if right <= source.width && bottom <= source.height
            );
            if !inside {
                return Err(ConfigError::Invalid(format!(
                    "source.crop {}x{}+{}+{} exceeds the {}x{} frame",
                    crop.width, crop.height, crop.x, crop.y, source.width, source.height
                )));
            }
        }

        if source.pattern.is_some() && source.image.is_some() {
            return Err(ConfigError::Invalid(
                "source.pattern and source.image are mutually exclusive".into(),
            ));
        }

        if let Some(path) = &self.backend.fragment_program {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "backend.fragment_program may not be empty".into(),
                ));
            }
        }

        let playback = &self.playback;
        if playback.frames == Some(0) {
            return Err(ConfigError::Invalid(
                "playback.frames must be greater than zero".into(),
            ));
        }

        if let Some(fps) = playback.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(ConfigError::Invalid("playback.fps must be >= 0".into()));
            }
        }

        if let Some(duration) = playback.duration {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(
                    "playback.duration must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}
