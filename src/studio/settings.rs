//! Generation settings and their validation.
//!
//! Raw request fields arrive in `SettingsRequest`. The `TryFrom` conversion
//! is the only place they are checked; a `Settings` value is always valid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

pub const MIN_DURATION_SECS: u32 = 1;
pub const MAX_DURATION_SECS: u32 = 60;
pub const DEFAULT_DURATION_SECS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Square => "1:1",
            Self::Standard => "4:3",
            Self::StandardPortrait => "3:4",
        }
    }
}

impl FromStr for AspectRatio {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16:9" => Ok(Self::Landscape),
            "9:16" => Ok(Self::Portrait),
            "1:1" => Ok(Self::Square),
            "4:3" => Ok(Self::Standard),
            "3:4" => Ok(Self::StandardPortrait),
            other => Err(SettingsError::AspectRatio(other.to_string())),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    Hd,
    #[default]
    #[serde(rename = "1080p")]
    FullHd,
    #[serde(rename = "4K")]
    UltraHd,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hd => "720p",
            Self::FullHd => "1080p",
            Self::UltraHd => "4K",
        }
    }
}

impl FromStr for Resolution {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "720p" => Ok(Self::Hd),
            "1080p" => Ok(Self::FullHd),
            "4K" | "4k" | "2160p" => Ok(Self::UltraHd),
            other => Err(SettingsError::Resolution(other.to_string())),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated generation settings. Only constructible through `Settings::new`
/// or `TryFrom<SettingsRequest>`, so every instance is in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Settings {
    aspect_ratio: AspectRatio,
    duration: u32,
    resolution: Resolution,
}

impl Settings {
    pub fn new(
        aspect_ratio: AspectRatio,
        duration: u32,
        resolution: Resolution,
    ) -> Result<Self, SettingsError> {
        validate_duration(i64::from(duration))?;
        Ok(Self {
            aspect_ratio,
            duration,
            resolution,
        })
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    /// Clip length in seconds.
    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            duration: DEFAULT_DURATION_SECS,
            resolution: Resolution::default(),
        }
    }
}

/// Unvalidated settings as submitted by a client. Missing fields fall back
/// to the defaults; `duration` may arrive as a number or a numeric string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsRequest {
    pub aspect_ratio: Option<String>,
    pub duration: Option<serde_json::Value>,
    pub resolution: Option<String>,
}

impl TryFrom<SettingsRequest> for Settings {
    type Error = SettingsError;

    fn try_from(req: SettingsRequest) -> Result<Self, Self::Error> {
        let aspect_ratio = match req.aspect_ratio.as_deref() {
            Some(raw) => raw.parse()?,
            None => AspectRatio::default(),
        };
        let resolution = match req.resolution.as_deref() {
            Some(raw) => raw.parse()?,
            None => Resolution::default(),
        };
        let duration = match req.duration {
            None | Some(serde_json::Value::Null) => DEFAULT_DURATION_SECS,
            Some(value) => {
                let parsed = match &value {
                    serde_json::Value::Number(n) => n.as_i64(),
                    serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                let secs = parsed.ok_or(SettingsError::Duration {
                    value: -1,
                    min: MIN_DURATION_SECS,
                    max: MAX_DURATION_SECS,
                })?;
                validate_duration(secs)?
            }
        };
        Ok(Self {
            aspect_ratio,
            duration,
            resolution,
        })
    }
}

fn validate_duration(value: i64) -> Result<u32, SettingsError> {
    if value < i64::from(MIN_DURATION_SECS) || value > i64::from(MAX_DURATION_SECS) {
        return Err(SettingsError::Duration {
            value,
            min: MIN_DURATION_SECS,
            max: MAX_DURATION_SECS,
        });
    }
    Ok(value as u32)
}
