use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("resolution must be positive, got {width}x{height}")]
    Zero { width: u32, height: u32 },
    #[error("invalid resolution {0:?}, expected WIDTHxHEIGHT")]
    Parse(String),
}

/// Target frame size for the resize step. Both dimensions are positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawResolution", into = "RawResolution")]
pub struct Resolution {
    width: u32,
    height: u32,
}

#[derive(Serialize, Deserialize)]
struct RawResolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// 640x480.
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    pub fn new(width: u32, height: u32) -> Result<Self, ResolutionError> {
        if width == 0 || height == 0 {
            return Err(ResolutionError::Zero { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn to_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || ResolutionError::Parse(s.to_string());
        let (w, h) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(parse_err)?;
        let width = w.trim().parse::<u32>().map_err(|_| parse_err())?;
        let height = h.trim().parse::<u32>().map_err(|_| parse_err())?;
        Self::new(width, height)
    }
}

impl TryFrom<RawResolution> for Resolution {
    type Error = ResolutionError;

    fn try_from(raw: RawResolution) -> Result<Self, Self::Error> {
        Self::new(raw.width, raw.height)
    }
}

impl From<Resolution> for RawResolution {
    fn from(r: Resolution) -> Self {
        Self {
            width: r.width,
            height: r.height,
        }
    }
}
