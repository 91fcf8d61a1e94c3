//! Common traits and constants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[must_use]
#[error("failed to parse `NesRegion`")]
pub struct ParseNesRegionError;

/// NES hardware region, selecting the regional timing tables.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub enum NesRegion {
    Auto,
    #[default]
    Ntsc,
    Pal,
    Dendy,
}

impl NesRegion {
    pub const fn as_slice() -> &'static [Self] {
        &[
            NesRegion::Auto,
            NesRegion::Ntsc,
            NesRegion::Pal,
            NesRegion::Dendy,
        ]
    }

    #[must_use]
    pub fn is_auto(&self) -> bool {
        self == &Self::Auto
    }

    #[must_use]
    pub const fn is_ntsc(&self) -> bool {
        matches!(self, Self::Auto | Self::Ntsc)
    }

    #[must_use]
    pub fn is_pal(&self) -> bool {
        self == &Self::Pal
    }

    #[must_use]
    pub fn is_dendy(&self) -> bool {
        self == &Self::Dendy
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ntsc => "ntsc",
            Self::Pal => "pal",
            Self::Dendy => "dendy",
        }
    }
}

impl std::fmt::Display for NesRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "Auto",
            Self::Ntsc => "NTSC",
            Self::Pal => "PAL",
            Self::Dendy => "Dendy",
        };
        write!(f, "{s}")
    }
}

impl AsRef<str> for NesRegion {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for NesRegion {
    type Error = ParseNesRegionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "auto" => Ok(Self::Auto),
            "ntsc" => Ok(Self::Ntsc),
            "pal" => Ok(Self::Pal),
            "dendy" => Ok(Self::Dendy),
            _ => Err(ParseNesRegionError),
        }
    }
}

/// Trait for types that have different behavior depending on NES region.
pub trait Regional {
    fn region(&self) -> NesRegion {
        NesRegion::Ntsc
    }
    fn set_region(&mut self, _region: NesRegion) {}
}

/// Type of reset for types that have different behavior for reset vs power cycling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub enum ResetKind {
    Soft,
    Hard,
}

/// Trait for types that can be reset.
pub trait Reset {
    fn reset(&mut self, _kind: ResetKind) {}
}

/// Trait for types that can clock a single cycle.
pub trait Clock {
    fn clock(&mut self) -> u64 {
        0
    }
}

/// Trait for types that output a raw DAC level.
pub trait Sample {
    fn output(&self) -> u8;
}
