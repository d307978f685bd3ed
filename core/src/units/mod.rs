use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum LengthUnit {
    #[default]
    Millimeter,
    Centimeter,
    Meter,
    Inch,
    Foot,
}

impl LengthUnit {
    pub fn to_mm(&self, value: f64) -> f64 {
        match self {
            Self::Millimeter => value,
            Self::Centimeter => value * 10.0,
            Self::Meter => value * 1000.0,
            Self::Inch => value * 25.4,
            Self::Foot => value * 304.8,
        }
    }

    pub fn from_mm(&self, mm: f64) -> f64 {
        match self {
            Self::Millimeter => mm,
            Self::Centimeter => mm / 10.0,
            Self::Meter => mm / 1000.0,
            Self::Inch => mm / 25.4,
            Self::Foot => mm / 304.8,
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millimeter => write!(f, "mm"),
            Self::Centimeter => write!(f, "cm"),
            Self::Meter => write!(f, "m"),
            Self::Inch => write!(f, "in"),
            Self::Foot => write!(f, "ft"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AngleUnit {
    #[default]
    Degrees,
    Radians,
}

impl AngleUnit {
    /// Convert value to radians (base unit for angles)
    pub fn to_radians(&self, value: f64) -> f64 {
        match self {
            Self::Degrees => value * std::f64::consts::PI / 180.0,
            Self::Radians => value,
        }
    }

    /// Convert from radians to this unit
    pub fn from_radians(&self, radians: f64) -> f64 {
        match self {
            Self::Degrees => radians * 180.0 / std::f64::consts::PI,
            Self::Radians => radians,
        }
    }
}

impl fmt::Display for AngleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degrees => write!(f, "deg"),
            Self::Radians => write!(f, "rad"),
        }
    }
}

/// Unit tag carried by parameters. Stored values are always in base
/// units (mm, radians); the tag records how the caller talks about them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Unit {
    #[default]
    Dimensionless,
    Length(LengthUnit),
    Angle(AngleUnit),
}

impl Unit {
    /// Convert a value to base units (mm for length, radians for angle)
    pub fn to_base(&self, value: f64) -> f64 {
        match self {
            Self::Dimensionless => value,
            Self::Length(lu) => lu.to_mm(value),
            Self::Angle(au) => au.to_radians(value),
        }
    }

    /// Convert from base units to this unit
    pub fn from_base(&self, base_value: f64) -> f64 {
        match self {
            Self::Dimensionless => base_value,
            Self::Length(lu) => lu.from_mm(base_value),
            Self::Angle(au) => au.from_radians(base_value),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dimensionless => write!(f, ""),
            Self::Length(lu) => write!(f, "{}", lu),
            Self::Angle(au) => write!(f, "{}", au),
        }
    }
}
