//! Multi-level precision: quantization tiers and grid snapping.
//!
//! Solving always runs on raw `Compute`-precision coordinates; only the
//! coordinates committed at the end of a transaction are snapped to the
//! caller-selected level. Snapping mid-solve causes oscillation.

use crate::error::{ensure_finite, CoreError};
use serde::{Deserialize, Serialize};

pub mod snap;

/// Quantization tiers, coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PrecisionLevel {
    /// Display coarseness for on-screen readouts.
    Ui,
    /// Default working precision for committed geometry.
    #[default]
    Edit,
    /// Internal solver precision.
    Compute,
}

impl PrecisionLevel {
    /// The quantization unit this level rounds to.
    pub fn unit(self) -> f64 {
        match self {
            PrecisionLevel::Ui => 1e-1,
            PrecisionLevel::Edit => 1e-3,
            PrecisionLevel::Compute => 1e-9,
        }
    }

    /// Exact reciprocal of the unit. Scaling by the integer reciprocal
    /// and dividing back is correctly rounded, unlike multiplying by
    /// the inexact unit itself.
    fn scale(self) -> f64 {
        match self {
            PrecisionLevel::Ui => 1e1,
            PrecisionLevel::Edit => 1e3,
            PrecisionLevel::Compute => 1e9,
        }
    }
}

/// Deterministically round `value` to the unit of `level`, half away
/// from zero. Non-finite input is rejected, never propagated as NaN.
pub fn quantize(value: f64, level: PrecisionLevel) -> Result<f64, CoreError> {
    let value = ensure_finite(value, "quantize input")?;
    let scale = level.scale();
    // f64::round is round-half-away-from-zero.
    Ok((value * scale).round() / scale)
}

/// Round each coordinate to the nearest multiple of `grid_size`.
pub fn snap_to_grid(point: [f64; 2], grid_size: f64) -> Result<[f64; 2], CoreError> {
    ensure_finite(grid_size, "grid size")?;
    if grid_size <= 0.0 {
        return Err(CoreError::InvalidValue {
            context: "grid size".to_string(),
            value: grid_size,
        });
    }
    ensure_finite(point[0], "grid snap x")?;
    ensure_finite(point[1], "grid snap y")?;
    Ok([
        (point[0] / grid_size).round() * grid_size,
        (point[1] / grid_size).round() * grid_size,
    ])
}

/// Process-wide precision settings. The session reads this once at the
/// start of each transaction and holds it fixed for the duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionConfig {
    pub level: PrecisionLevel,
    pub grid_size: f64,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            level: PrecisionLevel::Edit,
            grid_size: 1.0,
        }
    }
}
