//! Node Positions
//!
//! Spatial coordinates of a simulated node and the Euclidean distance used
//! by link-quality models.

use serde::{Deserialize, Serialize};

/// Distance reported when either endpoint cannot be read.
///
/// Downstream ranking treats it as "infinitely far" rather than as a failure.
pub const UNREACHABLE_DISTANCE: f64 = f64::MAX;

/// Largest distance reported between two readable positions, one step below
/// [`UNREACHABLE_DISTANCE`]
pub const MAX_REACHABLE_DISTANCE: f64 = 1.797_693_134_862_315_5e308;

/// Location of a node, in caller-defined units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub height: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        height: 0.0,
    };

    pub fn new(x: f64, y: f64, height: f64) -> Self {
        Self { x, y, height }
    }

    /// True when every coordinate is a finite number
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.height.is_finite()
    }

    /// Euclidean distance to another position.
    ///
    /// Computed without squaring overflow. A distance too large for an `f64`
    /// saturates at [`MAX_REACHABLE_DISTANCE`], so it still ranks closer than
    /// [`UNREACHABLE_DISTANCE`].
    #[inline]
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dh = self.height - other.height;
        let distance = dx.hypot(dy).hypot(dh);
        if distance < UNREACHABLE_DISTANCE {
            distance
        } else {
            MAX_REACHABLE_DISTANCE
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.height)
    }
}

impl From<(f64, f64, f64)> for Position {
    fn from((x, y, height): (f64, f64, f64)) -> Self {
        Self { x, y, height }
    }
}
