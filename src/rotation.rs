//! Page rotations, measured clockwise in multiples of 90°.

use std::fmt;

use serde::Serializer;

use crate::prelude::*;

/// A clockwise page rotation. PDF only allows multiples of 90°.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rotation {
    /// Upright.
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// All rotations, in the order we try them. [`Rotation::Deg0`] comes first,
    /// so that it wins any tie.
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    /// Convert a `/Rotate` value to a [`Rotation`]. Negative values and values
    /// of 360° or more are normalized, but anything that isn't a multiple of
    /// 90° is rejected.
    pub fn from_degrees(degrees: i64) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(anyhow!(
                "rotation must be a multiple of 90°, got {}°",
                degrees
            )),
        }
    }

    /// The rotation in degrees, in `0..360`.
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Apply `other` after `self`.
    pub fn then(self, other: Rotation) -> Rotation {
        Self::ALL[(self.quarter_turns() + other.quarter_turns()) % 4]
    }

    /// Is this the upright rotation?
    pub fn is_upright(self) -> bool {
        self == Rotation::Deg0
    }

    fn quarter_turns(self) -> usize {
        usize::from(self.degrees() / 90)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

impl Serialize for Rotation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.degrees())
    }
}
