use crate::error::{Error, Result};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Sense in which the encoder must cross a comparator position for the
/// sequencer to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Fire once the encoder count rises to the comparator position.
    GreaterThan,
    /// Fire once the encoder count falls to the comparator position.
    LessThan,
}

impl Direction {
    /// Returns the opposite direction.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::units::Direction;
    ///
    /// assert_eq!(Direction::GreaterThan.reversed(), Direction::LessThan);
    /// ```
    pub fn reversed(self) -> Self {
        match self {
            Direction::GreaterThan => Direction::LessThan,
            Direction::LessThan => Direction::GreaterThan,
        }
    }
}

/// A physical motion axis as discovered on the beamline.
///
/// The resolution is the size of one native encoder count in engineering
/// units. A negative resolution means the encoder counts down while the axis
/// moves towards larger engineering positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    name: String,
    resolution: f64,
}

impl Axis {
    /// Creates a new axis. Fails if the resolution is zero or not finite.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::units::Axis;
    ///
    /// let x = Axis::new("x", -0.5)?;
    /// assert_eq!(x.to_native(1.25)?, -2);
    /// assert!(Axis::new("y", 0.0).is_err());
    /// # Ok::<(), flyseq::Error>(())
    /// ```
    pub fn new(name: impl Into<String>, resolution: f64) -> Result<Self> {
        let name = name.into();
        check_resolution(resolution).map_err(|_| {
            Error::InvalidAxisConfig(format!("axis `{name}` has resolution {resolution}"))
        })?;

        Ok(Self { name, resolution })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Converts an engineering position on this axis to encoder counts.
    pub fn to_native(&self, position: f64) -> Result<i32> {
        to_native(position, self.resolution)
    }

    /// Direction in which the encoder moves while sweeping `start..stop`.
    pub fn direction(&self, start: f64, stop: f64) -> Direction {
        // The resolution was checked on construction.
        sense(start, stop, self.resolution)
    }
}

fn check_resolution(resolution: f64) -> Result<()> {
    if resolution == 0.0 || !resolution.is_finite() {
        return Err(Error::InvalidAxisConfig(format!(
            "resolution must be finite and non-zero, got {resolution}"
        )));
    }
    Ok(())
}

/// Converts an engineering position to native comparator units.
///
/// The quotient `position / resolution` is truncated toward zero, matching
/// the integer cast the motion controller applies to its own demand
/// positions.
///
/// # Examples
///
/// ```
/// use flyseq::units::to_native;
///
/// assert_eq!(to_native(1.0, 0.25)?, 4);
/// assert_eq!(to_native(-0.75, 0.5)?, -1);
/// assert!(to_native(1.0, 0.0).is_err());
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn to_native(position: f64, resolution: f64) -> Result<i32> {
    check_resolution(resolution)?;

    (position / resolution)
        .trunc()
        .to_i32()
        .ok_or(Error::PositionOutOfRange {
            position,
            resolution,
        })
}

/// Projects a native comparator value back to engineering units.
///
/// This is the inverse of [`to_native`] up to the truncation, i.e. the
/// result is within one count of the original position.
pub fn to_engineering(native: i32, resolution: f64) -> Result<f64> {
    check_resolution(resolution)?;
    Ok(f64::from(native) * resolution)
}

/// Resolves the comparator direction for a sweep from `start` to `stop`.
///
/// The sweep is `LessThan` when the native start lies above the native stop
/// and `GreaterThan` otherwise. A degenerate sweep (`start == stop`) resolves
/// to `GreaterThan`.
///
/// # Examples
///
/// ```
/// use flyseq::units::{direction_of, Direction};
///
/// assert_eq!(direction_of(0.0, 1.0, 1e-3)?, Direction::GreaterThan);
/// // A negative resolution flips the encoder sense.
/// assert_eq!(direction_of(0.0, 1.0, -1e-3)?, Direction::LessThan);
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn direction_of(start: f64, stop: f64, resolution: f64) -> Result<Direction> {
    check_resolution(resolution)?;
    Ok(sense(start, stop, resolution))
}

fn sense(start: f64, stop: f64, resolution: f64) -> Direction {
    if start / resolution > stop / resolution {
        Direction::LessThan
    } else {
        Direction::GreaterThan
    }
}
