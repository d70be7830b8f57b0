use crate::error::{Error, Result};
use bon::bon;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uom::si::f64::Time;
use uom::si::time::{microsecond, second};

/// Textual scan expressions, e.g. `Fly(0.1 @ Line(y, 0, 1, 10) * Line(x, 0, 1, 10))`.
pub mod expr;

/// How the detector exposure of each point is gated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gating {
    /// Fixed dwell per point, paced by the sequencer clock.
    Time,
    /// Exposures start when the encoder crosses a comparator position.
    #[default]
    Position,
}

/// Which position of a point's frame is reported when flattening.
///
/// Every scan point owns a frame: the half step either side of its nominal
/// position. During a fly scan the axis is still moving when the frame
/// starts, so triggers are placed on the edge crossed first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    /// The frame edge crossed first in the direction of travel.
    #[default]
    Entry,
    /// The nominal position of the point.
    Midpoint,
    /// The frame edge crossed last in the direction of travel.
    Exit,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Sweep {
    /// Equally spaced points from `start` to `stop` inclusive.
    Line { start: f64, stop: f64 },
    /// The axis is held at `value` for every step.
    Static { value: f64 },
}

/// A sweep of a single axis.
///
/// A [`Segment`] on its own is unchecked; it is validated when it becomes
/// part of a [`ScanPath`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    axis: String,
    sweep: Sweep,
    steps: usize,
    snake: bool,
}

impl Segment {
    /// A linear sweep from `start` to `stop` (both inclusive) in `steps` points.
    pub fn line(axis: impl Into<String>, start: f64, stop: f64, steps: usize) -> Self {
        Self {
            axis: axis.into(),
            sweep: Sweep::Line { start, stop },
            steps,
            snake: false,
        }
    }
    /// Hold `axis` at `value` for `steps` points.
    pub fn fixed(axis: impl Into<String>, value: f64, steps: usize) -> Self {
        Self {
            axis: axis.into(),
            sweep: Sweep::Static { value },
            steps,
            snake: false,
        }
    }
    /// Reverse the sweep on every other repetition.
    pub fn snaked(mut self) -> Self {
        self.snake = true;
        self
    }

    pub fn axis(&self) -> &str {
        &self.axis
    }

    pub fn sweep(&self) -> Sweep {
        self.sweep
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_snaked(&self) -> bool {
        self.snake
    }

    /// First position of a forward pass.
    pub fn start(&self) -> f64 {
        match self.sweep {
            Sweep::Line { start, .. } => start,
            Sweep::Static { value } => value,
        }
    }

    /// Last position of a forward pass.
    pub fn stop(&self) -> f64 {
        match self.sweep {
            Sweep::Line { stop, .. } => stop,
            Sweep::Static { value } => value,
        }
    }

    fn step(&self) -> f64 {
        match self.sweep {
            // A single point still spans a frame of `stop - start`.
            Sweep::Line { start, stop } if self.steps == 1 => stop - start,
            Sweep::Line { start, stop } => (stop - start) / (self.steps - 1) as f64,
            Sweep::Static { .. } => 0.0,
        }
    }

    fn position(&self, index: usize, reversed: bool, edge: Edge) -> f64 {
        let index = if reversed {
            self.steps - 1 - index
        } else {
            index
        };
        let offset = match (edge, reversed) {
            (Edge::Midpoint, _) => 0.0,
            (Edge::Entry, false) | (Edge::Exit, true) => -0.5,
            (Edge::Entry, true) | (Edge::Exit, false) => 0.5,
        };

        self.start() + (index as f64 + offset) * self.step()
    }

    fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::InvalidGeometry(format!(
                "segment on `{}` must have at least one step",
                self.axis
            )));
        }
        match self.sweep {
            Sweep::Line { start, stop } => {
                if !start.is_finite() || !stop.is_finite() {
                    return Err(Error::InvalidGeometry(format!(
                        "segment on `{}` has non-finite bounds {start}..{stop}",
                        self.axis
                    )));
                }
                if start == stop && self.steps > 1 {
                    return Err(Error::InvalidGeometry(format!(
                        "segment on `{}` sweeps {} steps over zero length",
                        self.axis, self.steps
                    )));
                }
            }
            Sweep::Static { value } => {
                if !value.is_finite() {
                    return Err(Error::InvalidGeometry(format!(
                        "segment on `{}` holds non-finite value {value}",
                        self.axis
                    )));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.snake {
            write!(f, "~")?;
        }
        match self.sweep {
            Sweep::Line { start, stop } => {
                write!(f, "Line({}, {start}, {stop}, {})", self.axis, self.steps)
            }
            Sweep::Static { value } => write!(f, "Static({}, {value}, {})", self.axis, self.steps),
        }
    }
}

/// The raster product of one or more [`Segment`]s.
///
/// Segments are stored outer to inner; the innermost segment varies fastest.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanPath {
    segments: Vec<Segment>,
    duration: Time,
    deadtime: Time,
    gating: Gating,
    total: usize,
}

#[bon]
impl ScanPath {
    #[builder]
    pub fn new(
        #[builder(field)] segments: Vec<Segment>,
        duration: Time,
        #[builder(default)] gating: Gating,
        #[builder(default = Time::new::<microsecond>(10.0))] deadtime: Time,
    ) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::InvalidGeometry(
                "a scan path needs at least one segment".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut total: usize = 1;
        for segment in &segments {
            segment.validate()?;
            if !seen.insert(segment.axis()) {
                return Err(Error::InvalidGeometry(format!(
                    "axis `{}` appears in more than one segment",
                    segment.axis()
                )));
            }
            total = total.checked_mul(segment.steps()).ok_or_else(|| {
                Error::InvalidGeometry("total number of points overflows".to_string())
            })?;
        }

        let seconds = duration.get::<second>();
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(Error::InvalidGeometry(format!(
                "duration must be positive, got {seconds} s"
            )));
        }
        let dead = deadtime.get::<second>();
        if !(dead.is_finite() && dead >= 0.0) {
            return Err(Error::InvalidGeometry(format!(
                "deadtime must not be negative, got {dead} s"
            )));
        }

        Ok(Self {
            segments,
            duration,
            deadtime,
            gating,
            total,
        })
    }
}

impl<S: scan_path_builder::State> ScanPathBuilder<S> {
    /// Add the next (inner) segment to the [`ScanPath`].
    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }
    /// Add a linear sweep as the next (inner) segment.
    pub fn line(self, axis: impl Into<String>, start: f64, stop: f64, steps: usize) -> Self {
        self.segment(Segment::line(axis, start, stop, steps))
    }
    /// Add a linear sweep that reverses on every other repetition.
    pub fn snaked_line(
        self,
        axis: impl Into<String>,
        start: f64,
        stop: f64,
        steps: usize,
    ) -> Self {
        self.segment(Segment::line(axis, start, stop, steps).snaked())
    }
    /// Add a held axis as the next (inner) segment.
    pub fn fixed(self, axis: impl Into<String>, value: f64, steps: usize) -> Self {
        self.segment(Segment::fixed(axis, value, steps))
    }
}

impl ScanPath {
    /// Segments from outermost to innermost.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
    /// The segment that varies fastest.
    pub fn innermost(&self) -> &Segment {
        // Never empty: checked on construction.
        &self.segments[self.segments.len() - 1]
    }
    /// Position of `axis` in the nesting (0 is outermost) and its segment.
    pub fn segment_of(&self, axis: &str) -> Option<(usize, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .find(|(_, segment)| segment.axis() == axis)
    }
    /// Per-point live time.
    pub fn duration(&self) -> Time {
        self.duration
    }
    /// Minimum gap between consecutive trigger events.
    pub fn deadtime(&self) -> Time {
        self.deadtime
    }

    pub fn gating(&self) -> Gating {
        self.gating
    }
    /// Product of all step counts.
    pub fn total_points(&self) -> usize {
        self.total
    }

    /// Nominal positions of `axis`, one per scan point, in raster order.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::geometry::ScanPath;
    /// use uom::si::{f64::Time, time::second};
    ///
    /// let path = ScanPath::builder()
    ///     .line("y", 0.0, 1.0, 2)
    ///     .line("x", 0.0, 2.0, 3)
    ///     .duration(Time::new::<second>(0.1))
    ///     .build()?;
    ///
    /// let x: Vec<f64> = path.flatten("x")?.collect();
    /// assert_eq!(x, [0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    /// let y: Vec<f64> = path.flatten("y")?.collect();
    /// assert_eq!(y, [0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    /// # Ok::<(), flyseq::Error>(())
    /// ```
    pub fn flatten(&self, axis: &str) -> Result<Positions<'_>> {
        self.flatten_edges(axis, Edge::Midpoint)
    }

    /// Frame positions of `axis` selected by `edge`, one per scan point, in
    /// raster order.
    pub fn flatten_edges(&self, axis: &str, edge: Edge) -> Result<Positions<'_>> {
        let (depth, segment) = self.segment_of(axis).ok_or_else(|| {
            Error::InvalidAxisConfig(format!("axis `{axis}` is not part of the scan path"))
        })?;
        let stride = self.segments[depth + 1..]
            .iter()
            .map(Segment::steps)
            .product();

        Ok(Positions {
            segment,
            stride,
            edge,
            next: 0,
            end: self.total,
        })
    }
}

impl fmt::Display for ScanPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let product = self
            .segments
            .iter()
            .map(Segment::to_string)
            .collect::<Vec<_>>()
            .join(" * ");
        let body = format!("{} @ {product}", self.duration.get::<second>());

        match self.gating {
            Gating::Position => write!(f, "Fly({body})"),
            Gating::Time => write!(f, "{body}"),
        }
    }
}

/// Lazy sequence of one axis' positions over a [`ScanPath`].
///
/// Cloning the iterator (or calling [`ScanPath::flatten`] again) restarts
/// the sequence from the first point.
#[derive(Clone, Debug)]
pub struct Positions<'a> {
    segment: &'a Segment,
    // Number of consecutive points sharing one index of `segment`.
    stride: usize,
    edge: Edge,
    next: usize,
    end: usize,
}

impl Iterator for Positions<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.end {
            return None;
        }
        let pass = self.next / self.stride;
        self.next += 1;

        let steps = self.segment.steps();
        let reversed = self.segment.is_snaked() && (pass / steps) % 2 == 1;

        Some(self.segment.position(pass % steps, reversed, self.edge))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Positions<'_> {}

/// Build a [`ScanPath`] of plain lines from `(axis, start, stop, steps)`
/// tuples ordered outer to inner.
///
/// # Examples
///
/// ```
/// use flyseq::geometry::build;
/// use uom::si::{f64::Time, time::second};
///
/// let path = build(
///     &[("y", 0.0, 1.0, 10), ("x", 0.0, 1.0, 10)],
///     Time::new::<second>(1.0),
/// )?;
/// assert_eq!(path.total_points(), 100);
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn build(axis_bounds: &[(&str, f64, f64, usize)], duration: Time) -> Result<ScanPath> {
    axis_bounds
        .iter()
        .fold(ScanPath::builder(), |builder, &(axis, start, stop, steps)| {
            builder.line(axis, start, stop, steps)
        })
        .duration(duration)
        .build()
}
