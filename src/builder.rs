use crate::error::{Error, Result};
use crate::table::{Outputs, Phase, Trigger, TriggerProgram, TriggerRow};
use crate::units::Direction;
use bon::Builder;
use log::{debug, warn};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use uom::si::f64::Time;
use uom::si::time::second;

/// Comparator direction of each line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directions {
    /// Every line is swept the same way.
    Fixed(Direction),
    /// Lines alternate, starting with the given direction (snaked scans).
    Alternating(Direction),
}

impl Directions {
    /// Direction of the `line`-th line (0 based).
    pub fn for_line(self, line: usize) -> Direction {
        match self {
            Directions::Fixed(direction) => direction,
            Directions::Alternating(direction) if line % 2 == 0 => direction,
            Directions::Alternating(direction) => direction.reversed(),
        }
    }
}

/// Where line boundary markers go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerPlacement {
    /// Only between consecutive lines: `n` lines give `n - 1` marker pairs.
    #[default]
    BetweenLines,
    /// After every line, including the last one.
    AfterEachLine,
}

/// How the flat point sequence is cut into lines.
#[derive(Builder, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lines {
    /// Number of points per line.
    pub length: NonZeroUsize,
    #[builder(default)]
    pub markers: MarkerPlacement,
}

impl Lines {
    /// Returns `true` if a line ends right before the `index`-th point.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::builder::Lines;
    /// use std::num::NonZeroUsize;
    ///
    /// let lines = Lines::builder().length(NonZeroUsize::new(10).unwrap()).build();
    /// assert!(!lines.is_boundary(0));
    /// assert!(!lines.is_boundary(9));
    /// assert!(lines.is_boundary(10));
    /// ```
    pub fn is_boundary(&self, index: usize) -> bool {
        index > 0 && index % self.length.get() == 0
    }
    /// Number of marker pairs emitted for a scan of `points` points.
    pub fn marker_pairs(&self, points: usize) -> usize {
        if points == 0 {
            return 0;
        }
        let between = (points - 1) / self.length.get();
        match self.markers {
            MarkerPlacement::BetweenLines => between,
            MarkerPlacement::AfterEachLine => between + 1,
        }
    }
    /// Number of rows of a position table over `points` points.
    pub fn position_rows(&self, points: usize) -> usize {
        points + 2 * self.marker_pairs(points)
    }
}

/// Accumulates rows for a single [`TriggerProgram`].
///
/// The builder is consumed by [`finish`](TableBuilder::finish), so a program
/// can never be extended after it has been built.
#[derive(Clone, Debug)]
pub struct TableBuilder {
    rows: Vec<TriggerRow>,
    prescale: Time,
}

impl TableBuilder {
    pub fn new(prescale: Time) -> Self {
        Self::with_capacity(prescale, 0)
    }

    pub fn with_capacity(prescale: Time, rows: usize) -> Self {
        Self {
            rows: Vec::with_capacity(rows),
            prescale,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row as is.
    pub fn push(&mut self, row: TriggerRow) {
        self.rows.push(row);
    }

    /// Appends a row, folding it into the previous row's repeat count when
    /// both rows are otherwise identical.
    pub fn push_merged(&mut self, row: TriggerRow) {
        if let Some(last) = self.rows.last_mut() {
            let same = TriggerRow {
                repeats: last.repeats,
                ..row
            } == *last;
            if same {
                if let Some(repeats) = last.repeats.checked_add(row.repeats) {
                    last.repeats = repeats;
                    return;
                }
            }
        }
        self.rows.push(row);
    }

    /// Appends the marker pair that flags the end of a line: wait for input
    /// A to go low, then high.
    pub fn line_boundary(&mut self) {
        for trigger in [Trigger::BitALow, Trigger::BitAHigh] {
            self.push(
                TriggerRow::builder()
                    .trigger(trigger)
                    .phase1(Phase::new(1, Outputs::NONE))
                    .phase2(Phase::new(1, Outputs::NONE))
                    .build(),
            );
        }
    }

    /// Appends a one tick pulse on output A fired when the encoder crosses
    /// `position` in `direction`.
    pub fn position(&mut self, direction: Direction, position: i32) {
        self.push(
            TriggerRow::builder()
                .trigger(Trigger::from(direction))
                .position(position)
                .phase1(Phase::new(1, Outputs::A))
                .phase2(Phase::new(1, Outputs::NONE))
                .build(),
        );
    }

    /// Completes the program. Fails if no row was added.
    pub fn finish(self) -> Result<TriggerProgram> {
        if self.rows.is_empty() {
            return Err(Error::EmptyProgram);
        }
        Ok(TriggerProgram::new(self.rows, 1, self.prescale))
    }
}

fn check_line_length(points: usize, lines: &Lines) {
    if points % lines.length.get() != 0 {
        warn!(
            "line length {} does not divide {points} points; the last line is partial",
            lines.length
        );
    }
}

/// Builds a position-triggered program from native comparator positions in
/// the order the motion crosses them.
///
/// A marker pair is inserted before every point that starts a new line.
///
/// # Examples
///
/// ```
/// use flyseq::builder::{position_table, Directions, Lines};
/// use flyseq::table::Trigger;
/// use flyseq::units::Direction;
/// use std::num::NonZeroUsize;
/// use uom::si::{f64::Time, time::microsecond};
///
/// let lines = Lines::builder().length(NonZeroUsize::new(2).unwrap()).build();
/// let program = position_table(
///     [0, 10, 0, 10],
///     Directions::Fixed(Direction::GreaterThan),
///     lines,
///     Time::new::<microsecond>(1.0),
/// )?;
/// let triggers: Vec<_> = program.rows().iter().map(|row| row.trigger).collect();
/// assert_eq!(
///     triggers,
///     [
///         Trigger::PositionGreaterThan,
///         Trigger::PositionGreaterThan,
///         Trigger::BitALow,
///         Trigger::BitAHigh,
///         Trigger::PositionGreaterThan,
///         Trigger::PositionGreaterThan,
///     ]
/// );
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn position_table<I>(
    positions: I,
    directions: Directions,
    lines: Lines,
    prescale: Time,
) -> Result<TriggerProgram>
where
    I: IntoIterator<Item = i32>,
{
    let positions = positions.into_iter();
    let builder = TableBuilder::with_capacity(prescale, positions.size_hint().0);

    let (mut builder, points) =
        positions.fold((builder, 0), |(mut builder, index), position| {
            if lines.is_boundary(index) {
                builder.line_boundary();
            }
            let line = index / lines.length.get();
            builder.position(directions.for_line(line), position);
            (builder, index + 1)
        });
    if points > 0 && lines.markers == MarkerPlacement::AfterEachLine {
        builder.line_boundary();
    }
    check_line_length(points, &lines);

    debug!(
        "built position table: {points} points, {} rows, {directions:?}",
        builder.len()
    );
    builder.finish()
}

/// Relative slack allowed between a duration and the nearest whole tick.
const TICK_TOLERANCE: f64 = 1e-6;

/// Converts a duration to a whole number of prescaled sequencer ticks.
///
/// Durations that are not a whole number of ticks are refused rather than
/// rounded.
///
/// # Examples
///
/// ```
/// use flyseq::builder::ticks;
/// use uom::si::{f64::Time, time::{microsecond, millisecond}};
///
/// let prescale = Time::new::<microsecond>(1.0);
/// assert_eq!(ticks(Time::new::<millisecond>(2.0), prescale)?, 2000);
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn ticks(duration: Time, prescale: Time) -> Result<u32> {
    let tick = prescale.get::<second>();
    if !(tick.is_finite() && tick > 0.0) {
        return Err(Error::InvalidTiming(format!(
            "prescale must be positive, got {tick} s"
        )));
    }
    let seconds = duration.get::<second>();
    let exact = seconds / tick;
    let whole = exact.round();
    if (exact - whole).abs() > TICK_TOLERANCE * whole.abs().max(1.0) {
        return Err(Error::InvalidTiming(format!(
            "{seconds} s is not a whole number of {tick} s ticks"
        )));
    }

    whole.to_u32().ok_or_else(|| {
        Error::InvalidTiming(format!(
            "{seconds} s is not representable in ticks of {tick} s"
        ))
    })
}

/// Builds a time-paced program: every point is an immediate pulse of
/// `livetime` on output A followed by `deadtime` with all outputs low.
///
/// Consecutive points of a line collapse into a single row with a repeat
/// count. Line markers are placed exactly as in [`position_table`].
pub fn timed_table(
    points: usize,
    livetime: Time,
    deadtime: Time,
    lines: Lines,
    prescale: Time,
) -> Result<TriggerProgram> {
    let live = ticks(livetime, prescale)?;
    if live == 0 {
        return Err(Error::InvalidTiming(format!(
            "live time of {} s is shorter than one tick",
            livetime.get::<second>()
        )));
    }
    let dead = ticks(deadtime, prescale)?;
    let row = TriggerRow::builder()
        .trigger(Trigger::Immediate)
        .phase1(Phase::new(live, Outputs::A))
        .phase2(Phase::new(dead, Outputs::NONE))
        .build();

    let mut builder = (0..points).fold(TableBuilder::new(prescale), |mut builder, index| {
        if lines.is_boundary(index) {
            builder.line_boundary();
        }
        builder.push_merged(row);
        builder
    });
    if points > 0 && lines.markers == MarkerPlacement::AfterEachLine {
        builder.line_boundary();
    }
    check_line_length(points, &lines);

    debug!(
        "built timed table: {points} points, {} rows, {live}+{dead} ticks",
        builder.len()
    );
    builder.finish()
}
