use crate::units::Direction;
use crate::ParseError;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use uom::si::f64::Time;
use uom::si::time::microsecond;
use winnow::ascii::{dec_int, dec_uint, float, newline};
use winnow::combinator::{alt, opt, separated, terminated};
use winnow::token::take_while;
use winnow::Parser;

const OUTPUTS: usize = 6;

/// Set of sequencer outputs (A to F) driven high during a phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outputs(u8);

impl Outputs {
    pub const NONE: Self = Self(0);
    pub const A: Self = Self(1 << 0);
    pub const B: Self = Self(1 << 1);
    pub const C: Self = Self(1 << 2);
    pub const D: Self = Self(1 << 3);
    pub const E: Self = Self(1 << 4);
    pub const F: Self = Self(1 << 5);

    /// Creates an output set from its bit representation. Bits above output F
    /// are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::table::Outputs;
    ///
    /// assert_eq!(Outputs::from_bits(0b11), Outputs::A | Outputs::B);
    /// ```
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & ((1 << OUTPUTS) - 1))
    }

    pub fn bits(self) -> u8 {
        self.0
    }
    /// Returns `true` if every output in `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Outputs {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Outputs {
    /// One character per output, A first: `X` if driven high, `.` otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = (0..OUTPUTS)
            .map(|i| if self.0 & (1 << i) != 0 { 'X' } else { '.' })
            .collect();
        f.write_str(&text)
    }
}

/// Condition a sequencer row waits for before playing its phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    Immediate,
    /// Input bit A is low.
    BitALow,
    /// Input bit A is high.
    BitAHigh,
    /// Encoder A is at or above the row's position.
    PositionGreaterThan,
    /// Encoder A is at or below the row's position.
    PositionLessThan,
}

impl Trigger {
    /// Returns `true` if the condition compares against a row position.
    pub fn is_position(self) -> bool {
        match self {
            Trigger::PositionGreaterThan | Trigger::PositionLessThan => true,
            Trigger::Immediate | Trigger::BitALow | Trigger::BitAHigh => false,
        }
    }
}

impl From<Direction> for Trigger {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::GreaterThan => Trigger::PositionGreaterThan,
            Direction::LessThan => Trigger::PositionLessThan,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Immediate => "Immediate",
            Trigger::BitALow => "BITA=0",
            Trigger::BitAHigh => "BITA=1",
            Trigger::PositionGreaterThan => "POSA>=POSITION",
            Trigger::PositionLessThan => "POSA<=POSITION",
        };
        f.write_str(name)
    }
}

/// Half of a row's output waveform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    /// Length of the phase in prescaled sequencer ticks.
    pub ticks: u32,
    pub outputs: Outputs,
}

impl Phase {
    pub fn new(ticks: u32, outputs: Outputs) -> Self {
        Self { ticks, outputs }
    }
}

/// One entry of a sequencer program.
///
/// # Examples
///
/// ```
/// use flyseq::table::{Outputs, Phase, Trigger, TriggerRow};
///
/// let row = TriggerRow::builder()
///     .trigger(Trigger::PositionGreaterThan)
///     .position(1200)
///     .phase1(Phase::new(1, Outputs::A))
///     .phase2(Phase::new(1, Outputs::NONE))
///     .build();
/// assert_eq!(row.repeats, 1);
/// assert_eq!(row.to_string(), "1 POSA>=POSITION 1200 1 X..... 1 ......");
/// ```
#[derive(Builder, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerRow {
    #[builder(default = 1)]
    pub repeats: u16,
    pub trigger: Trigger,
    /// Comparator position in native encoder counts.
    pub position: Option<i32>,
    #[builder(default)]
    pub phase1: Phase,
    #[builder(default)]
    pub phase2: Phase,
}

impl fmt::Display for TriggerRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.repeats, self.trigger)?;
        match self.position {
            Some(position) => write!(f, "{position}")?,
            None => write!(f, "-")?,
        }
        write!(
            f,
            " {} {} {} {}",
            self.phase1.ticks, self.phase1.outputs, self.phase2.ticks, self.phase2.outputs
        )
    }
}

/// An ordered sequencer program.
///
/// A [`TriggerProgram`] is immutable once built. It is not guaranteed to be
/// loadable until it has been validated into an
/// [`AcceptedProgram`](crate::validate::AcceptedProgram).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TriggerProgram {
    rows: Vec<TriggerRow>,
    repeats: u32,
    prescale: Time,
}

impl TriggerProgram {
    /// Assembles a program without checking it.
    pub fn new(rows: Vec<TriggerRow>, repeats: u32, prescale: Time) -> Self {
        Self {
            rows,
            repeats,
            prescale,
        }
    }

    pub fn rows(&self) -> &[TriggerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    /// Number of times the whole program is played.
    pub fn repeats(&self) -> u32 {
        self.repeats
    }
    /// Duration of one sequencer tick.
    pub fn prescale(&self) -> Time {
        self.prescale
    }
    /// Comparator positions in program order.
    pub fn positions(&self) -> impl Iterator<Item = i32> + '_ {
        self.rows.iter().filter_map(|row| row.position)
    }
}

impl fmt::Display for TriggerProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repeats {} prescale {}us",
            self.repeats,
            self.prescale.get::<microsecond>()
        )?;
        for row in &self.rows {
            write!(f, "\n{row}")?;
        }
        Ok(())
    }
}

fn outputs(input: &mut &str) -> winnow::Result<Outputs> {
    take_while(OUTPUTS, ['X', '.'])
        .map(|pattern: &str| {
            let bits = pattern
                .chars()
                .enumerate()
                .filter(|(_, c)| *c == 'X')
                .fold(0u8, |bits, (i, _)| bits | (1 << i));
            Outputs::from_bits(bits)
        })
        .parse_next(input)
}

fn trigger(input: &mut &str) -> winnow::Result<Trigger> {
    alt((
        "Immediate".value(Trigger::Immediate),
        "BITA=0".value(Trigger::BitALow),
        "BITA=1".value(Trigger::BitAHigh),
        "POSA>=POSITION".value(Trigger::PositionGreaterThan),
        "POSA<=POSITION".value(Trigger::PositionLessThan),
    ))
    .parse_next(input)
}

fn position(input: &mut &str) -> winnow::Result<Option<i32>> {
    alt((dec_int.map(Some), '-'.value(None))).parse_next(input)
}

fn parse_row(input: &mut &str) -> winnow::Result<TriggerRow> {
    let (repeats, _, trigger, _, position, _) =
        (dec_uint, ' ', trigger, ' ', position, ' ').parse_next(input)?;
    let (ticks1, _, outputs1, _, ticks2, _, outputs2) =
        (dec_uint, ' ', outputs, ' ', dec_uint, ' ', outputs).parse_next(input)?;

    Ok(TriggerRow {
        repeats,
        trigger,
        position,
        phase1: Phase::new(ticks1, outputs1),
        phase2: Phase::new(ticks2, outputs2),
    })
}

fn parse_header(input: &mut &str) -> winnow::Result<(u32, f64)> {
    let (_, repeats, _, prescale, _) =
        ("repeats ", dec_uint, " prescale ", float, "us").parse_next(input)?;
    Ok((repeats, prescale))
}

impl std::str::FromStr for TriggerProgram {
    type Err = ParseError;

    /// Parse a [`TriggerProgram`] from the listing produced by its `Display`
    /// implementation.
    ///
    /// Parsing only checks syntax; the result still has to be validated
    /// before it is handed to a sequencer.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::str::FromStr;
    /// use flyseq::table::{Trigger, TriggerProgram};
    ///
    /// let text = "repeats 1 prescale 1us\n1 POSA<=POSITION -2777 1 X..... 1 ......";
    /// let program = TriggerProgram::from_str(text)?;
    /// assert_eq!(program.rows()[0].trigger, Trigger::PositionLessThan);
    /// assert_eq!(program.rows()[0].position, Some(-2777));
    /// assert_eq!(program.to_string(), text);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let ((repeats, prescale), rows) = (
            terminated(parse_header, opt(newline)),
            terminated(separated(0.., parse_row, newline), opt(newline)),
        )
            .parse(input)
            .map_err(|e| ParseError::from_parse(e, "invalid line starting here"))?;

        Ok(Self::new(
            rows,
            repeats,
            Time::new::<microsecond>(prescale),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn position_row(trigger: Trigger, position: i32) -> TriggerRow {
        TriggerRow::builder()
            .trigger(trigger)
            .position(position)
            .phase1(Phase::new(1, Outputs::A))
            .phase2(Phase::new(1, Outputs::NONE))
            .build()
    }

    #[test]
    fn outputs_from_bits() {
        assert_eq!(Outputs::from_bits(0), Outputs::NONE);
        assert_eq!(Outputs::from_bits(0xff).bits(), 0b11_1111);
        assert!(Outputs::from_bits(0b101).contains(Outputs::A | Outputs::C));
        assert!(!Outputs::A.contains(Outputs::B));
    }

    #[test]
    fn outputs_to_string() {
        assert_eq!(Outputs::NONE.to_string(), "......");
        assert_eq!(Outputs::A.to_string(), "X.....");
        assert_eq!((Outputs::B | Outputs::F).to_string(), ".X...X");
    }

    #[test]
    fn trigger_is_position() {
        assert!(Trigger::PositionGreaterThan.is_position());
        assert!(Trigger::PositionLessThan.is_position());
        assert!(!Trigger::Immediate.is_position());
        assert!(!Trigger::BitALow.is_position());
        assert!(!Trigger::BitAHigh.is_position());
    }

    #[test]
    fn trigger_from_direction() {
        assert_eq!(
            Trigger::from(Direction::GreaterThan),
            Trigger::PositionGreaterThan
        );
        assert_eq!(Trigger::from(Direction::LessThan), Trigger::PositionLessThan);
    }

    #[test]
    fn row_builder_defaults() {
        let row = TriggerRow::builder().trigger(Trigger::BitAHigh).build();
        assert_eq!(row.repeats, 1);
        assert_eq!(row.position, None);
        assert_eq!(row.phase1, Phase::default());
        assert_eq!(row.to_string(), "1 BITA=1 - 0 ...... 0 ......");
    }

    #[test]
    fn program_to_string() {
        let program = TriggerProgram::new(
            vec![
                position_row(Trigger::PositionLessThan, -100),
                TriggerRow::builder().trigger(Trigger::BitALow).build(),
            ],
            1,
            Time::new::<microsecond>(1.0),
        );
        assert_eq!(
            program.to_string(),
            "repeats 1 prescale 1us
1 POSA<=POSITION -100 1 X..... 1 ......
1 BITA=0 - 0 ...... 0 ......"
        );
        assert_eq!(program.positions().collect::<Vec<_>>(), [-100]);
    }

    #[test]
    fn program_from_str() {
        let mut string = String::from("repeats 3 prescale 0.5us");
        let program = TriggerProgram::from_str(&string).unwrap();
        assert!(program.is_empty());
        assert_eq!(program.repeats(), 3);
        assert_eq!(program.prescale(), Time::new::<microsecond>(0.5));

        string.push_str("\n12 Immediate - 100 X.X... 5 ......\n");
        let program = TriggerProgram::from_str(&string).unwrap();
        assert_eq!(
            program.rows(),
            [TriggerRow {
                repeats: 12,
                trigger: Trigger::Immediate,
                position: None,
                phase1: Phase::new(100, Outputs::A | Outputs::C),
                phase2: Phase::new(5, Outputs::NONE),
            }]
        );

        string.push_str("1 POSA>=POSITION 42 1 X..... 1 ......");
        let program = TriggerProgram::from_str(&string).unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(
            program,
            TriggerProgram::from_str(&program.to_string()).unwrap()
        );
    }

    #[test]
    fn program_from_str_keeps_malformed_rows() {
        // Syntax is fine; the validator rejects the mismatch.
        let program =
            TriggerProgram::from_str("repeats 1 prescale 1us\n1 Immediate 5 1 X..... 1 ......")
                .unwrap();
        assert_eq!(program.rows()[0].position, Some(5));
    }

    #[test]
    fn program_from_str_error() {
        let error =
            TriggerProgram::from_str("repeats 1 prescale 1us\n1 POSA>POSITION 5 1 X..... 1 ......")
                .unwrap_err();
        assert!(error.to_string().contains("invalid line starting here"));

        assert!(TriggerProgram::from_str("1 Immediate - 1 X..... 1 ......").is_err());
    }

    #[test]
    fn program_serializes_to_json() {
        let program = TriggerProgram::new(
            vec![position_row(Trigger::PositionGreaterThan, 7)],
            1,
            Time::new::<microsecond>(1.0),
        );
        let json = serde_json::to_value(&program).unwrap();
        assert_eq!(json["repeats"], 1);
        assert_eq!(json["rows"][0]["position"], 7);
        assert_eq!(json["rows"][0]["trigger"], "PositionGreaterThan");
    }
}
