use crate::error::{Error, Result};
use crate::table::TriggerProgram;
use log::debug;
use serde::Serialize;
use std::ops::Deref;
use uom::si::time::second;

/// A [`TriggerProgram`] that fits a sequencer and whose rows are consistent.
///
/// This is the only form in which a program is handed to a sequencer. It
/// can only be obtained through [`validate`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AcceptedProgram {
    program: TriggerProgram,
    capacity: usize,
}

impl AcceptedProgram {
    pub fn program(&self) -> &TriggerProgram {
        &self.program
    }
    /// Sequencer capacity the program was checked against.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn into_inner(self) -> TriggerProgram {
        self.program
    }
}

impl Deref for AcceptedProgram {
    type Target = TriggerProgram;

    fn deref(&self) -> &Self::Target {
        &self.program
    }
}

/// Checks `program` against a sequencer holding at most `capacity` rows.
pub fn check(program: &TriggerProgram, capacity: usize) -> Result<()> {
    if program.is_empty() {
        return Err(Error::EmptyProgram);
    }
    if program.len() > capacity {
        return Err(Error::CapacityExceeded {
            rows: program.len(),
            capacity,
        });
    }
    let tick = program.prescale().get::<second>();
    if !(tick.is_finite() && tick > 0.0) {
        return Err(Error::InvalidTiming(format!(
            "prescale must be positive, got {tick} s"
        )));
    }

    for (index, row) in program.rows().iter().enumerate() {
        let reason = match (row.trigger.is_position(), row.position) {
            (true, None) => Some(format!("{} needs a comparator position", row.trigger)),
            (false, Some(position)) => Some(format!(
                "{} does not compare positions but carries {position}",
                row.trigger
            )),
            _ if row.repeats == 0 => Some("repeat count must be at least 1".to_string()),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(Error::MalformedRow { index, reason });
        }
    }

    Ok(())
}

/// Validates `program` and wraps it for hand-off to a sequencer.
///
/// The program is consumed: a rejected program cannot be patched up and
/// retried, a new one has to be built.
///
/// # Examples
///
/// ```
/// use flyseq::table::{Trigger, TriggerProgram, TriggerRow};
/// use flyseq::validate::validate;
/// use flyseq::Error;
/// use uom::si::{f64::Time, time::microsecond};
///
/// let row = TriggerRow::builder().trigger(Trigger::Immediate).build();
/// let program = TriggerProgram::new(vec![row; 3], 1, Time::new::<microsecond>(1.0));
///
/// assert!(matches!(
///     validate(program.clone(), 2),
///     Err(Error::CapacityExceeded { rows: 3, capacity: 2 })
/// ));
/// assert_eq!(validate(program, 4)?.len(), 3);
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn validate(program: TriggerProgram, capacity: usize) -> Result<AcceptedProgram> {
    check(&program, capacity)?;
    debug!("accepted program of {}/{capacity} rows", program.len());

    Ok(AcceptedProgram { program, capacity })
}

impl TriggerProgram {
    /// See [`validate`].
    pub fn validate(self, capacity: usize) -> Result<AcceptedProgram> {
        validate(self, capacity)
    }
}
