use crate::acquisition::AcquisitionSpec;
use crate::builder::{position_table, timed_table, Directions, Lines};
use crate::config::SequencerConfig;
use crate::geometry::{Gating, ScanPath, Segment, Sweep};
use crate::table::TriggerProgram;
use crate::units::Axis;
use crate::validate::AcceptedProgram;
use bon::bon;
use log::debug;
use std::num::NonZeroUsize;

pub use crate::error::{Error, Result};
pub use crate::parse::ParseError;

/// Detector arming parameters.
pub mod acquisition;
/// Row emission from flattened scan positions.
pub mod builder;
pub mod config;
mod error;
/// Prepare, kickoff and completion of the devices taking part in a fly scan.
pub mod flyer;
/// Scan paths as nested segments.
pub mod geometry;
mod parse;
/// Sequencer rows and programs.
pub mod table;
/// Engineering to encoder unit conversion.
pub mod units;
/// Capacity and consistency checks of trigger programs.
pub mod validate;

/// Everything the devices of one fly scan are armed with.
#[derive(Clone, Debug, PartialEq)]
pub struct Synthesis {
    /// The path the program was synthesized from, which is also the one the
    /// trajectory has to execute.
    pub path: ScanPath,
    pub program: AcceptedProgram,
    pub acquisition: AcquisitionSpec,
}

/// Turns scan paths into sequencer programs for one trigger axis and one
/// sequencer.
///
/// A [`Synthesizer`] holds no state between calls; the same path always
/// produces the same [`Synthesis`].
#[derive(Clone, Debug)]
pub struct Synthesizer {
    axis: Axis,
    config: SequencerConfig,
}

#[bon]
impl Synthesizer {
    #[builder]
    pub fn new(axis: Axis, #[builder(default)] config: SequencerConfig) -> Self {
        Self { axis, config }
    }
}

impl Synthesizer {
    /// Axis whose encoder the sequencer compares against.
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Synthesize the trigger program and detector arming parameters of
    /// `path`.
    ///
    /// Position-gated paths must have the trigger axis as their innermost,
    /// moving segment: its step count is the line length and the motion
    /// crosses its positions in raster order.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::units::Axis;
    /// use flyseq::Synthesizer;
    ///
    /// let synthesizer = Synthesizer::builder()
    ///     .axis(Axis::new("x", -2e-5)?)
    ///     .build();
    /// let synthesis = synthesizer.synthesize(
    ///     &"Fly(1 @ Line(y, 0, 1, 10) * Line(x, 0, 1, 10))".parse()?,
    /// )?;
    ///
    /// assert_eq!(synthesis.acquisition.event_count, 100);
    /// assert_eq!(synthesis.program.len(), 100 + 9 * 2);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn synthesize(&self, path: &ScanPath) -> Result<Synthesis> {
        let acquisition = acquisition::derive(path)?;
        let innermost = path.innermost();
        let lines = Lines {
            // Step counts are checked on construction of the path.
            length: NonZeroUsize::new(innermost.steps()).ok_or_else(|| {
                Error::InvalidGeometry("innermost segment has no steps".to_string())
            })?,
            markers: self.config.markers,
        };

        let program = match path.gating() {
            Gating::Position => self.position_program(path, lines)?,
            Gating::Time => timed_table(
                path.total_points(),
                path.duration(),
                path.deadtime(),
                lines,
                self.config.prescale,
            )?,
        };
        let program = program.validate(self.config.capacity)?;

        Ok(Synthesis {
            path: path.clone(),
            program,
            acquisition,
        })
    }

    fn trigger_segment<'a>(&self, path: &'a ScanPath) -> Result<&'a Segment> {
        let name = self.axis.name();
        let (depth, segment) = path.segment_of(name).ok_or_else(|| {
            Error::InvalidAxisConfig(format!("trigger axis `{name}` is not part of the scan"))
        })?;
        if depth + 1 != path.segments().len() {
            return Err(Error::InvalidGeometry(format!(
                "trigger axis `{name}` must be the innermost segment"
            )));
        }
        if let Sweep::Static { .. } = segment.sweep() {
            return Err(Error::InvalidGeometry(format!(
                "trigger axis `{name}` is held static"
            )));
        }

        Ok(segment)
    }

    fn position_program(&self, path: &ScanPath, lines: Lines) -> Result<TriggerProgram> {
        let segment = self.trigger_segment(path)?;

        // Refuse before converting a single position.
        let rows = lines.position_rows(path.total_points());
        if rows > self.config.capacity {
            return Err(Error::CapacityExceeded {
                rows,
                capacity: self.config.capacity,
            });
        }

        let direction = self.axis.direction(segment.start(), segment.stop());
        let directions = if segment.is_snaked() {
            Directions::Alternating(direction)
        } else {
            Directions::Fixed(direction)
        };
        debug!(
            "triggering on `{}` ({directions:?}), {} points in lines of {}",
            self.axis.name(),
            path.total_points(),
            lines.length
        );

        let positions = path
            .flatten_edges(self.axis.name(), self.config.edge)?
            .map(|position| self.axis.to_native(position))
            .collect::<Result<Vec<_>>>()?;

        position_table(positions, directions, lines, self.config.prescale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::DetectorTrigger;
    use crate::builder::MarkerPlacement;
    use crate::geometry::{build, Edge};
    use crate::table::Trigger;
    use crate::units::{to_engineering, Direction};
    use rand::Rng;
    use rand_distr::{Distribution, Uniform};
    use uom::si::f64::Time;
    use uom::si::time::{microsecond, second};

    fn seconds(s: f64) -> Time {
        Time::new::<second>(s)
    }

    fn synthesizer(resolution: f64) -> Synthesizer {
        Synthesizer::builder()
            .axis(Axis::new("x", resolution).unwrap())
            .build()
    }

    fn grid() -> ScanPath {
        build(&[("y", 0.0, 1.0, 10), ("x", 0.0, 1.0, 10)], seconds(1.0)).unwrap()
    }

    #[test]
    fn synthesize_grid() {
        let synthesis = synthesizer(-2e-5).synthesize(&grid()).unwrap();
        let program = synthesis.program;

        assert_eq!(program.len(), 118);
        assert_eq!(program.repeats(), 1);
        assert_eq!(program.prescale(), Time::new::<microsecond>(1.0));
        let positions: Vec<_> = program.positions().collect();
        assert_eq!(positions.len(), 100);
        assert_eq!(
            positions[..10],
            [2777, -2777, -8333, -13888, -19444, -24999, -30555, -36111, -41666, -47222]
        );
        assert!(program
            .rows()
            .iter()
            .filter(|row| row.trigger.is_position())
            .all(|row| row.trigger == Trigger::PositionLessThan));

        assert_eq!(
            synthesis.acquisition,
            AcquisitionSpec {
                event_count: 100,
                trigger: DetectorTrigger::ConstantGate,
                livetime: seconds(1.0),
                deadtime: Time::new::<microsecond>(10.0),
            }
        );
    }

    #[test]
    fn synthesize_positive_resolution() {
        let synthesis = synthesizer(2e-5).synthesize(&grid()).unwrap();
        assert_eq!(
            synthesis.program.rows()[0].trigger,
            Trigger::PositionGreaterThan
        );
        assert_eq!(synthesis.program.rows()[0].position, Some(-2777));
    }

    #[test]
    fn synthesize_keeps_path() {
        let path = grid();
        let synthesis = synthesizer(-2e-5).synthesize(&path).unwrap();
        assert_eq!(synthesis.path, path);
        assert_eq!(synthesis.path.total_points(), synthesis.acquisition.event_count);
    }

    #[test]
    fn synthesize_rejects_bad_prescale() {
        for prescale in [-1.0, 0.0, f64::NAN] {
            let synthesizer = Synthesizer::builder()
                .axis(Axis::new("x", -2e-5).unwrap())
                .config(
                    SequencerConfig::builder()
                        .prescale(Time::new::<microsecond>(prescale))
                        .build(),
                )
                .build();
            assert!(matches!(
                synthesizer.synthesize(&grid()),
                Err(Error::InvalidTiming(_))
            ));
        }
    }

    #[test]
    fn synthesize_idempotent() {
        let synthesizer = synthesizer(-2e-5);
        let path = grid();
        assert_eq!(
            synthesizer.synthesize(&path).unwrap(),
            synthesizer.synthesize(&path).unwrap()
        );
    }

    #[test]
    fn synthesize_round_trip() {
        let mut rng = rand::rng();
        let magnitude = Uniform::new(1e-6, 1e-3).unwrap();

        for _ in 0..20 {
            let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
            let resolution = sign * magnitude.sample(&mut rng);
            let path = build(&[("y", 0.0, 1.0, 3), ("x", -0.5, 0.5, 7)], seconds(1.0)).unwrap();
            let program = synthesizer(resolution).synthesize(&path).unwrap().program;

            let expected: Vec<_> = path.flatten_edges("x", Edge::Entry).unwrap().collect();
            let actual: Vec<_> = program
                .positions()
                .map(|native| to_engineering(native, resolution).unwrap())
                .collect();
            assert_eq!(actual.len(), expected.len());
            for (a, e) in actual.iter().zip(&expected) {
                assert!((a - e).abs() < resolution.abs() * (1.0 + 1e-6));
            }
        }
    }

    #[test]
    fn synthesize_snaked() {
        let path = ScanPath::builder()
            .line("y", 0.0, 1.0, 2)
            .snaked_line("x", 0.0, 1.0, 3)
            .duration(seconds(1.0))
            .build()
            .unwrap();
        let program = synthesizer(0.25).synthesize(&path).unwrap().program;

        let rows: Vec<_> = program
            .rows()
            .iter()
            .filter(|row| row.trigger.is_position())
            .map(|row| (row.trigger, row.position.unwrap()))
            .collect();
        assert_eq!(
            rows,
            [
                (Trigger::PositionGreaterThan, -1),
                (Trigger::PositionGreaterThan, 1),
                (Trigger::PositionGreaterThan, 3),
                (Trigger::PositionLessThan, 5),
                (Trigger::PositionLessThan, 3),
                (Trigger::PositionLessThan, 1),
            ]
        );
    }

    #[test]
    fn synthesize_midpoints_after_each_line() {
        let config = SequencerConfig::builder()
            .edge(Edge::Midpoint)
            .markers(MarkerPlacement::AfterEachLine)
            .build();
        let synthesizer = Synthesizer::builder()
            .axis(Axis::new("x", 0.5).unwrap())
            .config(config)
            .build();
        let path = build(&[("x", 0.0, 2.0, 3)], seconds(1.0)).unwrap();
        let program = synthesizer.synthesize(&path).unwrap().program;

        assert_eq!(program.positions().collect::<Vec<_>>(), [0, 2, 4]);
        assert_eq!(program.len(), 5);
        assert_eq!(program.rows()[3].trigger, Trigger::BitALow);
        assert_eq!(program.rows()[4].trigger, Trigger::BitAHigh);
    }

    #[test]
    fn synthesize_capacity_exceeded() {
        let synthesizer = Synthesizer::builder()
            .axis(Axis::new("x", -2e-5).unwrap())
            .config(SequencerConfig::builder().capacity(117).build())
            .build();
        assert_eq!(
            synthesizer.synthesize(&grid()).unwrap_err(),
            Error::CapacityExceeded {
                rows: 118,
                capacity: 117
            }
        );
    }

    #[test]
    fn synthesize_axis_errors() {
        let missing = Synthesizer::builder()
            .axis(Axis::new("z", 1e-3).unwrap())
            .build();
        assert!(matches!(
            missing.synthesize(&grid()),
            Err(Error::InvalidAxisConfig(_))
        ));

        let outer = Synthesizer::builder()
            .axis(Axis::new("y", 1e-3).unwrap())
            .build();
        assert!(matches!(
            outer.synthesize(&grid()),
            Err(Error::InvalidGeometry(msg)) if msg.contains("innermost")
        ));

        let path = ScanPath::builder()
            .line("y", 0.0, 1.0, 2)
            .fixed("x", 0.5, 4)
            .duration(seconds(1.0))
            .build()
            .unwrap();
        assert!(matches!(
            synthesizer(1e-3).synthesize(&path),
            Err(Error::InvalidGeometry(msg)) if msg.contains("static")
        ));
    }

    #[test]
    fn synthesize_out_of_range() {
        let path = build(&[("x", 0.0, 1e6, 10)], seconds(1.0)).unwrap();
        assert!(matches!(
            synthesizer(1e-6).synthesize(&path),
            Err(Error::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn synthesize_time_gated() {
        let path = ScanPath::builder()
            .line("y", 0.0, 1.0, 10)
            .line("x", 0.0, 1.0, 10)
            .duration(Time::new::<microsecond>(50.0))
            .gating(Gating::Time)
            .build()
            .unwrap();
        let synthesis = synthesizer(-2e-5).synthesize(&path).unwrap();

        assert_eq!(synthesis.program.len(), 28);
        assert_eq!(synthesis.program.rows()[0].trigger, Trigger::Immediate);
        assert_eq!(synthesis.program.rows()[0].repeats, 10);
        assert_eq!(synthesis.acquisition.trigger, DetectorTrigger::Internal);
    }

    #[test]
    fn direction_matches_axis() {
        let axis = Axis::new("x", -2e-5).unwrap();
        assert_eq!(axis.direction(0.0, 1.0), Direction::LessThan);
    }

    #[test]
    fn synthesize_on_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Synthesizer>();
        assert_send_sync::<Synthesis>();

        let synthesizer = synthesizer(-2e-5);
        let path = grid();
        let expected = synthesizer.synthesize(&path).unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| synthesizer.synthesize(&path).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }
}
