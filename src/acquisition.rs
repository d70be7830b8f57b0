use crate::error::Result;
use crate::geometry::{Gating, ScanPath};
use serde::{Deserialize, Serialize};
use uom::si::f64::Time;

/// How a detector interprets its trigger input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorTrigger {
    /// The detector paces itself.
    Internal,
    /// Each rising edge starts an exposure of fixed length.
    EdgeTrigger,
    /// Exposures follow the gate; all gates have the same length.
    ConstantGate,
    /// Exposures follow the gate; gates may differ in length.
    VariableGate,
}

/// What the detector has to be armed with for one scan.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AcquisitionSpec {
    pub event_count: usize,
    pub trigger: DetectorTrigger,
    pub livetime: Time,
    pub deadtime: Time,
}

/// Derives the detector arming parameters of `path`.
///
/// # Examples
///
/// ```
/// use flyseq::acquisition::{derive, DetectorTrigger};
/// use flyseq::geometry::build;
/// use uom::si::{f64::Time, time::second};
///
/// let path = build(&[("y", 0.0, 1.0, 10), ("x", 0.0, 1.0, 10)], Time::new::<second>(1.0))?;
/// let spec = derive(&path)?;
/// assert_eq!(spec.event_count, 100);
/// assert_eq!(spec.trigger, DetectorTrigger::ConstantGate);
/// # Ok::<(), flyseq::Error>(())
/// ```
pub fn derive(path: &ScanPath) -> Result<AcquisitionSpec> {
    // A ScanPath is validated on construction, so nothing can fail here.
    let trigger = match path.gating() {
        Gating::Position => DetectorTrigger::ConstantGate,
        Gating::Time => DetectorTrigger::Internal,
    };

    Ok(AcquisitionSpec {
        event_count: path.total_points(),
        trigger,
        livetime: path.duration(),
        deadtime: path.deadtime(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{build, Segment};
    use proptest::prelude::*;
    use uom::si::time::{microsecond, second};

    #[test]
    fn derive_position_gated() {
        let path = ScanPath::builder()
            .line("y", 0.0, 1.0, 4)
            .line("x", 0.0, 1.0, 5)
            .duration(Time::new::<second>(0.5))
            .deadtime(Time::new::<microsecond>(2.0))
            .build()
            .unwrap();

        assert_eq!(
            derive(&path).unwrap(),
            AcquisitionSpec {
                event_count: 20,
                trigger: DetectorTrigger::ConstantGate,
                livetime: Time::new::<second>(0.5),
                deadtime: Time::new::<microsecond>(2.0),
            }
        );
    }

    #[test]
    fn derive_time_gated() {
        let path = ScanPath::builder()
            .line("x", 0.0, 1.0, 5)
            .duration(Time::new::<second>(0.5))
            .gating(Gating::Time)
            .build()
            .unwrap();
        assert_eq!(derive(&path).unwrap().trigger, DetectorTrigger::Internal);
    }

    #[test]
    fn derive_serializes() {
        let path = build(&[("x", 0.0, 1.0, 3)], Time::new::<second>(2.0)).unwrap();
        let json = serde_json::to_value(derive(&path).unwrap()).unwrap();
        assert_eq!(json["event_count"], 3);
        assert_eq!(json["trigger"], "ConstantGate");
    }

    proptest! {
        #[test]
        fn event_count_is_product_of_steps(steps in prop::collection::vec(1usize..8, 1..5)) {
            let path = steps
                .iter()
                .enumerate()
                .fold(ScanPath::builder(), |builder, (i, &n)| {
                    builder.segment(Segment::line(format!("axis{i}"), 0.0, 1.0, n))
                })
                .duration(Time::new::<second>(1.0))
                .build()
                .unwrap();

            prop_assert_eq!(derive(&path).unwrap().event_count, steps.iter().product::<usize>());
        }
    }
}
