use crate::builder::MarkerPlacement;
use crate::geometry::Edge;
use bon::Builder;
use serde::{Deserialize, Serialize};
use uom::si::f64::Time;
use uom::si::time::microsecond;

/// Row capacity of a PandA sequencer block.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Properties of the target sequencer and how tables are laid out for it.
///
/// Missing fields take their defaults when deserialized.
///
/// # Examples
///
/// ```
/// use flyseq::config::{SequencerConfig, DEFAULT_CAPACITY};
///
/// let config = SequencerConfig::builder().capacity(1024).build();
/// assert_eq!(config.capacity, 1024);
/// assert_eq!(SequencerConfig::default().capacity, DEFAULT_CAPACITY);
/// ```
#[derive(Builder, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Maximum number of rows the sequencer holds.
    #[builder(default = DEFAULT_CAPACITY)]
    pub capacity: usize,
    /// Duration of one sequencer tick.
    #[builder(default = Time::new::<microsecond>(1.0))]
    pub prescale: Time,
    /// Frame edge the comparator positions are placed on.
    #[builder(default)]
    pub edge: Edge,
    #[builder(default)]
    pub markers: MarkerPlacement,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
