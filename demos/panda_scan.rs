/// Synthesizes the sequencer table of a PandA driven raster fly scan and
/// prints it together with the detector arming parameters.
///
/// Run with `RUST_LOG=debug` to follow the synthesis steps.
use anyhow::{Context, Result};
use flyseq::config::SequencerConfig;
use flyseq::geometry::ScanPath;
use flyseq::units::Axis;
use flyseq::Synthesizer;
use uom::si::time::{microsecond, second};

fn main() -> Result<()> {
    env_logger::init();

    // ===========================================
    // These are most likely your free parameters:
    let scan = "Fly(1 @ (Line(BL99P-MO-STAGE-02:Y, 0, 1, 10) * Line(BL99P-MO-STAGE-02:X, 0, 1, 10)))";
    // ===========================================

    // ===========================================
    // Then, these come from the motor records and the PandA itself:
    let x = Axis::new("BL99P-MO-STAGE-02:X", -2e-5)?;
    let config = SequencerConfig::builder().capacity(4096).build();
    // ===========================================

    let path: ScanPath = scan.parse().context("failed to parse scan")?;
    let synthesis = Synthesizer::builder()
        .axis(x)
        .config(config)
        .build()
        .synthesize(&path)
        .context("failed to synthesize trigger table")?;

    println!("{}", *synthesis.program);
    println!();
    println!(
        "events: {}, trigger: {:?}, live: {} s, dead: {} us",
        synthesis.acquisition.event_count,
        synthesis.acquisition.trigger,
        synthesis.acquisition.livetime.get::<second>(),
        synthesis.acquisition.deadtime.get::<microsecond>(),
    );

    Ok(())
}
