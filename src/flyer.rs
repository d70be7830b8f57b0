use crate::acquisition::AcquisitionSpec;
use crate::geometry::ScanPath;
use crate::validate::AcceptedProgram;
use crate::Synthesis;
use async_trait::async_trait;
use bon::bon;
use log::debug;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The part of a device's life cycle shared by every fly scan collaborator.
#[async_trait]
pub trait Flyable: Send {
    /// Start the prepared operation. Returns once the device is running.
    async fn kickoff(&mut self) -> anyhow::Result<()>;
    /// Wait until the running operation has finished.
    async fn complete(&mut self) -> anyhow::Result<()>;
}

/// Motion controller executing the scan path.
///
/// The physical trajectory must visit the points of the path in the same
/// raster order the trigger program was built for.
#[async_trait]
pub trait Trajectory: Flyable {
    async fn prepare(&mut self, path: &ScanPath) -> anyhow::Result<()>;
}

/// Hardware sequencer playing the trigger program.
#[async_trait]
pub trait Sequencer: Flyable {
    /// Maximum number of rows the sequencer holds.
    fn capacity(&self) -> usize;

    async fn prepare(&mut self, program: &AcceptedProgram) -> anyhow::Result<()>;
}

/// Detector (or file writer) gated by the sequencer output.
#[async_trait]
pub trait Detector: Flyable {
    async fn prepare(&mut self, acquisition: &AcquisitionSpec) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Trajectory,
    Sequencer,
    Detector,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Trajectory => "trajectory",
            Role::Sequencer => "sequencer",
            Role::Detector => "detector",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Kickoff,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prepare => "prepare",
            Stage::Kickoff => "kick off",
            Stage::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum FlyError {
    #[error(transparent)]
    Synthesis(#[from] crate::Error),
    #[error("{role} failed to {stage}")]
    Collaborator {
        role: Role,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    /// The joint completion did not arrive in time. All collaborators were
    /// abandoned together.
    #[error("fly scan did not complete within {0:?}")]
    Timeout(Duration),
}

async fn step<F>(role: Role, stage: Stage, operation: F) -> Result<(), FlyError>
where
    F: Future<Output = anyhow::Result<()>>,
{
    debug!("{role}: {stage}");
    operation
        .await
        .map_err(|source| FlyError::Collaborator {
            role,
            stage,
            source,
        })
}

/// Awaits `completion`, giving up after `timeout` if there is one.
async fn within<F, O>(timeout: Option<Duration>, completion: F) -> Result<O, FlyError>
where
    F: Future<Output = Result<O, FlyError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, completion)
            .await
            .map_err(|_| FlyError::Timeout(limit))?,
        None => completion.await,
    }
}

/// Runs `path` on the motion controller alone, with no sequencer or
/// detector taking part.
pub async fn fly_trajectory<T: Trajectory>(
    trajectory: &mut T,
    path: &ScanPath,
    timeout: Option<Duration>,
) -> Result<(), FlyError> {
    step(Role::Trajectory, Stage::Prepare, trajectory.prepare(path)).await?;
    step(Role::Trajectory, Stage::Kickoff, trajectory.kickoff()).await?;
    within(
        timeout,
        step(Role::Trajectory, Stage::Complete, trajectory.complete()),
    )
    .await
}

/// The three devices of a fly scan, run as one unit.
pub struct Flyer<T, S, D> {
    trajectory: T,
    sequencer: S,
    detector: D,
    timeout: Option<Duration>,
}

#[bon]
impl<T, S, D> Flyer<T, S, D> {
    #[builder]
    pub fn new(trajectory: T, sequencer: S, detector: D, timeout: Option<Duration>) -> Self {
        Self {
            trajectory,
            sequencer,
            detector,
            timeout,
        }
    }
}

impl<T, S, D> Flyer<T, S, D>
where
    T: Trajectory,
    S: Sequencer,
    D: Detector,
{
    /// Run the fly scan of `synthesis`.
    ///
    /// The trajectory executes the path the program was synthesized from.
    /// Each device is prepared in turn, then the detector, the sequencer and
    /// the trajectory are kicked off in that order, so that nothing moves
    /// before the devices it gates are armed. Finally the three completions
    /// are awaited together. Without a timeout the wait is unbounded.
    pub async fn run(&mut self, synthesis: &Synthesis) -> Result<(), FlyError> {
        let Self {
            trajectory,
            sequencer,
            detector,
            timeout,
        } = self;

        let program = &synthesis.program;
        if program.len() > sequencer.capacity() {
            return Err(crate::Error::CapacityExceeded {
                rows: program.len(),
                capacity: sequencer.capacity(),
            }
            .into());
        }

        step(
            Role::Trajectory,
            Stage::Prepare,
            trajectory.prepare(&synthesis.path),
        )
        .await?;
        step(Role::Sequencer, Stage::Prepare, sequencer.prepare(program)).await?;
        step(
            Role::Detector,
            Stage::Prepare,
            detector.prepare(&synthesis.acquisition),
        )
        .await?;

        step(Role::Detector, Stage::Kickoff, detector.kickoff()).await?;
        step(Role::Sequencer, Stage::Kickoff, sequencer.kickoff()).await?;
        step(Role::Trajectory, Stage::Kickoff, trajectory.kickoff()).await?;

        let completion = async {
            tokio::try_join!(
                step(Role::Trajectory, Stage::Complete, trajectory.complete()),
                step(Role::Sequencer, Stage::Complete, sequencer.complete()),
                step(Role::Detector, Stage::Complete, detector.complete()),
            )
        };
        within(*timeout, completion).await?;

        Ok(())
    }

    pub fn into_parts(self) -> (T, S, D) {
        (self.trajectory, self.sequencer, self.detector)
    }
}
