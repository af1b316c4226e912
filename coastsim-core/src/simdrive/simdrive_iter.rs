//! Batches of independent simulations, run in parallel with rayon.

use super::{SimDrive, SimDriveSummary};
use crate::imports::*;
use rayon::prelude::*;

/// A batch of independent simulations, e.g. a sweep over coast parameters.
/// Each run owns its cycles, so runs never share state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SimDriveVec(pub Vec<SimDrive>);

fn run_indexed((idx, sd): (usize, &mut SimDrive)) -> anyhow::Result<()> {
    sd.sim_drive()
        .with_context(|| format!("simdrive idx: {}", idx))
}

impl SimDriveVec {
    /// Run every simulation, in parallel unless `parallelize` is
    /// `Some(false)`. Errors name the index of the failing run.
    pub fn sim_drive(&mut self, parallelize: Option<bool>) -> anyhow::Result<()> {
        if parallelize.unwrap_or(true) {
            self.0.par_iter_mut().enumerate().try_for_each(run_indexed)
        } else {
            self.0.iter_mut().enumerate().try_for_each(run_indexed)
        }
    }

    /// Summaries of every run, in order
    pub fn summaries(&self) -> Vec<SimDriveSummary> {
        self.0.iter().map(SimDrive::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl SerdeAPI for SimDriveVec {
    fn init(&mut self) -> anyhow::Result<()> {
        self.0
            .iter_mut()
            .enumerate()
            .try_for_each(|(idx, sd)| sd.init().with_context(|| format!("simdrive idx: {}", idx)))
    }
}

impl FromIterator<SimDrive> for SimDriveVec {
    fn from_iter<I: IntoIterator<Item = SimDrive>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
