//! Base stage bodies
//!
//! [`BaseStages`] sits at the bottom of every pipeline's layer chain and
//! dispatches each stage to its module.

pub mod analyse;
pub mod compile;
pub mod discover;
pub mod fetch;
pub mod link;
pub mod preprocess;

use crate::context::BuildContext;
use crate::error::BuildResult;
use crate::pipeline::{Stage, StageRunner};

/// The default body of every stage
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseStages;

impl StageRunner for BaseStages {
    fn run(&self, stage: Stage, ctx: &mut BuildContext) -> BuildResult<()> {
        match stage {
            Stage::Fetch => fetch::run(ctx),
            Stage::Discover => discover::run(ctx),
            Stage::Preprocess => preprocess::run(ctx),
            Stage::Analyse => analyse::run(ctx),
            Stage::Compile => compile::run(ctx),
            Stage::Link => link::run(ctx),
        }
    }
}
