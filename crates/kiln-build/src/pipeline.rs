//! Staged build pipeline
//!
//! A build runs six stages in a fixed order. Each stage goes through a chain
//! of [`Layer`]s before reaching the base stage body ([`StageRunner`]). A
//! layer may do work before or after deferring to the rest of the chain, or
//! replace the stage entirely by not calling [`Next::run`].
//!
//! Layers run in the order they were added: the first layer added is the
//! outermost.

use crate::context::{BuildContext, StageTiming};
use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Build stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Discover,
    Preprocess,
    Analyse,
    Compile,
    Link,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 6] = [
        Stage::Fetch,
        Stage::Discover,
        Stage::Preprocess,
        Stage::Analyse,
        Stage::Compile,
        Stage::Link,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Discover => "discover",
            Self::Preprocess => "preprocess",
            Self::Analyse => "analyse",
            Self::Compile => "compile",
            Self::Link => "link",
        }
    }

    /// Parse stage from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> BuildResult<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| BuildError::configuration(format!("unknown stage '{}'", s)))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The innermost body of every stage
pub trait StageRunner: Send + Sync {
    fn run(&self, stage: Stage, ctx: &mut BuildContext) -> BuildResult<()>;
}

/// A pipeline layer wrapping stage execution
pub trait Layer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run `stage`; call `next.run(ctx)` to continue down the chain
    fn run_stage(&self, stage: Stage, ctx: &mut BuildContext, next: Next<'_>) -> BuildResult<()> {
        let _ = stage;
        next.run(ctx)
    }
}

/// The rest of the chain below a layer
pub struct Next<'a> {
    stage: Stage,
    layers: &'a [Box<dyn Layer>],
    base: &'a dyn StageRunner,
}

impl<'a> Next<'a> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Continue with the next layer, or the base stage body
    pub fn run(self, ctx: &mut BuildContext) -> BuildResult<()> {
        match self.layers.split_first() {
            Some((layer, rest)) => {
                debug!(stage = %self.stage, layer = layer.name(), "entering layer");
                let next = Next {
                    stage: self.stage,
                    layers: rest,
                    base: self.base,
                };
                layer.run_stage(self.stage, ctx, next)
            }
            None => self.base.run(self.stage, ctx),
        }
    }
}

/// Outcome of a successful pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub completed: Vec<Stage>,
    pub stages: Vec<StageTiming>,
    pub total_seconds: f64,
}

/// Stage executor
pub struct Pipeline {
    base: Box<dyn StageRunner>,
    layers: Vec<Box<dyn Layer>>,
}

impl Pipeline {
    /// Create a pipeline with no layers
    pub fn new(base: impl StageRunner + 'static) -> Self {
        Self {
            base: Box::new(base),
            layers: Vec::new(),
        }
    }

    /// Add a layer inside the ones already added
    pub fn with_layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn add_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    /// Layer names, outermost first
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Run a single stage through the layer chain
    pub fn run_stage(&self, stage: Stage, ctx: &mut BuildContext) -> BuildResult<()> {
        Next {
            stage,
            layers: &self.layers,
            base: self.base.as_ref(),
        }
        .run(ctx)
    }

    /// Run every stage in order, stopping at the first failure
    ///
    /// Nothing is rolled back: files written by completed stages stay on disk.
    pub fn run(&self, ctx: &mut BuildContext) -> BuildResult<PipelineReport> {
        let start = Instant::now();
        let mut completed = Vec::new();
        let mut stages = Vec::new();

        for stage in Stage::ALL {
            info!("{} ...", stage);
            let stage_start = Instant::now();

            if let Err(error) = self.run_stage(stage, ctx) {
                return Err(BuildError::StageFailed {
                    stage,
                    completed,
                    source: Box::new(error),
                });
            }

            let timing = StageTiming {
                stage,
                seconds: seconds(stage_start.elapsed()),
            };
            debug!(%stage, seconds = timing.seconds, "stage complete");
            ctx.stats.stages.push(timing.clone());
            stages.push(timing);
            completed.push(stage);
        }

        ctx.stats.cache = ctx.cache().stats();

        Ok(PipelineReport {
            completed,
            stages,
            total_seconds: seconds(start.elapsed()),
        })
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Where a hook runs relative to its stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPosition {
    Before,
    After,
}

type HookFn = Box<dyn Fn(&mut BuildContext) -> BuildResult<()> + Send + Sync>;

/// A layer running an action before or after one stage
pub struct Hook {
    stage: Stage,
    name: String,
    position: HookPosition,
    action: HookFn,
}

impl Hook {
    /// Run `action` before `stage`
    pub fn before<F>(stage: Stage, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut BuildContext) -> BuildResult<()> + Send + Sync + 'static,
    {
        Self {
            stage,
            name: name.into(),
            position: HookPosition::Before,
            action: Box::new(action),
        }
    }

    /// Run `action` after `stage` succeeds
    pub fn after<F>(stage: Stage, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut BuildContext) -> BuildResult<()> + Send + Sync + 'static,
    {
        Self {
            stage,
            name: name.into(),
            position: HookPosition::After,
            action: Box::new(action),
        }
    }

    pub fn position(&self) -> HookPosition {
        self.position
    }
}

impl Layer for Hook {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_stage(&self, stage: Stage, ctx: &mut BuildContext, next: Next<'_>) -> BuildResult<()> {
        if stage != self.stage {
            return next.run(ctx);
        }
        match self.position {
            HookPosition::Before => {
                (self.action)(ctx)?;
                next.run(ctx)
            }
            HookPosition::After => {
                next.run(ctx)?;
                (self.action)(ctx)
            }
        }
    }
}
