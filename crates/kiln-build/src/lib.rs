//! Kiln build orchestration
//!
//! Provides the core of the kiln build system:
//! - Tool registry with per-tool flag profiles and compiler suites
//! - Site and platform configuration
//! - Path-specific flag rules
//! - Content-addressed artifact cache shared across builds
//! - Staged pipeline (fetch, discover, preprocess, analyse, compile, link)
//!   with composable layers and hooks
//! - Parallel per-file work with a bounded worker count

pub mod artifacts;
pub mod builder;
pub mod cache;
pub mod context;
pub mod error;
pub mod flags;
pub mod options;
pub mod pipeline;
pub mod pool;
pub mod profile;
pub mod registry;
pub mod site;
pub mod stages;
pub mod targets;
pub mod tool;
pub mod toolbox;
pub mod transform;

// Re-export main types
pub use artifacts::{ArtifactSet, ArtifactStore};
pub use builder::{BuildSummary, Builder};
pub use cache::{CacheKey, CacheOutcome, CacheStats, ContentCache, SweepReport, TransformId};
pub use context::{BuildConfig, BuildContext, BuildStats, StageTiming};
pub use error::{BuildError, BuildResult};
pub use flags::{FlagRule, FlagRuleSet, FlagSettings, TemplateVars};
pub use options::BuildOptions;
pub use pipeline::{Hook, HookPosition, Layer, Next, Pipeline, PipelineReport, Stage, StageRunner};
pub use pool::run_parallel;
pub use profile::{ProfileTree, DEFAULT_PROFILES};
pub use registry::ToolRegistry;
pub use site::{DefaultSite, FileSite, SiteConfig, SiteOption, SiteRegistry, SiteTarget};
pub use stages::BaseStages;
pub use targets::{Host, LinkTarget};
pub use tool::{Category, Probe, Tool};
pub use toolbox::ToolBox;
pub use transform::{CachedTransformMixin, CommandTransform, FileTransform};
