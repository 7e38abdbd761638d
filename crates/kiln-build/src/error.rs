/// Build system error types
use crate::pipeline::Stage;
use crate::tool::Category;
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Tool not found: {category} - {name}")]
    ToolNotFound { category: Category, name: String },

    #[error("No default {category} available")]
    NoDefaultAvailable { category: Category },

    #[error("Tool '{name}' is already registered as a {category}")]
    DuplicateTool { category: Category, name: String },

    #[error("Unknown compiler suite '{0}'")]
    UnknownSuite(String),

    #[error("No usable {category}: tried {tried:?}")]
    ToolUnavailable {
        category: Category,
        tried: Vec<String>,
    },

    #[error("Profile '{profile}' is already defined for tool '{tool}'")]
    DuplicateProfile { tool: String, profile: String },

    #[error("Cannot define profile '{profile}' for tool '{tool}': parent '{parent}' is not defined")]
    UnknownParent {
        tool: String,
        profile: String,
        parent: String,
    },

    #[error("Unknown profile '{profile}' for tool '{tool}'")]
    UnknownProfile { tool: String, profile: String },

    #[error("Unknown library '{library}' for linker '{linker}'")]
    UnknownLibrary { linker: String, library: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    #[error("Failed to launch '{tool}': {error}")]
    ToolLaunch {
        tool: String,
        error: std::io::Error,
    },

    #[error("'{tool}' exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("Transformation of {path} failed: {error}")]
    Transformation { path: PathBuf, error: String },

    #[error("Could not fetch '{label}': {}", .attempts.join("; "))]
    FetchFailed { label: String, attempts: Vec<String> },

    #[error("Stage '{stage}' failed after {completed:?}: {source}")]
    StageFailed {
        stage: Stage,
        completed: Vec<Stage>,
        #[source]
        source: Box<BuildError>,
    },

    #[error("Build cache error: {0}")]
    CacheError(String),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] kiln_config::ConfigError),

    #[error("Build failed: {0}")]
    BuildFailed(String),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl ToString) -> Self {
        Self::Configuration(message.to_string())
    }

    /// Create a transformation error
    pub fn transformation(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::Transformation {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Create a tool not found error
    pub fn tool_not_found(category: Category, name: impl Into<String>) -> Self {
        Self::ToolNotFound {
            category,
            name: name.into(),
        }
    }

    /// Create an unknown profile error
    pub fn unknown_profile(tool: impl Into<String>, profile: impl Into<String>) -> Self {
        Self::UnknownProfile {
            tool: tool.into(),
            profile: profile.into(),
        }
    }

    /// Fatal setup mistakes that retrying or falling back cannot fix
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::ToolNotFound { .. }
            | Self::NoDefaultAvailable { .. }
            | Self::DuplicateTool { .. }
            | Self::UnknownSuite(_)
            | Self::ToolUnavailable { .. }
            | Self::DuplicateProfile { .. }
            | Self::UnknownParent { .. }
            | Self::UnknownProfile { .. }
            | Self::UnknownLibrary { .. }
            | Self::Configuration(_)
            | Self::InvalidPattern { .. }
            | Self::Config(_) => true,
            Self::StageFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// The stage a pipeline failure happened in, if any
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_names_every_tool() {
        let err = BuildError::ToolUnavailable {
            category: Category::FortranCompiler,
            tried: vec!["gfortran".to_string(), "mpif90-gfortran".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("gfortran"));
        assert!(message.contains("mpif90-gfortran"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_stage_failure_classification() {
        let err = BuildError::StageFailed {
            stage: Stage::Compile,
            completed: vec![Stage::Fetch, Stage::Discover],
            source: Box::new(BuildError::transformation("a.f90", "boom")),
        };
        assert_eq!(err.failed_stage(), Some(Stage::Compile));
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("compile"));
    }
}
