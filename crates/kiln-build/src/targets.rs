/// Link target and offload host types
use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};

/// What the link stage produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkTarget {
    /// Executable program
    #[default]
    Executable,
    /// Archive of object files (`lib<name>.a`)
    StaticLibrary,
    /// Shared object (`lib<name>.so`)
    SharedLibrary,
}

impl LinkTarget {
    /// Parse link target from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> BuildResult<Self> {
        match s {
            "executable" => Ok(Self::Executable),
            "static-library" => Ok(Self::StaticLibrary),
            "shared-library" => Ok(Self::SharedLibrary),
            other => Err(BuildError::configuration(format!(
                "unknown link target '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::StaticLibrary => "static-library",
            Self::SharedLibrary => "shared-library",
        }
    }

    /// Output file name for a project called `name`
    pub fn output_filename(&self, name: &str) -> String {
        match self {
            Self::Executable => name.to_string(),
            Self::StaticLibrary => format!("lib{}.a", name),
            Self::SharedLibrary => format!("lib{}.so", name),
        }
    }
}

impl std::fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where OpenMP or OpenACC offloaded regions run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    #[default]
    Cpu,
    Gpu,
}

impl Host {
    pub const NAMES: &'static [&'static str] = &["cpu", "gpu"];

    /// Parse a host name; case is ignored and the empty string means `cpu`
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> BuildResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            _ => Err(BuildError::configuration(format!(
                "invalid host '{}', expected one of: {}",
                s,
                Self::NAMES.join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_accepts_config_names() {
        for name in kiln_config::project::LINK_TARGETS {
            assert_eq!(LinkTarget::from_str(name).unwrap().name(), *name);
        }
        assert!(LinkTarget::from_str("dll").is_err());
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(LinkTarget::Executable.output_filename("gungho"), "gungho");
        assert_eq!(LinkTarget::StaticLibrary.output_filename("gcom"), "libgcom.a");
        assert_eq!(LinkTarget::SharedLibrary.output_filename("gcom"), "libgcom.so");
    }

    #[test]
    fn test_default_is_executable() {
        assert_eq!(LinkTarget::default(), LinkTarget::Executable);
    }

    #[test]
    fn test_host_names() {
        assert_eq!(Host::from_str("GPU").unwrap(), Host::Gpu);
        assert_eq!(Host::from_str("cpu").unwrap(), Host::Cpu);
        assert_eq!(Host::from_str("").unwrap(), Host::Cpu);
        assert_eq!(Host::default(), Host::Cpu);

        let err = Host::from_str("fpga").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("fpga"));
    }
}
