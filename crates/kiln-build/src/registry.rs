//! Tool registry
//!
//! Keeps, per category, the registered tools in registration order plus an
//! optional designated default. Built mutably during setup, then shared as
//! `Arc<ToolRegistry>`; per-tool flag state stays mutable through the tools.

use crate::error::{BuildError, BuildResult};
use crate::tool::{Category, Probe, Tool};
use crate::toolbox::mpi_wrapper_name;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct CategoryTable {
    tools: Vec<Arc<Tool>>,
    default: Option<Arc<Tool>>,
}

/// Registry of every tool a build may use
#[derive(Debug, Default)]
pub struct ToolRegistry {
    categories: HashMap<Category, CategoryTable>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the GNU, Intel classic, shell, preprocessor and archiver tools
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        if let Err(error) = registry.register_builtin_tools() {
            warn!(%error, "builtin tool registration failed");
        }
        registry
    }

    /// Register the builtin tools into this registry
    ///
    /// Per suite: C compiler, Fortran compiler, then their MPI wrappers.
    /// GNU comes first so it is the fallback default.
    pub fn register_builtin_tools(&mut self) -> BuildResult<()> {
        let suites = [
            ("gnu", "gcc", "gfortran", "-fopenmp", Some("-fopenacc")),
            ("intel-classic", "icc", "ifort", "-qopenmp", None),
        ];

        for (suite, cc, fc, openmp, openacc) in suites {
            let mut cc = Tool::new(cc, Category::CCompiler)
                .with_suite(suite)
                .with_openmp_flag(openmp);
            let mut fc = Tool::new(fc, Category::FortranCompiler)
                .with_suite(suite)
                .with_openmp_flag(openmp);
            if let Some(flag) = openacc {
                cc = cc.with_openacc_flag(flag);
                fc = fc.with_openacc_flag(flag);
            }
            let cc = self.register(cc)?;
            let fc = self.register(fc)?;
            self.register(
                Tool::new(mpi_wrapper_name(&cc), Category::CCompiler)
                    .with_exec("mpicc")
                    .with_mpi(true)
                    .wrapping(cc),
            )?;
            self.register(
                Tool::new(mpi_wrapper_name(&fc), Category::FortranCompiler)
                    .with_exec("mpif90")
                    .with_mpi(true)
                    .wrapping(fc),
            )?;
        }

        let shell_probe = || Probe::Run(vec!["-c".to_string(), "true".to_string()]);

        self.register(Tool::new("cpp", Category::CPreprocessor))?;
        self.register(
            Tool::new("fpp", Category::FortranPreprocessor)
                .with_exec("cpp")
                .with_args(["-traditional-cpp", "-P"]),
        )?;
        self.register(Tool::new("bash", Category::Shell).with_probe(shell_probe()))?;
        self.register(Tool::new("sh", Category::Shell).with_probe(shell_probe()))?;
        self.register(Tool::new("ar", Category::Archiver))?;

        for misc in ["git", "svn", "fcm"] {
            self.register(Tool::new(misc, Category::Misc))?;
        }
        Ok(())
    }

    /// Register a tool; compilers also get a `linker-<name>` linker
    pub fn register(&mut self, tool: Tool) -> BuildResult<Arc<Tool>> {
        let category = tool.category();
        if self.contains(category, tool.name()) {
            return Err(BuildError::DuplicateTool {
                category,
                name: tool.name().to_string(),
            });
        }

        let tool = Arc::new(tool);
        self.categories
            .entry(category)
            .or_default()
            .tools
            .push(Arc::clone(&tool));
        debug!(%category, tool = %tool.name(), "registered tool");

        if category.is_compiler() {
            let linker = Tool::linker_for(&tool);
            if !self.contains(Category::Linker, linker.name()) {
                self.categories
                    .entry(Category::Linker)
                    .or_default()
                    .tools
                    .push(Arc::new(linker));
            }
        }

        Ok(tool)
    }

    /// Check whether a tool is registered
    pub fn contains(&self, category: Category, name: &str) -> bool {
        self.tools(category).iter().any(|t| t.name() == name)
    }

    /// Look up a tool by category and name
    pub fn get(&self, category: Category, name: &str) -> BuildResult<Arc<Tool>> {
        self.tools(category)
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| BuildError::tool_not_found(category, name))
    }

    /// Look up a tool by name, or else by executable name
    ///
    /// Several tools can share an executable (`mpif90` wraps more than one
    /// compiler); an available one is preferred.
    pub fn find(&self, category: Category, name: &str) -> BuildResult<Arc<Tool>> {
        if let Ok(tool) = self.get(category, name) {
            return Ok(tool);
        }

        let matches: Vec<&Arc<Tool>> = self
            .tools(category)
            .iter()
            .filter(|t| t.exec_name() == name)
            .collect();
        matches
            .iter()
            .find(|t| t.is_available())
            .or_else(|| matches.first())
            .map(|t| Arc::clone(t))
            .ok_or_else(|| BuildError::tool_not_found(category, name))
    }

    /// Tools of a category in registration order
    pub fn tools(&self, category: Category) -> &[Arc<Tool>] {
        self.categories
            .get(&category)
            .map(|table| table.tools.as_slice())
            .unwrap_or(&[])
    }

    /// Designate the default tool of a category
    pub fn set_default(&mut self, category: Category, name: &str) -> BuildResult<()> {
        let tool = self.get(category, name)?;
        self.categories.entry(category).or_default().default = Some(tool);
        Ok(())
    }

    /// The designated default, whether or not it is available
    pub fn designated_default(&self, category: Category) -> Option<&Arc<Tool>> {
        self.categories.get(&category)?.default.as_ref()
    }

    /// Default tool of a category
    ///
    /// The designated default is returned only when available; otherwise the
    /// first available tool in registration order.
    pub fn get_default(&self, category: Category) -> BuildResult<Arc<Tool>> {
        self.get_default_where(category, |_| true)
    }

    /// Default tool of a category among tools accepted by `filter`
    ///
    /// When the designated default is rejected or unavailable, tools of the
    /// same suite are tried before the rest.
    pub fn get_default_where<F>(&self, category: Category, filter: F) -> BuildResult<Arc<Tool>>
    where
        F: Fn(&Tool) -> bool,
    {
        let designated = self.designated_default(category);
        if let Some(tool) = designated {
            if filter(tool) && tool.is_available() {
                return Ok(Arc::clone(tool));
            }
        }

        let usable = |tool: &&Arc<Tool>| filter(tool) && tool.is_available();
        let tools = self.tools(category);

        let same_suite = designated.and_then(|d| d.suite()).and_then(|suite| {
            tools
                .iter()
                .filter(|t| t.suite() == Some(suite))
                .find(usable)
        });

        same_suite
            .or_else(|| tools.iter().find(usable))
            .cloned()
            .ok_or(BuildError::NoDefaultAvailable { category })
    }

    /// Make the first tool of `suite` the default in every category that has one
    pub fn set_default_suite(&mut self, suite: &str) -> BuildResult<()> {
        let mut matched = false;
        for table in self.categories.values_mut() {
            if let Some(tool) = table.tools.iter().find(|t| t.suite() == Some(suite)) {
                table.default = Some(Arc::clone(tool));
                matched = true;
            }
        }

        if matched {
            debug!(suite, "default suite set");
            Ok(())
        } else {
            Err(BuildError::UnknownSuite(suite.to_string()))
        }
    }

    /// Available compilers and linkers, probed now
    pub fn available_by_category(&self) -> BTreeMap<Category, Vec<Arc<Tool>>> {
        [Category::CCompiler, Category::FortranCompiler, Category::Linker]
            .into_iter()
            .map(|category| {
                let available = self
                    .tools(category)
                    .iter()
                    .filter(|t| t.is_available())
                    .cloned()
                    .collect();
                (category, available)
            })
            .collect()
    }

    /// Total number of registered tools
    pub fn len(&self) -> usize {
        self.categories.values().map(|t| t.tools.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assumed(name: &str, category: Category, available: bool) -> Tool {
        Tool::new(name, category).with_probe(Probe::Assume(available))
    }

    #[test]
    fn test_register_adds_linker() {
        let mut registry = ToolRegistry::new();
        registry
            .register(assumed("gfortran", Category::FortranCompiler, true))
            .unwrap();

        let linker = registry.get(Category::Linker, "linker-gfortran").unwrap();
        assert_eq!(linker.wrapped().unwrap().name(), "gfortran");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(assumed("gcc", Category::CCompiler, true)).unwrap();
        let err = registry
            .register(assumed("gcc", Category::CCompiler, true))
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateTool { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_same_name_in_other_category_is_allowed() {
        let mut registry = ToolRegistry::new();
        registry.register(assumed("cpp", Category::CPreprocessor, true)).unwrap();
        registry.register(assumed("cpp", Category::FortranPreprocessor, true)).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.get(Category::CCompiler, "tcc"),
            Err(BuildError::ToolNotFound { .. })
        ));
    }

    #[test]
    fn test_find_by_exec_name_prefers_available() {
        let mut registry = ToolRegistry::new();
        registry
            .register(assumed("mpif90-gfortran", Category::FortranCompiler, false).with_exec("mpif90"))
            .unwrap();
        registry
            .register(assumed("mpif90-ifort", Category::FortranCompiler, true).with_exec("mpif90"))
            .unwrap();

        let found = registry.find(Category::FortranCompiler, "mpif90").unwrap();
        assert_eq!(found.name(), "mpif90-ifort");
        assert_eq!(
            registry.find(Category::FortranCompiler, "mpif90-gfortran").unwrap().name(),
            "mpif90-gfortran"
        );
        assert!(registry.find(Category::FortranCompiler, "nagfor").is_err());
    }

    #[test]
    fn test_builtin_misc_tools() {
        let registry = ToolRegistry::with_builtin_tools();
        assert!(registry.contains(Category::Misc, "git"));
        assert!(registry.contains(Category::Misc, "fcm"));
        assert!(registry.contains(Category::Shell, "bash"));
        assert!(registry.contains(Category::Linker, "linker-mpif90-ifort"));
    }

    #[test]
    fn test_default_skips_unavailable() {
        let mut registry = ToolRegistry::new();
        registry.register(assumed("gfortran", Category::FortranCompiler, false)).unwrap();
        registry.register(assumed("ifort", Category::FortranCompiler, true)).unwrap();

        assert_eq!(
            registry.get_default(Category::FortranCompiler).unwrap().name(),
            "ifort"
        );
    }

    #[test]
    fn test_designated_default_only_when_available() {
        let mut registry = ToolRegistry::new();
        registry.register(assumed("gfortran", Category::FortranCompiler, true)).unwrap();
        registry.register(assumed("ifort", Category::FortranCompiler, false)).unwrap();
        registry.set_default(Category::FortranCompiler, "ifort").unwrap();

        assert_eq!(
            registry.get_default(Category::FortranCompiler).unwrap().name(),
            "gfortran"
        );
    }

    #[test]
    fn test_no_default_available() {
        let mut registry = ToolRegistry::new();
        registry.register(assumed("gcc", Category::CCompiler, false)).unwrap();
        assert!(matches!(
            registry.get_default(Category::CCompiler),
            Err(BuildError::NoDefaultAvailable { category: Category::CCompiler })
        ));
        assert!(matches!(
            registry.get_default(Category::Archiver),
            Err(BuildError::NoDefaultAvailable { .. })
        ));
    }

    #[test]
    fn test_set_default_suite() {
        let mut registry = ToolRegistry::new();
        registry
            .register(assumed("gfortran", Category::FortranCompiler, true).with_suite("gnu"))
            .unwrap();
        registry
            .register(assumed("ifort", Category::FortranCompiler, true).with_suite("intel-classic"))
            .unwrap();

        registry.set_default_suite("intel-classic").unwrap();
        assert_eq!(
            registry.get_default(Category::FortranCompiler).unwrap().name(),
            "ifort"
        );
        assert_eq!(
            registry.get_default(Category::Linker).unwrap().name(),
            "linker-ifort"
        );
        assert!(matches!(
            registry.set_default_suite("cray"),
            Err(BuildError::UnknownSuite(_))
        ));
    }

    #[test]
    fn test_default_where_prefers_same_suite() {
        let mut registry = ToolRegistry::new();
        registry
            .register(assumed("gfortran", Category::FortranCompiler, true).with_suite("gnu"))
            .unwrap();
        registry
            .register(assumed("ifort", Category::FortranCompiler, true).with_suite("intel-classic"))
            .unwrap();
        let ifort = registry.get(Category::FortranCompiler, "ifort").unwrap();
        registry
            .register(
                assumed("mpif90-ifort", Category::FortranCompiler, true)
                    .with_mpi(true)
                    .wrapping(ifort),
            )
            .unwrap();
        registry
            .register(assumed("mpif90-gfortran", Category::FortranCompiler, true).with_mpi(true))
            .unwrap();
        registry.set_default(Category::FortranCompiler, "ifort").unwrap();

        let mpi = registry
            .get_default_where(Category::FortranCompiler, |t| t.is_mpi())
            .unwrap();
        assert_eq!(mpi.name(), "mpif90-ifort");
    }

    #[test]
    fn test_builtin_tools() {
        let registry = ToolRegistry::with_builtin_tools();
        let names: Vec<&str> = registry
            .tools(Category::FortranCompiler)
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["gfortran", "mpif90-gfortran", "ifort", "mpif90-ifort"]);

        let mpif90 = registry.get(Category::FortranCompiler, "mpif90-gfortran").unwrap();
        assert_eq!(mpif90.suite(), Some("gnu"));
        assert_eq!(mpif90.exec_name(), "mpif90");
        assert_eq!(mpif90.openacc_flag(), Some("-fopenacc"));
        let ifort = registry.get(Category::FortranCompiler, "ifort").unwrap();
        assert_eq!(ifort.openacc_flag(), None);
        assert!(registry.contains(Category::Linker, "linker-mpif90-ifort"));
        assert!(registry.contains(Category::Archiver, "ar"));
        assert!(registry.contains(Category::FortranPreprocessor, "fpp"));
    }

    #[test]
    fn test_available_by_category_lists_only_available() {
        let mut registry = ToolRegistry::new();
        registry.register(assumed("gcc", Category::CCompiler, true)).unwrap();
        registry.register(assumed("icc", Category::CCompiler, false)).unwrap();

        let available = registry.available_by_category();
        let cc: Vec<&str> = available[&Category::CCompiler].iter().map(|t| t.name()).collect();
        let ld: Vec<&str> = available[&Category::Linker].iter().map(|t| t.name()).collect();
        assert_eq!(cc, vec!["gcc"]);
        assert_eq!(ld, vec!["linker-gcc"]);
        assert!(available[&Category::FortranCompiler].is_empty());
    }
}
