//! Per-build tool selection
//!
//! The [`ToolBox`] maps each category to the tool a build uses. Explicit
//! choices (command line, site config) go in the box; anything missing falls
//! back to the registry default without changing the registry.

use crate::error::{BuildError, BuildResult};
use crate::registry::ToolRegistry;
use crate::tool::{Category, Tool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Conventional name of the MPI wrapper around a compiler
pub fn mpi_wrapper_name(compiler: &Tool) -> String {
    match compiler.category() {
        Category::CCompiler => format!("mpicc-{}", compiler.name()),
        _ => format!("mpif90-{}", compiler.name()),
    }
}

/// Tools chosen for one build
#[derive(Debug, Clone, Default)]
pub struct ToolBox {
    tools: HashMap<Category, Arc<Tool>>,
}

impl ToolBox {
    /// Create an empty tool box
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a tool in the box, replacing any earlier choice for its category
    pub fn add_tool(&mut self, tool: Arc<Tool>) -> BuildResult<()> {
        if !tool.is_available() {
            return Err(BuildError::ToolUnavailable {
                category: tool.category(),
                tried: vec![tool.name().to_string()],
            });
        }
        if let Some(previous) = self.tools.insert(tool.category(), Arc::clone(&tool)) {
            debug!(
                category = %tool.category(),
                "replacing {} with {}",
                previous.name(),
                tool.name()
            );
        }
        Ok(())
    }

    /// The explicit choice for a category, if any
    pub fn get(&self, category: Category) -> Option<&Arc<Tool>> {
        self.tools.get(&category)
    }

    /// Tool for a category: the explicit choice, else the registry default
    ///
    /// `mpi` restricts the registry default to tools with (or without) MPI
    /// support; it does not override an explicit choice.
    pub fn get_tool(
        &self,
        category: Category,
        registry: &ToolRegistry,
        mpi: Option<bool>,
    ) -> BuildResult<Arc<Tool>> {
        if let Some(tool) = self.tools.get(&category) {
            return Ok(Arc::clone(tool));
        }
        registry.get_default_where(category, |tool| mpi.map_or(true, |m| tool.is_mpi() == m))
    }

    /// First available tool among `primary` and then `fallbacks`
    ///
    /// Unknown names are configuration errors; unavailable ones are skipped.
    pub fn resolve_with_fallback(
        registry: &ToolRegistry,
        category: Category,
        primary: &str,
        fallbacks: &[&str],
    ) -> BuildResult<Arc<Tool>> {
        let mut tried = Vec::new();
        for name in std::iter::once(primary).chain(fallbacks.iter().copied()) {
            let tool = registry.get(category, name)?;
            if tool.is_available() {
                if !tried.is_empty() {
                    info!(%category, "{} unavailable, using {}", tried.join(", "), name);
                }
                return Ok(tool);
            }
            tried.push(name.to_string());
        }
        Err(BuildError::ToolUnavailable { category, tried })
    }

    /// Chosen tools, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Probe;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(Tool::new("gfortran", Category::FortranCompiler).with_probe(Probe::Assume(false)))
            .unwrap();
        registry
            .register(
                Tool::new("mpif90-gfortran", Category::FortranCompiler)
                    .with_mpi(true)
                    .with_probe(Probe::Assume(true)),
            )
            .unwrap();
        registry
            .register(Tool::new("ifort", Category::FortranCompiler).with_probe(Probe::Assume(true)))
            .unwrap();
        registry
    }

    #[test]
    fn test_add_unavailable_tool_fails() {
        let registry = registry();
        let mut tool_box = ToolBox::new();
        let gfortran = registry.get(Category::FortranCompiler, "gfortran").unwrap();
        assert!(matches!(
            tool_box.add_tool(gfortran),
            Err(BuildError::ToolUnavailable { .. })
        ));
        assert!(tool_box.is_empty());
    }

    #[test]
    fn test_explicit_choice_wins() {
        let registry = registry();
        let mut tool_box = ToolBox::new();
        tool_box
            .add_tool(registry.get(Category::FortranCompiler, "ifort").unwrap())
            .unwrap();

        let tool = tool_box
            .get_tool(Category::FortranCompiler, &registry, Some(true))
            .unwrap();
        assert_eq!(tool.name(), "ifort");
    }

    #[test]
    fn test_registry_default_respects_mpi() {
        let registry = registry();
        let tool_box = ToolBox::new();

        let mpi = tool_box
            .get_tool(Category::FortranCompiler, &registry, Some(true))
            .unwrap();
        let serial = tool_box
            .get_tool(Category::FortranCompiler, &registry, Some(false))
            .unwrap();
        assert_eq!(mpi.name(), "mpif90-gfortran");
        assert_eq!(serial.name(), "ifort");
    }

    #[test]
    fn test_fallback_all_unavailable_names_every_tool() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Tool::new("gcc", Category::CCompiler).with_probe(Probe::Assume(false)))
            .unwrap();
        registry
            .register(Tool::new("icc", Category::CCompiler).with_probe(Probe::Assume(false)))
            .unwrap();

        match ToolBox::resolve_with_fallback(&registry, Category::CCompiler, "gcc", &["icc"]) {
            Err(BuildError::ToolUnavailable { tried, .. }) => assert_eq!(tried, vec!["gcc", "icc"]),
            other => panic!("Expected ToolUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_unknown_name_is_configuration_error() {
        let registry = registry();
        let err = ToolBox::resolve_with_fallback(&registry, Category::FortranCompiler, "nagfor", &[])
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolNotFound { .. }));
    }

    #[test]
    fn test_wrapper_names() {
        let gcc = Tool::new("gcc", Category::CCompiler);
        let ifort = Tool::new("ifort", Category::FortranCompiler);
        assert_eq!(mpi_wrapper_name(&gcc), "mpicc-gcc");
        assert_eq!(mpi_wrapper_name(&ifort), "mpif90-ifort");
    }
}
