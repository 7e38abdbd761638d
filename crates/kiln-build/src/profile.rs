//! Compiler and linker flag profiles
//!
//! Every tool owns a tree of named profiles rooted at the empty profile `""`.
//! A profile's effective flags are its parent's effective flags followed by
//! its own, so flags added to `base` show up in every profile derived from it.

use crate::error::{BuildError, BuildResult};
use std::collections::HashMap;

/// The implicit root profile every tree starts with
pub const ROOT_PROFILE: &str = "";

/// Profiles the built-in site defines for every compiler and linker
pub const DEFAULT_PROFILES: &[&str] = &["full-debug", "fast-debug", "production", "unit-tests"];

#[derive(Debug, Clone, Default)]
struct ProfileNode {
    parent: Option<String>,
    flags: Vec<String>,
}

/// Profile tree owned by a single tool
#[derive(Debug, Clone)]
pub struct ProfileTree {
    owner: String,
    nodes: HashMap<String, ProfileNode>,
    order: Vec<String>,
    /// Memoised resolutions, cleared on every mutation
    resolved: HashMap<String, Vec<String>>,
}

impl ProfileTree {
    /// Create a tree holding only the root profile
    pub fn new(owner: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_PROFILE.to_string(), ProfileNode::default());
        Self {
            owner: owner.into(),
            nodes,
            order: vec![ROOT_PROFILE.to_string()],
            resolved: HashMap::new(),
        }
    }

    /// Define `name` as a child of `parent`
    pub fn define(&mut self, name: &str, parent: &str) -> BuildResult<()> {
        if self.nodes.contains_key(name) {
            return Err(BuildError::DuplicateProfile {
                tool: self.owner.clone(),
                profile: name.to_string(),
            });
        }
        if !self.nodes.contains_key(parent) {
            return Err(BuildError::UnknownParent {
                tool: self.owner.clone(),
                profile: name.to_string(),
                parent: parent.to_string(),
            });
        }

        self.nodes.insert(
            name.to_string(),
            ProfileNode {
                parent: Some(parent.to_string()),
                flags: Vec::new(),
            },
        );
        self.order.push(name.to_string());
        self.resolved.clear();
        Ok(())
    }

    /// Append flags to a single profile node
    pub fn add_flags<I, S>(&mut self, name: &str, flags: I) -> BuildResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| BuildError::unknown_profile(&self.owner, name))?;
        node.flags.extend(flags.into_iter().map(Into::into));
        self.resolved.clear();
        Ok(())
    }

    /// Effective flags of `name`, root first
    pub fn resolve(&mut self, name: &str) -> BuildResult<Vec<String>> {
        if let Some(flags) = self.resolved.get(name) {
            return Ok(flags.clone());
        }

        let mut chain = Vec::new();
        let mut current = Some(name);
        while let Some(profile) = current {
            let node = self
                .nodes
                .get(profile)
                .ok_or_else(|| BuildError::unknown_profile(&self.owner, name))?;
            chain.push(node);
            current = node.parent.as_deref();
        }

        let flags: Vec<String> = chain
            .iter()
            .rev()
            .flat_map(|node| node.flags.iter().cloned())
            .collect();

        self.resolved.insert(name.to_string(), flags.clone());
        Ok(flags)
    }

    /// Check whether a profile is defined
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Profile names in definition order, root first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Flags added directly to `name`, without inheritance
    pub fn own_flags(&self, name: &str) -> Option<&[String]> {
        self.nodes.get(name).map(|n| n.flags.as_slice())
    }

    /// Parent of `name`; `None` for the root or an unknown profile
    pub fn parent(&self, name: &str) -> Option<&str> {
        self.nodes.get(name)?.parent.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_always_exists() {
        let mut tree = ProfileTree::new("gfortran");
        assert!(tree.contains(ROOT_PROFILE));
        assert_eq!(tree.resolve(ROOT_PROFILE).unwrap(), Vec::<String>::new());
        assert_eq!(tree.parent(ROOT_PROFILE), None);
    }

    #[test]
    fn test_duplicate_profile() {
        let mut tree = ProfileTree::new("gfortran");
        tree.define("base", "").unwrap();
        match tree.define("base", "") {
            Err(BuildError::DuplicateProfile { tool, profile }) => {
                assert_eq!(tool, "gfortran");
                assert_eq!(profile, "base");
            }
            other => panic!("Expected DuplicateProfile, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_parent() {
        let mut tree = ProfileTree::new("ifort");
        assert!(matches!(
            tree.define("production", "base"),
            Err(BuildError::UnknownParent { .. })
        ));
        assert!(!tree.contains("production"));
    }

    #[test]
    fn test_add_flags_unknown_profile() {
        let mut tree = ProfileTree::new("ifort");
        assert!(matches!(
            tree.add_flags("nope", ["-O2"]),
            Err(BuildError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn test_memo_invalidated_by_ancestor_change() {
        let mut tree = ProfileTree::new("gfortran");
        tree.define("base", "").unwrap();
        tree.define("production", "base").unwrap();
        tree.add_flags("production", ["-Ofast"]).unwrap();

        let before = tree.resolve("production").unwrap();
        tree.add_flags("base", ["-g"]).unwrap();
        let after = tree.resolve("production").unwrap();

        assert_eq!(before, vec!["-Ofast"]);
        assert_eq!(after, vec!["-g", "-Ofast"]);
    }

    #[test]
    fn test_names_in_definition_order() {
        let mut tree = ProfileTree::new("gcc");
        tree.define("base", "").unwrap();
        tree.define("full-debug", "base").unwrap();
        assert_eq!(tree.names().collect::<Vec<_>>(), vec!["", "base", "full-debug"]);
    }
}
