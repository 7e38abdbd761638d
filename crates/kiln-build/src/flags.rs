//! Path-specific flags
//!
//! Ordered rules add flags to files whose path matches a pattern. Rules are
//! strictly additive: every matching rule contributes, in declaration order,
//! unless a matching rule is exclusive, which ends evaluation.
//!
//! Patterns and flags may use `$source` (source root), `$output` (build
//! output) and `$relative` (directory of the file being processed).

use crate::error::{BuildError, BuildResult};
use kiln_config::project::FlagsConfig;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Values for `$source`, `$output` and `$relative`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub source_root: PathBuf,
    pub build_output: PathBuf,
}

impl TemplateVars {
    pub fn new(source_root: impl Into<PathBuf>, build_output: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            build_output: build_output.into(),
        }
    }

    /// Substitute variables in `template` for the file at `file`
    pub fn substitute(&self, template: &str, file: &Path) -> String {
        let relative = file.parent().unwrap_or_else(|| Path::new(""));
        template
            .replace("$source", &self.source_root.to_string_lossy())
            .replace("$output", &self.build_output.to_string_lossy())
            .replace("$relative", &relative.to_string_lossy())
    }
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(|c| matches!(c, '*' | '?' | '['))
}

/// Translate a shell glob into an anchored regex; `*` also matches `/`
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut raw = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                    raw.push('!');
                }
                // a leading ']' is literal
                if chars.peek() == Some(&']') {
                    chars.next();
                    class.push_str("\\]");
                    raw.push(']');
                }
                let mut prev = None;
                while let Some(c) = chars.next() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    raw.push(c);
                    // `&&`, `~~` and `--` are set operators in a regex class
                    let doubled_dash =
                        c == '-' && (prev == Some('-') || chars.peek() == Some(&'-'));
                    if matches!(c, '\\' | '[' | '^' | '&' | '~') || doubled_dash {
                        class.push('\\');
                    }
                    class.push(c);
                    prev = Some(c);
                }
                if closed {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // unterminated: treat the bracket and what followed literally
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(&raw));
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    out
}

/// A single path rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagRule {
    pub pattern: String,
    pub flags: Vec<String>,
    pub exclusive: bool,
}

impl FlagRule {
    pub fn new<I, S>(pattern: impl Into<String>, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pattern: pattern.into(),
            flags: flags.into_iter().map(Into::into).collect(),
            exclusive: false,
        }
    }

    /// Stop evaluating later rules once this one matches
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// Ordered path rules
#[derive(Debug, Default)]
pub struct FlagRuleSet {
    rules: Vec<FlagRule>,
    compiled: RwLock<HashMap<String, Regex>>,
}

impl Clone for FlagRuleSet {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            compiled: RwLock::new(HashMap::new()),
        }
    }
}

impl FlagRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; duplicates are kept
    pub fn add_rule<I, S>(&mut self, pattern: impl Into<String>, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(FlagRule::new(pattern, flags));
    }

    pub fn push(&mut self, rule: FlagRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[FlagRule] {
        &self.rules
    }

    /// Flags of every rule matching `path`, in rule order
    pub fn flags_for(&self, path: &Path, vars: &TemplateVars) -> BuildResult<Vec<String>> {
        let target = path.to_string_lossy();
        let mut flags = Vec::new();

        for rule in &self.rules {
            let pattern = vars.substitute(&rule.pattern, path);
            if !self.matches(&pattern, &target)? {
                continue;
            }
            flags.extend(rule.flags.iter().map(|f| vars.substitute(f, path)));
            if rule.exclusive {
                break;
            }
        }

        Ok(flags)
    }

    fn matches(&self, pattern: &str, target: &str) -> BuildResult<bool> {
        if !has_wildcards(pattern) {
            return Ok(target.starts_with(pattern));
        }

        if let Some(regex) = self.compiled.read().get(pattern) {
            return Ok(regex.is_match(target));
        }

        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| BuildError::InvalidPattern {
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?;
        let matched = regex.is_match(target);
        self.compiled.write().insert(pattern.to_string(), regex);
        Ok(matched)
    }
}

/// Common flags plus path rules for one tool stage
#[derive(Debug, Clone, Default)]
pub struct FlagSettings {
    pub common: Vec<String>,
    pub rules: FlagRuleSet,
}

impl FlagSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from a `[preprocess]`, `[fortran]` or `[c]` section
    pub fn from_config(config: &FlagsConfig) -> Self {
        let mut rules = FlagRuleSet::new();
        for rule in &config.path_flags {
            let mut flag_rule = FlagRule::new(rule.pattern.clone(), rule.flags.clone());
            flag_rule.exclusive = rule.exclusive;
            rules.push(flag_rule);
        }
        Self {
            common: config.flags.clone(),
            rules,
        }
    }

    /// `base`, then the common flags, then matching path rules
    pub fn flags_for(
        &self,
        base: Vec<String>,
        path: &Path,
        vars: &TemplateVars,
    ) -> BuildResult<Vec<String>> {
        let mut flags = base;
        flags.extend(self.common.iter().map(|f| vars.substitute(f, path)));
        flags.extend(self.rules.flags_for(path, vars)?);
        Ok(flags)
    }
}
