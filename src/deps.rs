//! Dependency reference resolution
//!
//! A reference starting with `/` is absolute and names a task from the
//! registry root. Anything else is relative to the group that declares the
//! leaf, so `deps = "files"` inside `apidoc/aglio` names
//! `apidoc/aglio/files`. `.` and `..` segments behave like path joins.
//!
//! Existence is not checked here; the compiler links references once every
//! task is known, trying the fallback candidates of a relative reference
//! (the same name in each ancestor group) when the direct one is missing.

use crate::error::{Result, TaskTreeError};
use crate::namespace::{NamespaceResolver, SEPARATOR};

/// How a reference was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Absolute,
    Relative,
}

/// A parsed dependency reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    pub raw: String,
    pub kind: RefKind,
    /// Fully-qualified names to try, most specific first
    candidates: Vec<String>,
}

impl DependencyRef {
    /// The name the reference resolves to when it exists
    pub fn primary(&self) -> &str {
        &self.candidates[0]
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }
}

/// Rewrites raw dependency strings into fully-qualified references
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Resolve raw references declared by `task` inside the group
    /// `enclosing`, keeping declaration order.
    pub fn resolve(&self, raw: &[String], enclosing: &[String], task: &str) -> Result<Vec<String>> {
        Ok(self
            .references(raw, enclosing, task)?
            .into_iter()
            .map(|r| r.primary().to_string())
            .collect())
    }

    pub fn references(
        &self,
        raw: &[String],
        enclosing: &[String],
        task: &str,
    ) -> Result<Vec<DependencyRef>> {
        raw.iter()
            .map(|reference| self.reference(reference, enclosing, task))
            .collect()
    }

    pub fn reference(&self, raw: &str, enclosing: &[String], task: &str) -> Result<DependencyRef> {
        let invalid = || TaskTreeError::InvalidReference {
            task: task.to_string(),
            reference: raw.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid());
        }

        if let Some(rooted) = raw.strip_prefix(SEPARATOR) {
            let target = normalize(&[], rooted).ok_or_else(invalid)?;
            return Ok(DependencyRef {
                raw: raw.to_string(),
                kind: RefKind::Absolute,
                candidates: vec![NamespaceResolver::qualify(&target)],
            });
        }

        let primary = normalize(enclosing, raw).ok_or_else(invalid)?;
        let mut candidates = vec![NamespaceResolver::qualify(&primary)];

        // Walking up only makes sense for plain names; dotted references
        // already say exactly where they point.
        let plain = raw.split(SEPARATOR).all(|part| part != "." && part != "..");
        if plain {
            for depth in (0..enclosing.len()).rev() {
                if let Some(target) = normalize(&enclosing[..depth], raw) {
                    let name = NamespaceResolver::qualify(&target);
                    if !candidates.contains(&name) {
                        candidates.push(name);
                    }
                }
            }
        }

        Ok(DependencyRef {
            raw: raw.to_string(),
            kind: RefKind::Relative,
            candidates,
        })
    }
}

/// Join `reference` onto `base`, folding `.`, `..` and empty segments.
/// `None` when the result is empty or climbs above the root.
fn normalize(base: &[String], reference: &str) -> Option<Vec<String>> {
    let mut segments = base.to_vec();
    for part in reference.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            name => segments.push(name.to_string()),
        }
    }
    (!segments.is_empty()).then_some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    fn raw(refs: &[&str]) -> Vec<String> {
        refs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relative_reference_is_a_sibling() {
        let resolver = DependencyResolver;
        let resolved = resolver
            .resolve(&raw(&["files"]), &path(&["apidoc", "aglio", "apib"]), "apidoc/aglio/apib")
            .unwrap();
        assert_eq!(resolved, vec!["apidoc/aglio/apib/files"]);
    }

    #[test]
    fn test_absolute_reference_ignores_depth() {
        let resolver = DependencyResolver;
        for depth in 0..5 {
            let enclosing: Vec<String> = (0..depth).map(|i| format!("g{i}")).collect();
            let resolved = resolver.resolve(&raw(&["/mkdir"]), &enclosing, "t").unwrap();
            assert_eq!(resolved, vec!["mkdir"]);
        }
    }

    #[test]
    fn test_order_is_preserved() {
        let resolver = DependencyResolver;
        let resolved = resolver
            .resolve(&raw(&["/mkdir", "/apidoc/aglio", "prepare"]), &path(&["dredd"]), "dredd")
            .unwrap();
        assert_eq!(resolved, vec!["mkdir", "apidoc/aglio", "dredd/prepare"]);
    }

    #[test]
    fn test_dot_names_enclosing_group() {
        let resolver = DependencyResolver;
        let resolved = resolver
            .resolve(&raw(&["."]), &path(&["apidoc", "apiary"]), "apidoc/apiary/publish")
            .unwrap();
        assert_eq!(resolved, vec!["apidoc/apiary"]);

        let resolved = resolver
            .resolve(&raw(&["../aglio"]), &path(&["apidoc", "apiary"]), "apidoc/apiary/publish")
            .unwrap();
        assert_eq!(resolved, vec!["apidoc/aglio"]);
    }

    #[test]
    fn test_nested_relative_reference() {
        let resolver = DependencyResolver;
        let resolved = resolver
            .resolve(&raw(&["apiary/publish"]), &path(&["apidoc"]), "apidoc/publish")
            .unwrap();
        assert_eq!(resolved, vec!["apidoc/apiary/publish"]);
    }

    #[test]
    fn test_relative_candidates_walk_up() {
        let resolver = DependencyResolver;
        let reference = resolver
            .reference("mkdir", &path(&["a", "b"]), "a/b/c")
            .unwrap();
        assert_eq!(reference.kind, RefKind::Relative);
        assert_eq!(reference.candidates(), &["a/b/mkdir", "a/mkdir", "mkdir"]);
    }

    #[test]
    fn test_invalid_references() {
        let resolver = DependencyResolver;
        for bad in ["", "/", "..", "/..", "./"] {
            let result = resolver.reference(bad, &[], "t");
            assert!(
                matches!(result, Err(TaskTreeError::InvalidReference { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}
