//! Namespace resolution for tree nodes
//!
//! A node's fully-qualified name is its ancestry joined with `/`. The
//! reserved default key adds no segment, so a group can carry a primary task
//! under its own name.

/// Separator between namespace segments
pub const SEPARATOR: char = '/';

/// Computes fully-qualified names from ancestry paths
#[derive(Debug, Clone)]
pub struct NamespaceResolver {
    default_key: String,
}

impl NamespaceResolver {
    pub fn new(default_key: impl Into<String>) -> Self {
        Self {
            default_key: default_key.into(),
        }
    }

    pub fn is_default(&self, key: &str) -> bool {
        key == self.default_key
    }

    /// Namespace segments of `key` declared under `ancestry`.
    ///
    /// At the root there is no group to collapse into, so the default node
    /// keeps its key as name: it is the task run when none is named.
    pub fn resolve(&self, ancestry: &[String], key: &str) -> Vec<String> {
        let mut segments = ancestry.to_vec();
        if !self.is_default(key) || ancestry.is_empty() {
            segments.push(key.to_string());
        }
        segments
    }

    /// Join namespace segments into a registry key
    pub fn qualify(segments: &[String]) -> String {
        segments.join("/")
    }
}

impl Default for NamespaceResolver {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_appends_key() {
        let ns = NamespaceResolver::default();
        let resolved = ns.resolve(&path(&["apidoc", "aglio"]), "apib");
        assert_eq!(NamespaceResolver::qualify(&resolved), "apidoc/aglio/apib");
    }

    #[test]
    fn test_default_collapses_at_any_depth() {
        let ns = NamespaceResolver::default();
        for depth in 1..6 {
            let ancestry: Vec<String> = (0..depth).map(|i| format!("g{i}")).collect();
            assert_eq!(ns.resolve(&ancestry, "default"), ancestry);
        }
    }

    #[test]
    fn test_root_default_keeps_its_name() {
        let ns = NamespaceResolver::default();
        assert_eq!(ns.resolve(&[], "default"), path(&["default"]));
    }

    #[test]
    fn test_custom_default_key() {
        let ns = NamespaceResolver::new("index");
        assert_eq!(ns.resolve(&path(&["docs"]), "index"), path(&["docs"]));
        assert_eq!(ns.resolve(&path(&["docs"]), "default"), path(&["docs", "default"]));
    }
}
