//! Source pattern resolution
//!
//! A task's `src` is an ordered list of glob patterns. Patterns starting with
//! `!` exclude matches of the others. Results keep pattern order, so a
//! concatenation lists its inputs the way they were declared.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, TaskTreeError};

/// Ordered include patterns plus an exclusion set, anchored at a base dir
#[derive(Debug)]
pub struct SourceSet {
    base: PathBuf,
    include: Vec<String>,
    exclude: GlobSet,
}

impl SourceSet {
    pub fn new(patterns: &[String], base: &Path) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = GlobSetBuilder::new();

        for raw in patterns {
            let expanded = expand(raw)?;
            match expanded.strip_prefix('!') {
                Some(negated) => {
                    let glob = Glob::new(negated.trim_start_matches("./")).map_err(|e| {
                        TaskTreeError::InvalidPattern {
                            pattern: raw.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    exclude.add(glob);
                }
                None => include.push(expanded),
            }
        }

        let exclude = exclude.build().map_err(|e| TaskTreeError::InvalidPattern {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            base: base.to_path_buf(),
            include,
            exclude,
        })
    }

    /// Every existing path matched by the include patterns and not excluded
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        Ok(self.resolve_relative()?.into_iter().map(|(path, _)| path).collect())
    }

    /// Matched paths paired with their path below the pattern's glob base,
    /// the part before the first wildcard segment. `docs/**/*.md` matching
    /// `docs/api/users.md` yields `api/users.md`.
    pub fn resolve_relative(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        let escaped_base = PathBuf::from(glob::Pattern::escape(&self.base.to_string_lossy()));

        for pattern in &self.include {
            let (anchored, glob_base) = if Path::new(pattern).is_absolute() {
                (PathBuf::from(pattern), glob_base(pattern))
            } else {
                (escaped_base.join(pattern), self.base.join(glob_base(pattern)))
            };
            let anchored = anchored.to_string_lossy().to_string();

            let paths = glob::glob(&anchored).map_err(|e| TaskTreeError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

            let mut hits: Vec<PathBuf> = paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(pattern = %pattern, error = %e, "skipping unreadable path");
                        None
                    }
                })
                .collect();
            hits.sort();

            for path in hits {
                if self.is_excluded(&path) {
                    continue;
                }
                if seen.insert(path.clone()) {
                    let relative = match path.strip_prefix(&glob_base) {
                        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                        _ => path.file_name().map(PathBuf::from).unwrap_or_default(),
                    };
                    matched.push((path, relative));
                }
            }
        }

        Ok(matched)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.base).unwrap_or(path);
        self.exclude.is_match(relative)
    }

    /// Path as shown to the user, relative to the base when possible
    pub fn display<'p>(&self, path: &'p Path) -> std::path::Display<'p> {
        path.strip_prefix(&self.base).unwrap_or(path).display()
    }
}

/// Leading segments of `pattern` without wildcards. A pattern without any
/// wildcard names a single path, whose parent is the base.
fn glob_base(pattern: &str) -> PathBuf {
    let is_magic = |segment: &str| segment.contains(['*', '?', '[', '{']);
    let path = Path::new(pattern);
    let static_part: PathBuf = path
        .iter()
        .take_while(|segment| !is_magic(&segment.to_string_lossy()))
        .collect();
    if static_part == path {
        return path.parent().map(Path::to_path_buf).unwrap_or_default();
    }
    static_part
}

/// Expand `~` and `$VAR` references in a pattern or path
pub fn expand(raw: &str) -> Result<String> {
    shellexpand::full(raw)
        .map(|s| s.into_owned())
        .map_err(|e| TaskTreeError::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, rel).unwrap();
    }

    fn names(set: &SourceSet, paths: &[PathBuf]) -> Vec<String> {
        paths.iter().map(|p| set.display(p).to_string()).collect()
    }

    #[test]
    fn test_keeps_pattern_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "doc/root.md");
        touch(dir.path(), "doc/_header.md");

        let set = SourceSet::new(
            &["doc/root.md".to_string(), "doc/_header.md".to_string()],
            dir.path(),
        )
        .unwrap();
        let resolved = set.resolve().unwrap();
        assert_eq!(names(&set, &resolved), vec!["doc/root.md", "doc/_header.md"]);
    }

    #[test]
    fn test_negated_patterns_exclude() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "lib/a.js");
        touch(dir.path(), "lib/deprecated/b.js");
        touch(dir.path(), "lib/c.deprecated.js");

        let patterns = vec![
            "lib/**/*.js".to_string(),
            "!**/deprecated/**".to_string(),
            "!**/*.deprecated.js".to_string(),
        ];
        let set = SourceSet::new(&patterns, dir.path()).unwrap();
        let resolved = set.resolve().unwrap();
        assert_eq!(names(&set, &resolved), vec!["lib/a.js"]);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.md");

        let set = SourceSet::new(&["*.md".to_string(), "a.md".to_string()], dir.path()).unwrap();
        assert_eq!(set.resolve().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_literal_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let set = SourceSet::new(&["nope.md".to_string()], dir.path()).unwrap();
        assert!(set.resolve().unwrap().is_empty());
    }

    #[test]
    fn test_base_with_glob_characters() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("we[ird]*");
        touch(&base, "a.md");

        let set = SourceSet::new(&["*.md".to_string()], &base).unwrap();
        let resolved = set.resolve().unwrap();
        assert_eq!(names(&set, &resolved), vec!["a.md"]);
    }

    #[test]
    fn test_relative_to_glob_base() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "docs/api/index.md");
        touch(dir.path(), "docs/guide/index.md");
        touch(dir.path(), "README.md");

        let patterns = vec!["docs/**/*.md".to_string(), "README.md".to_string()];
        let set = SourceSet::new(&patterns, dir.path()).unwrap();
        let relative: Vec<PathBuf> = set
            .resolve_relative()
            .unwrap()
            .into_iter()
            .map(|(_, rel)| rel)
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("api/index.md"),
                PathBuf::from("guide/index.md"),
                PathBuf::from("README.md"),
            ]
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        let result = SourceSet::new(&["!a/[".to_string()], dir.path());
        assert!(matches!(result, Err(TaskTreeError::InvalidPattern { .. })));
    }
}
