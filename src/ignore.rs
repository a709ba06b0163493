//! Ignore-pattern loading and matching
//!
//! Each project carries an ordered pattern set assembled at
//! preparation time: two implicit patterns covering the `.rewind`
//! store root, then the optional `<root>/.rewind/ignore` and
//! `<root>/.rwignore` files, one pattern per line.
//!
//! Matching is component-wise on purpose: a bare `node_modules`
//! excludes that directory wherever it appears in the tree, the same
//! way most ignore files are written. Patterns ending in `/` are
//! directory globs; everything else is a file glob checked against
//! the basename, the full relative path, and each path component.
//! Globs are shell-style (`*`, `?`, `[...]`) within a single
//! component.

use crate::error::Result;
use glob::Pattern;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, trace};

/// Patterns always present so the store never watches itself
const IMPLICIT_PATTERNS: &[&str] = &[".rewind", ".rewind/*"];

/// An ordered, immutable set of ignore patterns for one project
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<String>,
}

impl IgnoreSet {
    /// Assemble the pattern set for a project root
    ///
    /// Reads `<root>/.rewind/ignore` and `<root>/.rwignore` when
    /// present; a missing file contributes nothing. Read failures on
    /// an existing file are errors, since silently watching what the
    /// user asked to exclude would be worse than failing preparation.
    pub fn load(root: &Path) -> Result<Self> {
        let mut patterns: Vec<String> =
            IMPLICIT_PATTERNS.iter().map(|p| p.to_string()).collect();

        for file in [root.join(".rewind").join("ignore"), root.join(".rwignore")] {
            if file.exists() {
                let loaded = read_ignore_file(&file)?;
                debug!(path = %file.display(), count = loaded.len(), "loaded ignore patterns");
                patterns.extend(loaded);
            }
        }

        Ok(IgnoreSet { patterns })
    }

    /// Build a set from explicit patterns (implicit store patterns included)
    pub fn from_patterns(extra: Vec<String>) -> Self {
        let mut patterns: Vec<String> =
            IMPLICIT_PATTERNS.iter().map(|p| p.to_string()).collect();
        patterns.extend(extra);
        IgnoreSet { patterns }
    }

    /// Number of loaded patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set holds no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Decide whether `path` is excluded relative to `root`
    ///
    /// Fail-open: if the relative path cannot be computed the answer
    /// is `false`, and a pattern the glob engine rejects never
    /// matches.
    pub fn matches(&self, root: &Path, path: &Path) -> bool {
        let rel = match path.strip_prefix(root) {
            Ok(rel) => crate::utils::to_slash(rel),
            Err(_) => return false,
        };

        for pattern in &self.patterns {
            if let Some(dir_pattern) = pattern.strip_suffix('/') {
                // Directory glob: any component may be the directory,
                // or the relative path may live under the full prefix.
                if rel.split('/').any(|part| glob_match(dir_pattern, part)) {
                    trace!(%rel, %pattern, "ignored (directory component)");
                    return true;
                }
                if format!("{}/", rel).starts_with(pattern) {
                    trace!(%rel, %pattern, "ignored (directory prefix)");
                    return true;
                }
            } else {
                let basename = rel.rsplit('/').next().unwrap_or(&rel);
                if glob_match(pattern, basename)
                    || glob_match(pattern, &rel)
                    || rel.split('/').any(|part| glob_match(pattern, part))
                {
                    trace!(%rel, %pattern, "ignored");
                    return true;
                }
            }
        }

        false
    }
}

/// Shell-style match; malformed patterns never match
fn glob_match(pattern: &str, text: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(text),
        Err(_) => false,
    }
}

/// Read one pattern per line, trimming whitespace, skipping blanks and
/// `#` comments
fn read_ignore_file(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let mut patterns = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            patterns.push(trimmed.to_string());
        }
    }

    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn root() -> PathBuf {
        PathBuf::from("/p")
    }

    #[test]
    fn test_store_root_always_ignored() {
        let set = IgnoreSet::from_patterns(vec![]);
        assert!(set.matches(&root(), Path::new("/p/.rewind")));
        assert!(set.matches(&root(), Path::new("/p/.rewind/versions.db")));
        assert!(!set.matches(&root(), Path::new("/p/src/main.rs")));
    }

    #[test]
    fn test_file_glob_matches_basename_and_components() {
        let set = IgnoreSet::from_patterns(vec!["*.tmp".to_string()]);
        assert!(set.matches(&root(), Path::new("/p/foo.tmp")));
        assert!(set.matches(&root(), Path::new("/p/deep/nested/bar.tmp")));
        assert!(!set.matches(&root(), Path::new("/p/foo.txt")));
    }

    #[test]
    fn test_bare_name_excludes_directory_anywhere() {
        let set = IgnoreSet::from_patterns(vec!["node_modules".to_string()]);
        assert!(set.matches(&root(), Path::new("/p/node_modules")));
        assert!(set.matches(&root(), Path::new("/p/web/node_modules/pkg/index.js")));
        assert!(!set.matches(&root(), Path::new("/p/src/modules.rs")));
    }

    #[test]
    fn test_directory_pattern() {
        let set = IgnoreSet::from_patterns(vec!["build/".to_string()]);
        assert!(set.matches(&root(), Path::new("/p/build")));
        assert!(set.matches(&root(), Path::new("/p/build/out.o")));
        assert!(set.matches(&root(), Path::new("/p/sub/build/out.o")));
        assert!(!set.matches(&root(), Path::new("/p/builder/x")));
    }

    #[test]
    fn test_character_class_and_question_mark() {
        let set = IgnoreSet::from_patterns(vec!["v[0-9]?.log".to_string()]);
        assert!(set.matches(&root(), Path::new("/p/v1a.log")));
        assert!(!set.matches(&root(), Path::new("/p/vxa.log")));
    }

    #[test]
    fn test_fail_open_outside_root() {
        let set = IgnoreSet::from_patterns(vec!["*".to_string()]);
        // Path not under the root: relative computation fails, answer is false.
        assert!(!set.matches(&root(), Path::new("/elsewhere/file")));
    }

    #[test]
    fn test_malformed_pattern_never_matches() {
        let set = IgnoreSet::from_patterns(vec!["[".to_string()]);
        assert!(!set.matches(&root(), Path::new("/p/anything")));
    }

    #[test]
    fn test_load_skips_comments_and_blanks() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".rewind")).unwrap();
        fs::write(
            temp.path().join(".rewind").join("ignore"),
            "# generated\n\n  *.log  \n",
        )
        .unwrap();
        fs::write(temp.path().join(".rwignore"), "dist/\n#x\n").unwrap();

        let set = IgnoreSet::load(temp.path()).unwrap();
        // 2 implicit + *.log + dist/
        assert_eq!(set.len(), 4);
        assert!(set.matches(temp.path(), &temp.path().join("a.log")));
        assert!(set.matches(temp.path(), &temp.path().join("dist/bundle.js")));
        assert!(!set.matches(temp.path(), &temp.path().join("a.rs")));
    }
}
