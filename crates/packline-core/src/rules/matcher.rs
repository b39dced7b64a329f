use crate::error::ConfigError;
use packline_util::fs::slash_path;
use regex_lite::Regex;
use std::fmt;
use std::path::{Path, PathBuf};

/// One path predicate: `test`, `include` or `exclude` entry.
///
/// Predicates see the absolute path with `/` separators, so the same
/// configuration matches on every platform.
#[derive(Clone)]
pub enum PathPredicate {
    Regex(Regex),
    /// Globs without a `/` are matched against the file name only.
    Glob {
        pattern: glob::Pattern,
        file_name_only: bool,
    },
    /// Path lies under this directory.
    Dir(PathBuf),
}

impl PathPredicate {
    /// Compile a regex predicate.
    ///
    /// # Errors
    /// `InvalidPattern` if the regex does not compile.
    pub fn regex(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    /// Compile a glob predicate.
    ///
    /// # Errors
    /// `InvalidPattern` if the glob is malformed.
    pub fn glob(pattern: &str) -> Result<Self, ConfigError> {
        glob::Pattern::new(pattern)
            .map(|compiled| Self::Glob {
                pattern: compiled,
                file_name_only: !pattern.contains('/'),
            })
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    /// Directory predicate; relative directories are taken from `root`.
    #[must_use]
    pub fn dir(dir: &str, root: &Path) -> Self {
        let dir = Path::new(dir);
        let abs = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir.strip_prefix(".").unwrap_or(dir))
        };
        Self::Dir(abs)
    }

    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Self::Regex(re) => re.is_match(&slash_path(path)),
            Self::Glob {
                pattern,
                file_name_only: true,
            } => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.matches(n)),
            Self::Glob { pattern, .. } => pattern.matches(&slash_path(path)),
            Self::Dir(dir) => path.starts_with(dir),
        }
    }

    /// Canonical text of the predicate, used in fingerprints.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Regex(re) => format!("regex:{}", re.as_str()),
            Self::Glob { pattern, .. } => format!("glob:{}", pattern.as_str()),
            Self::Dir(dir) => format!("dir:{}", slash_path(dir)),
        }
    }
}

impl fmt::Debug for PathPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_on_slash_path() {
        let p = PathPredicate::regex(r"\.(ts|tsx|js|jsx)$").unwrap();
        assert!(p.matches(Path::new("/p/src/App.tsx")));
        assert!(!p.matches(Path::new("/p/src/App.css")));
    }

    #[test]
    fn test_glob_file_name_and_path() {
        let css = PathPredicate::glob("*.css").unwrap();
        assert!(css.matches(Path::new("/p/src/deep/a.css")));
        let scoped = PathPredicate::glob("/p/src/*.css").unwrap();
        assert!(scoped.matches(Path::new("/p/src/a.css")));
    }

    #[test]
    fn test_dir_relative_to_root() {
        let p = PathPredicate::dir("./node_modules", Path::new("/p"));
        assert!(p.matches(Path::new("/p/node_modules/react/index.js")));
        assert!(!p.matches(Path::new("/p/node_modules_extra/x.js")));
        assert_eq!(p.describe(), "dir:/p/node_modules");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            PathPredicate::regex("(unclosed"),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(PathPredicate::glob("[").is_err());
    }
}
