//! Specifier resolution.
//!
//! Order, first hit wins:
//!
//! 1. alias rewrite (longest matching alias key)
//! 2. the exact path
//! 3. the path with each configured extension appended
//! 4. `<dir>/index` with each extension
//!
//! Bare specifiers are looked up by walking `node_modules` directories up
//! from the importer and reading the package's `mainFields`. Every probed
//! path is kept so a failed resolution can be retried when one of them
//! appears.

use crate::error::BuildError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    pub root: PathBuf,
    /// With leading dot (`.ts`).
    pub extensions: Vec<String>,
    /// Specifier prefix → replacement (absolute path or another specifier).
    pub alias: BTreeMap<String, String>,
    pub main_fields: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extensions: [".ts", ".tsx", ".js", ".jsx", ".vue", ".json"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            alias: BTreeMap::new(),
            main_fields: vec!["module".to_string(), "main".to_string()],
        }
    }
}

type CacheKey = (PathBuf, String);

/// Resolves specifiers to canonical absolute paths.
#[derive(Debug, Default)]
pub struct Resolver {
    options: ResolverOptions,
    cache: RwLock<BTreeMap<CacheKey, PathBuf>>,
}

impl Resolver {
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            options,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Forget memoized resolutions (files may have appeared or moved).
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Resolve `specifier` as imported from `importer`.
    ///
    /// # Errors
    /// `BuildError::Resolution` listing every candidate that was tried.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf, BuildError> {
        let from_dir = importer.parent().unwrap_or(&self.options.root).to_path_buf();
        let key = (from_dir.clone(), specifier.to_string());
        if let Some(hit) = self.cache.read().unwrap().get(&key) {
            return Ok(hit.clone());
        }

        let mut tried = Vec::new();
        let found = self.resolve_uncached(specifier, &from_dir, &mut tried);
        match found {
            Some(path) => {
                self.cache.write().unwrap().insert(key, path.clone());
                Ok(path)
            }
            None => Err(BuildError::Resolution {
                importer: importer.to_path_buf(),
                specifier: specifier.to_string(),
                tried,
            }),
        }
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        from_dir: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        // Loader-style queries and fragments are not part of the path.
        let specifier = specifier
            .split(['?', '#'])
            .next()
            .unwrap_or(specifier);
        let rewritten = self.apply_alias(specifier);
        let specifier = rewritten.as_deref().unwrap_or(specifier);

        if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".." {
            return self.resolve_path(&from_dir.join(specifier), tried);
        }
        if Path::new(specifier).is_absolute() {
            return self.resolve_path(Path::new(specifier), tried);
        }
        self.resolve_bare(specifier, from_dir, tried)
    }

    /// Longest alias key equal to the specifier or prefixing it at a `/`.
    fn apply_alias(&self, specifier: &str) -> Option<String> {
        self.options
            .alias
            .iter()
            .filter(|(key, _)| {
                specifier == key.as_str()
                    || specifier
                        .strip_prefix(key.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(key, target)| format!("{target}{}", &specifier[key.len()..]))
    }

    fn probe(path: PathBuf, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if path.is_file() {
            return dunce::canonicalize(&path).ok();
        }
        tried.push(path);
        None
    }

    fn resolve_path(&self, target: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if let Some(found) = Self::probe(target.to_path_buf(), tried) {
            return Some(found);
        }
        for ext in &self.options.extensions {
            let mut candidate = target.as_os_str().to_owned();
            candidate.push(ext);
            if let Some(found) = Self::probe(PathBuf::from(candidate), tried) {
                return Some(found);
            }
        }
        if target.is_dir() {
            for ext in &self.options.extensions {
                if let Some(found) = Self::probe(target.join(format!("index{ext}")), tried) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn resolve_bare(
        &self,
        specifier: &str,
        from_dir: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let (package, subpath) = split_bare(specifier);
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(package);
            if pkg_dir.is_dir() {
                let found = match subpath {
                    Some(sub) => self.resolve_path(&pkg_dir.join(sub), tried),
                    None => self.resolve_package_main(&pkg_dir, tried),
                };
                if found.is_some() {
                    return found;
                }
            } else {
                tried.push(pkg_dir);
            }
            current = dir.parent();
        }
        None
    }

    fn resolve_package_main(&self, pkg_dir: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        let manifest = std::fs::read_to_string(pkg_dir.join("package.json"))
            .ok()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());
        if let Some(manifest) = manifest {
            for field in &self.options.main_fields {
                if let Some(main) = manifest.get(field).and_then(|v| v.as_str()) {
                    if let Some(found) = self.resolve_path(&pkg_dir.join(main), tried) {
                        return Some(found);
                    }
                }
            }
        }
        self.resolve_path(&pkg_dir.join("index"), tried)
    }
}

/// `@scope/pkg/sub` → (`@scope/pkg`, `sub`); `pkg/sub` → (`pkg`, `sub`).
fn split_bare(specifier: &str) -> (&str, Option<&str>) {
    let boundary = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        specifier.find('/')
    };
    match boundary {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..])),
        None => (specifier, None),
    }
}
