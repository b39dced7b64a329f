//! `packline.config.json` discovery, parsing and validation.
//!
//! The file mirrors the familiar bundler configuration surface:
//!
//! ```json
//! {
//!   "entry": "./src/index.tsx",
//!   "mode": "production",
//!   "output": { "path": "dist", "publicPath": "/", "clean": true },
//!   "rules": [{ "oneOf": [
//!     { "test": "\\.(ts|tsx|js|jsx)$", "use": [{ "loader": "script", "options": { "target": "es2015" } }] },
//!     { "test": "\\.css$", "use": ["css", "style"] },
//!     { "test": "\\.(png|svg|jpg)$", "type": "asset/resource" }
//!   ]}],
//!   "optimization": { "splitChunks": { "cacheGroups": {
//!     "vendor": { "test": "[\\\\/]node_modules[\\\\/]", "name": "vendors", "chunks": "all" }
//!   }}},
//!   "devServer": { "hot": true, "port": 3000 }
//! }
//! ```
//!
//! Parsing is lenient about shape (strings or arrays where either makes sense)
//! but validation is eager: every regex, glob and transform name is checked
//! when the config is turned into runtime types.

use crate::chunks::{CacheGroup, ChunkingMode, SplitPolicy};
use crate::error::ConfigError;
use crate::graph::ResolverOptions;
use crate::rules::{Enforce, PathPredicate, Rule, RuleGroup, RuleSet, TransformRef};
use crate::transform::{PipelineSettings, TransformRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &["packline.config.json", ".packlinerc.json"];

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// A string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v.clone()],
            Self::Many(vs) => vs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryConfig {
    /// A single entry, named `main`.
    Single(String),
    Named(BTreeMap<String, OneOrMany<String>>),
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self::Single("./src/index.js".to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub public_path: String,
    /// Remove the output directory before writing.
    pub clean: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist"),
            public_path: "/".to_string(),
            clean: false,
        }
    }
}

/// A path predicate as written in the config. Bare strings are regexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateConfig {
    Pattern(String),
    Regex { regex: String },
    Glob { glob: String },
    Dir { dir: String },
}

impl PredicateConfig {
    fn compile(&self, root: &Path) -> Result<PathPredicate, ConfigError> {
        match self {
            Self::Pattern(re) | Self::Regex { regex: re } => PathPredicate::regex(re),
            Self::Glob { glob } => PathPredicate::glob(glob),
            Self::Dir { dir } => Ok(PathPredicate::dir(dir, root)),
        }
    }
}

/// One `use` entry: a transform name or `{loader, options}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseEntry {
    Name(String),
    Loader {
        loader: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl UseEntry {
    fn to_ref(&self) -> TransformRef {
        match self {
            Self::Name(name) => TransformRef {
                name: name.clone(),
                options: serde_json::Value::Null,
            },
            Self::Loader { loader, options } => TransformRef {
                name: loader.clone(),
                options: options.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConfig {
    pub test: Option<PredicateConfig>,
    pub include: Option<OneOrMany<PredicateConfig>>,
    pub exclude: Option<OneOrMany<PredicateConfig>>,
    #[serde(rename = "use")]
    pub uses: Option<OneOrMany<UseEntry>>,
    /// Shorthand for a single `use` entry.
    pub loader: Option<String>,
    pub options: Option<serde_json::Value>,
    /// Module type: `asset/resource` (or `asset`) and `json` map to the
    /// transforms of the same role; `javascript/auto` is accepted as a no-op.
    #[serde(rename = "type")]
    pub module_type: Option<String>,
    pub enforce: Enforce,
    pub terminal: bool,
    /// Nested rules of which at most one applies.
    pub one_of: Vec<RuleConfig>,
}

impl RuleConfig {
    fn transforms(&self) -> Result<Vec<TransformRef>, ConfigError> {
        let mut refs: Vec<TransformRef> = self
            .uses
            .as_ref()
            .map(|u| u.to_vec().iter().map(UseEntry::to_ref).collect())
            .unwrap_or_default();
        if let Some(loader) = &self.loader {
            refs.push(TransformRef {
                name: loader.clone(),
                options: self.options.clone().unwrap_or(serde_json::Value::Null),
            });
        }
        match self.module_type.as_deref() {
            None | Some("javascript/auto") => {}
            Some("asset/resource" | "asset") => refs.push(TransformRef {
                name: "asset".to_string(),
                options: serde_json::Value::Null,
            }),
            Some("json") => refs.push(TransformRef {
                name: "json".to_string(),
                options: serde_json::Value::Null,
            }),
            Some(other) => {
                return Err(ConfigError::UnknownTransform {
                    name: format!("type:{other}"),
                })
            }
        }
        Ok(refs)
    }
}

/// What a `oneOf` rule hands down to its children.
struct ParentRule {
    group: RuleGroup,
    exclude: Vec<PredicateConfig>,
    enforce: Enforce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    pub extensions: Vec<String>,
    pub alias: BTreeMap<String, String>,
    pub main_fields: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: [".ts", ".tsx", ".js", ".jsx", ".vue", ".json"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            alias: BTreeMap::new(),
            main_fields: vec!["module".to_string(), "main".to_string()],
        }
    }
}

/// `true`/`false`, `"single"` or a chunk name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeChunkConfig {
    Enabled(bool),
    Named(String),
}

impl Default for RuntimeChunkConfig {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl RuntimeChunkConfig {
    /// Name of the runtime chunk, if one is requested.
    #[must_use]
    pub fn chunk_name(&self) -> Option<String> {
        match self {
            Self::Enabled(false) => None,
            Self::Enabled(true) => Some("runtime".to_string()),
            Self::Named(name) if name == "single" => Some("runtime".to_string()),
            Self::Named(name) => Some(name.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleIds {
    /// Short content-addressed ids from the module's root-relative path.
    #[default]
    Deterministic,
    /// Discovery order.
    Natural,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheGroupConfig {
    pub test: Option<PredicateConfig>,
    /// Chunk name; defaults to the group key.
    pub name: Option<String>,
    #[serde(default)]
    pub chunks: ChunkingMode,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitChunksConfig {
    pub cache_groups: BTreeMap<String, CacheGroupConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationConfig {
    /// Defaults to `mode == production`.
    pub minimize: Option<bool>,
    pub runtime_chunk: RuntimeChunkConfig,
    pub module_ids: ModuleIds,
    pub split_chunks: SplitChunksConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    pub hot: bool,
    pub host: String,
    pub port: u16,
    pub debounce_ms: u64,
    /// Per-client notification queue length.
    pub client_queue: usize,
    /// Request middleware, by name, in order.
    pub middlewares: Vec<String>,
    /// Add permissive CORS headers.
    pub cors: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            hot: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
            debounce_ms: 50,
            client_queue: 64,
            middlewares: Vec::new(),
            cors: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    pub kind: CacheType,
    pub cache_directory: PathBuf,
    /// Files whose content is part of the build-dependency fingerprint.
    pub build_dependencies: Vec<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheType::Memory,
            cache_directory: PathBuf::from(".packline/cache"),
            build_dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HtmlConfig {
    pub template: Option<PathBuf>,
    pub filename: String,
    pub title: String,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            template: None,
            filename: "index.html".to_string(),
            title: "packline".to_string(),
        }
    }
}

/// Legacy location of the split policy (`splitting.cacheGroups`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplittingConfig {
    pub cache_groups: BTreeMap<String, CacheGroupConfig>,
}

/// The whole configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory the config was loaded from; every relative path is taken
    /// from here.
    #[serde(skip)]
    pub root: PathBuf,
    pub entry: EntryConfig,
    pub mode: Mode,
    /// Source maps; defaults to `mode == development`.
    pub devtool: Option<bool>,
    pub output: OutputConfig,
    pub rules: Vec<RuleConfig>,
    pub resolve: ResolveConfig,
    pub optimization: OptimizationConfig,
    pub splitting: SplittingConfig,
    pub dev_server: DevServerConfig,
    pub cache: CacheConfig,
    pub html: HtmlConfig,
    pub io_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entry: EntryConfig::default(),
            mode: Mode::default(),
            devtool: None,
            output: OutputConfig::default(),
            rules: Vec::new(),
            resolve: ResolveConfig::default(),
            optimization: OptimizationConfig::default(),
            splitting: SplittingConfig::default(),
            dev_server: DevServerConfig::default(),
            cache: CacheConfig::default(),
            html: HtmlConfig::default(),
            io_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load the config file found in `root`.
    ///
    /// # Errors
    /// `NotFound` if no config file exists, otherwise as [`Config::load`].
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let path = find_config_file(root).ok_or_else(|| ConfigError::NotFound {
            root: root.to_path_buf(),
        })?;
        Self::load(&path)
    }

    /// Load a config file. Its directory becomes the project root.
    ///
    /// # Errors
    /// `Read` or `Parse` on I/O and JSON failures.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let root = dunce::canonicalize(dir).map_err(|source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.root = root;
        Ok(config)
    }

    /// Parse a config document for a project rooted at `root`.
    ///
    /// # Errors
    /// `Parse` if the JSON does not match the schema.
    pub fn from_json_str(json: &str, root: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: root.join(CONFIG_FILES[0]),
            source,
        })?;
        config.root = root.to_path_buf();
        Ok(config)
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }

    #[must_use]
    pub fn source_maps(&self) -> bool {
        self.devtool.unwrap_or(!self.is_production())
    }

    #[must_use]
    pub fn minimize(&self) -> bool {
        self.optimization.minimize.unwrap_or(self.is_production())
    }

    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path.strip_prefix(".").unwrap_or(path))
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.absolute(&self.output.path)
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.absolute(&self.cache.cache_directory)
    }

    #[must_use]
    pub fn build_dependencies(&self) -> Vec<PathBuf> {
        self.cache
            .build_dependencies
            .iter()
            .map(|p| self.absolute(p))
            .collect()
    }

    #[must_use]
    pub fn html_template(&self) -> Option<PathBuf> {
        self.html.template.as_deref().map(|p| self.absolute(p))
    }

    /// Named entries with absolute paths, sorted by name.
    ///
    /// # Errors
    /// `NoEntries` if the config names none.
    pub fn entries(&self) -> Result<Vec<(String, Vec<PathBuf>)>, ConfigError> {
        let entries: Vec<(String, Vec<PathBuf>)> = match &self.entry {
            EntryConfig::Single(path) => {
                vec![("main".to_string(), vec![self.absolute(Path::new(path))])]
            }
            EntryConfig::Named(map) => map
                .iter()
                .map(|(name, paths)| {
                    let paths = paths
                        .to_vec()
                        .iter()
                        .map(|p| self.absolute(Path::new(p)))
                        .collect();
                    (name.clone(), paths)
                })
                .filter(|(_, paths): &(String, Vec<PathBuf>)| !paths.is_empty())
                .collect(),
        };
        if entries.is_empty() {
            return Err(ConfigError::NoEntries);
        }
        Ok(entries)
    }

    /// Compile the rule list, checking every transform against `registry`.
    ///
    /// `oneOf` children are flattened in place into one [`RuleGroup`]. Each
    /// child requires the parent's `test` and `include` on top of its own,
    /// and carries the parent's excludes.
    ///
    /// # Errors
    /// `InvalidPattern` or `UnknownTransform`.
    pub fn rule_set(&self, registry: &TransformRegistry) -> Result<RuleSet, ConfigError> {
        let mut rules = Vec::new();
        for rule in &self.rules {
            self.flatten_rule(rule, None, registry, &mut rules)?;
        }
        Ok(RuleSet::new(rules))
    }

    fn flatten_rule(
        &self,
        rule: &RuleConfig,
        parent: Option<&ParentRule>,
        registry: &TransformRegistry,
        out: &mut Vec<Rule>,
    ) -> Result<(), ConfigError> {
        let mut exclude: Vec<PredicateConfig> = parent.map(|p| p.exclude.clone()).unwrap_or_default();
        if let Some(own) = &rule.exclude {
            exclude.extend(own.to_vec());
        }

        let transforms = rule.transforms()?;
        for t in &transforms {
            if !registry.contains(&t.name) {
                return Err(ConfigError::UnknownTransform {
                    name: t.name.clone(),
                });
            }
        }

        let compile_all = |preds: Vec<PredicateConfig>| -> Result<Vec<PathPredicate>, ConfigError> {
            preds.iter().map(|p| p.compile(&self.root)).collect()
        };
        let test = rule.test.as_ref().map(|t| t.compile(&self.root)).transpose()?;
        let include = compile_all(rule.include.as_ref().map(OneOrMany::to_vec).unwrap_or_default())?;

        if !transforms.is_empty() || rule.one_of.is_empty() {
            let compiled = Rule::new(
                out.len(),
                test.clone(),
                include.clone(),
                compile_all(exclude.clone())?,
                transforms,
                rule.terminal,
                parent.map_or(rule.enforce, |p| p.enforce),
            );
            out.push(match parent {
                Some(p) => compiled.with_group(p.group.clone()),
                None => compiled,
            });
        }

        if parent.is_none() && !rule.one_of.is_empty() {
            let group = ParentRule {
                group: RuleGroup {
                    id: out.len(),
                    test,
                    include,
                },
                exclude,
                enforce: rule.enforce,
            };
            for child in &rule.one_of {
                self.flatten_rule(child, Some(&group), registry, out)?;
            }
        }
        Ok(())
    }

    /// Compile the split policy from `optimization.splitChunks` and the
    /// legacy `splitting` location.
    ///
    /// # Errors
    /// `InvalidPattern`, or `DuplicateCacheGroup` if both locations define
    /// the same group.
    pub fn split_policy(&self) -> Result<SplitPolicy, ConfigError> {
        let mut merged: BTreeMap<&str, &CacheGroupConfig> = BTreeMap::new();
        for (key, group) in self
            .optimization
            .split_chunks
            .cache_groups
            .iter()
            .chain(self.splitting.cache_groups.iter())
        {
            if merged.insert(key.as_str(), group).is_some() {
                return Err(ConfigError::DuplicateCacheGroup { name: key.clone() });
            }
        }

        let mut groups = Vec::with_capacity(merged.len());
        for (key, group) in merged {
            groups.push(CacheGroup {
                key: key.to_string(),
                name: group.name.clone().unwrap_or_else(|| key.to_string()),
                test: group.test.as_ref().map(|t| t.compile(&self.root)).transpose()?,
                chunks: group.chunks,
                priority: group.priority,
            });
        }
        Ok(SplitPolicy::new(
            groups,
            self.optimization.runtime_chunk.chunk_name(),
        ))
    }

    #[must_use]
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            root: self.root.clone(),
            extensions: self.resolve.extensions.clone(),
            alias: self
                .resolve
                .alias
                .iter()
                .map(|(k, v)| {
                    let target = if v.starts_with('.') {
                        self.absolute(Path::new(v)).to_string_lossy().into_owned()
                    } else {
                        v.clone()
                    };
                    (k.clone(), target)
                })
                .collect(),
            main_fields: self.resolve.main_fields.clone(),
        }
    }

    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            root: self.root.clone(),
            source_maps: self.source_maps(),
            public_path: self.output.public_path.clone(),
            production: self.is_production(),
        }
    }

    /// Canonical JSON of the whole document, for fingerprints.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse(json: &str) -> Config {
        Config::from_json_str(json, Path::new("/p")).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}");
        assert_eq!(config.mode, Mode::Development);
        assert!(config.source_maps());
        assert!(!config.minimize());
        assert_eq!(config.output_dir(), PathBuf::from("/p/dist"));
        assert_eq!(config.cache_dir(), PathBuf::from("/p/.packline/cache"));
        assert_eq!(
            config.entries().unwrap(),
            vec![("main".to_string(), vec![PathBuf::from("/p/src/index.js")])]
        );
        assert_eq!(config.dev_server.debounce_ms, 50);
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_production_flips_defaults() {
        let config = parse(r#"{"mode": "production"}"#);
        assert!(!config.source_maps());
        assert!(config.minimize());
        let explicit = parse(r#"{"mode": "production", "devtool": true, "optimization": {"minimize": false}}"#);
        assert!(explicit.source_maps());
        assert!(!explicit.minimize());
    }

    #[test]
    fn test_named_entries() {
        let config = parse(r#"{"entry": {"b": "./src/b.js", "a": ["./src/a.js", "./src/polyfill.js"]}}"#);
        let entries = config.entries().unwrap();
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[0].1.len(), 2);
        assert_eq!(entries[1].1, vec![PathBuf::from("/p/src/b.js")]);
        assert!(matches!(
            parse(r#"{"entry": {}}"#).entries(),
            Err(ConfigError::NoEntries)
        ));
    }

    #[test]
    fn test_one_of_flattens_to_one_group() {
        let config = parse(
            r#"{"rules": [
                {"test": "\\.js$", "enforce": "pre", "use": ["source-map"]},
                {"exclude": {"dir": "node_modules"}, "oneOf": [
                    {"test": "\\.(ts|tsx|js|jsx)$", "use": [{"loader": "script", "options": {"target": "es2015"}}]},
                    {"test": "\\.css$", "use": ["css", "style"]},
                    {"test": {"glob": "*.png"}, "type": "asset/resource"}
                ]},
                {"test": "\\.(js|css)$", "use": ["banner"]}
            ]}"#,
        );
        let set = config.rule_set(&TransformRegistry::with_builtins()).unwrap();
        assert_eq!(set.len(), 5);
        let rules = set.rules();
        assert!(rules[0].group.is_none());
        assert_eq!(rules[0].enforce, Enforce::Pre);
        assert!(rules.iter().all(|r| !r.terminal));
        let group = rules[1].group.as_ref().unwrap().id;
        assert!(rules[1..4].iter().all(|r| r.group.as_ref().map(|g| g.id) == Some(group)));
        assert!(rules[4].group.is_none());
        assert_eq!(rules[3].transforms[0].name, "asset");
        assert!(rules[1..4].iter().all(|r| r.exclude.len() == 1));

        let app = set.match_path(Path::new("/p/src/App.tsx"));
        let names: Vec<_> = app.rules().iter().map(|r| r.transforms[0].name.as_str()).collect();
        assert_eq!(names, vec!["script"]);
        // Rules after the group still run.
        let main = set.match_path(Path::new("/p/src/main.js"));
        let names: Vec<_> = main.rules().iter().map(|r| r.transforms[0].name.as_str()).collect();
        assert_eq!(names, vec!["source-map", "script", "banner"]);
        assert!(set.match_path(Path::new("/p/node_modules/x/index.png")).is_passthrough());
    }

    #[test]
    fn test_one_of_children_keep_parent_conditions() {
        let config = parse(
            r#"{"rules": [
                {"test": "\\.css$", "include": {"dir": "src"}, "oneOf": [
                    {"test": "module", "use": ["css"]}
                ]}
            ]}"#,
        );
        let set = config.rule_set(&TransformRegistry::with_builtins()).unwrap();
        assert!(set.match_path(Path::new("/p/src/module.js")).is_passthrough());
        assert!(set.match_path(Path::new("/p/lib/a.module.css")).is_passthrough());
        assert_eq!(set.match_path(Path::new("/p/src/a.module.css")).rules().len(), 1);
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let config = parse(r#"{"rules": [{"test": "\\.less$", "use": ["less"]}]}"#);
        assert!(matches!(
            config.rule_set(&TransformRegistry::with_builtins()),
            Err(ConfigError::UnknownTransform { name }) if name == "less"
        ));
        let bad_type = parse(r#"{"rules": [{"test": "x", "type": "webassembly/async"}]}"#);
        assert!(bad_type.rule_set(&TransformRegistry::with_builtins()).is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let config = parse(r#"{"rules": [{"test": "(", "use": ["css"]}]}"#);
        assert!(matches!(
            config.rule_set(&TransformRegistry::with_builtins()),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_split_policy_sources() {
        let config = parse(
            r#"{
                "optimization": {"runtimeChunk": "single", "splitChunks": {"cacheGroups": {
                    "vendor": {"test": "[\\\\/]node_modules[\\\\/]", "name": "vendors", "chunks": "all"}
                }}},
                "splitting": {"cacheGroups": {"shared": {"test": {"dir": "shared_lib"}, "chunks": "initial", "priority": 5}}}
            }"#,
        );
        let policy = config.split_policy().unwrap();
        assert_eq!(policy.runtime_chunk.as_deref(), Some("runtime"));
        let names: Vec<_> = policy.cache_groups.iter().map(|g| g.name.as_str()).collect();
        // Higher priority first.
        assert_eq!(names, vec!["shared", "vendors"]);
        assert_eq!(policy.cache_groups[0].chunks, ChunkingMode::InitialOnly);

        let dup = parse(
            r#"{"optimization": {"splitChunks": {"cacheGroups": {"v": {"test": "x"}}}},
                "splitting": {"cacheGroups": {"v": {"test": "y"}}}}"#,
        );
        assert!(matches!(
            dup.split_policy(),
            Err(ConfigError::DuplicateCacheGroup { name }) if name == "v"
        ));
    }

    #[test]
    fn test_resolver_alias_is_absolute() {
        let config = parse(r#"{"resolve": {"alias": {"@": "./src", "react": "preact/compat"}}}"#);
        let opts = config.resolver_options();
        assert_eq!(opts.alias["@"], "/p/src");
        assert_eq!(opts.alias["react"], "preact/compat");
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let a = parse(r#"{"mode": "production", "output": {"clean": true}}"#);
        let b = parse(r#"{"output": {"clean": true}, "mode": "production"}"#);
        assert_eq!(a.canonical_json(), b.canonical_json());
        assert_ne!(a.canonical_json(), parse("{}").canonical_json());
    }

    #[test]
    fn test_discover_and_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(ConfigError::NotFound { .. })
        ));
        std::fs::write(dir.path().join("packline.config.json"), r#"{"entry": "./main.js"}"#).unwrap();
        let config = Config::discover(dir.path()).unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        assert_eq!(config.root, root);
        assert_eq!(config.entries().unwrap()[0].1[0], root.join("main.js"));

        std::fs::write(dir.path().join("packline.config.json"), "{ nope").unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
