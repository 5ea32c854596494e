//! Hierarchical test configuration.
//!
//! A [Config] is seeded from its parent (or the built-in defaults) and then
//! overlaid with [Overrides] read from a `tests.yaml`/`tests.toml` file or a
//! per-test control file. Scalars are replaced; lists only ever grow, so
//! nested suites accumulate `setup`, `teardown`, and `sources` entries from
//! their ancestors while still being able to flip booleans like `reset`.
use crate::errors::ConfigError;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

/// Names of the configuration files searched for in a tests directory.
pub const CONFIG_FILES: &[&str] = &["tests.yaml", "tests.yml", "tests.toml"];

/// Make targets probed for implicit tests when nothing else is configured.
pub const DEFAULT_MAKE_TARGETS: &[&str] = &["lint", "test"];

/// A dynamically typed configuration value, as found in a config document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Null,
}

impl Value {
    fn to_text(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::List(_) | Value::Map(_) | Value::Null => None,
        }
    }

    fn as_secs(&self) -> Option<u64> {
        match self {
            Value::Int(i) if *i >= 0 => Some(*i as u64),
            Value::Float(f) if *f >= 0.0 => Some(f.round() as u64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// What to deploy before the tests of a suite run.
#[derive(Debug, Clone, PartialEq)]
pub enum BundleDeploy {
    /// Deploy the suite's `bundle` when set to `true`; never when `false`.
    Enabled(bool),
    /// Deploy this descriptor instead of `bundle`.
    Path(PathBuf),
}

/// Resolved configuration for a suite or a single test.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bootstrap: bool,
    pub reset: bool,
    pub reset_timeout: Duration,
    pub bundle: Option<PathBuf>,
    pub bundle_deploy: BundleDeploy,
    pub deployment_timeout: Option<Duration>,
    /// Upper bound for every single setup, main, or teardown candidate.
    pub timeout: Option<Duration>,
    pub virtualenv: bool,
    pub virtualenv_python: String,
    /// Glob pattern, relative to the tests directory, selecting test files.
    pub tests: String,
    /// Suites whose name contains any of these are skipped.
    pub excludes: Vec<String>,
    pub sources: Vec<String>,
    pub packages: Vec<String>,
    pub python_packages: Vec<String>,
    pub requirements: Vec<String>,
    /// Make targets to turn into implicit tests.
    pub makefile: Vec<String>,
    pub setup: Vec<String>,
    pub teardown: Vec<String>,
    /// Keys this version does not act upon. Merged with the same rules.
    pub extra: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bootstrap: true,
            reset: true,
            reset_timeout: Duration::from_secs(60 * 3),
            bundle: None,
            bundle_deploy: BundleDeploy::Enabled(true),
            deployment_timeout: None,
            timeout: None,
            virtualenv: false,
            virtualenv_python: "python".to_string(),
            tests: "*".to_string(),
            excludes: vec![],
            sources: vec![],
            packages: vec![],
            python_packages: vec![],
            requirements: vec![],
            makefile: DEFAULT_MAKE_TARGETS.iter().map(|t| t.to_string()).collect(),
            setup: vec![],
            teardown: vec![],
            extra: BTreeMap::new(),
        }
    }
}

/// A set of keys to overlay onto a [Config], usually parsed from a file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Overrides(pub BTreeMap<String, Value>);

impl Overrides {
    pub fn from_yaml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Overrides::default());
        }
        let doc: Option<Overrides> =
            serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
                origin: origin.to_string(),
                message: err.to_string(),
            })?;
        Ok(doc.unwrap_or_default())
    }

    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|err| ConfigError::Parse {
            origin: origin.to_string(),
            message: err.to_string(),
        })
    }

    /// Read overrides from a file. `.toml` files are parsed as TOML,
    /// everything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.to_string_lossy();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents, &origin),
            _ => Self::from_yaml_str(&contents, &origin),
        }
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl Config {
    /// Seed a configuration from `parent`, or from the defaults.
    pub fn new(parent: Option<&Config>) -> Self {
        parent.cloned().unwrap_or_default()
    }

    /// Load `path` on top of `parent`. A `makefile` list named in the file
    /// replaces the inherited targets rather than extending them. Relative
    /// descriptor paths set by the file are taken relative to the file.
    pub fn from_path(path: &Path, parent: Option<&Config>) -> Result<Self, ConfigError> {
        let overrides = Overrides::from_path(path)?;
        let mut conf = Config::new(parent);
        if overrides.get("makefile").is_some() {
            conf.makefile.clear();
        }
        conf.merge(&overrides)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if overrides.get("bundle").is_some() {
            conf.bundle = conf.bundle.map(|p| base.join(p));
        }
        if let (Some(_), BundleDeploy::Path(p)) = (overrides.get("bundle_deploy"), &mut conf.bundle_deploy) {
            *p = base.join(&*p);
        }
        Ok(conf)
    }

    /// Load the first of [CONFIG_FILES] found in `dir`, if any.
    pub fn discover(dir: &Path, parent: Option<&Config>) -> Result<Self, ConfigError> {
        match CONFIG_FILES.iter().map(|f| dir.join(f)).find(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading test configuration");
                Config::from_path(&path, parent)
            }
            None => Ok(Config::new(parent)),
        }
    }

    /// Apply `set` for every key of `other`, in iteration order.
    pub fn merge(&mut self, other: &Overrides) -> Result<(), ConfigError> {
        for (key, value) in &other.0 {
            self.set(key, value.clone())?;
        }
        Ok(())
    }

    /// Set a single key. Scalars are overwritten. List-valued keys are
    /// extended by a list and appended to by a scalar; they never lose
    /// elements.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let invalid = |expected| ConfigError::InvalidValue {
            key: key.to_string(),
            expected,
        };
        match key {
            "bootstrap" => self.bootstrap = flag(&value).ok_or_else(|| invalid("a boolean"))?,
            "reset" => self.reset = flag(&value).ok_or_else(|| invalid("a boolean"))?,
            "virtualenv" => self.virtualenv = flag(&value).ok_or_else(|| invalid("a boolean"))?,
            "reset_timeout" => {
                let secs = value.as_secs().ok_or_else(|| invalid("a number of seconds"))?;
                self.reset_timeout = Duration::from_secs(secs);
            }
            "deployment_timeout" => {
                self.deployment_timeout = optional_secs(&value).ok_or_else(|| invalid("a number of seconds"))?
            }
            "timeout" => {
                self.timeout = optional_secs(&value).ok_or_else(|| invalid("a number of seconds"))?
            }
            "bundle" => {
                self.bundle = match value {
                    Value::Null => None,
                    other => Some(PathBuf::from(other.to_text().ok_or_else(|| invalid("a path"))?)),
                }
            }
            "bundle_deploy" => {
                self.bundle_deploy = match value {
                    Value::Null => BundleDeploy::Enabled(false),
                    Value::Bool(b) => BundleDeploy::Enabled(b),
                    Value::Str(p) => BundleDeploy::Path(PathBuf::from(p)),
                    _ => return Err(invalid("a boolean or a path")),
                }
            }
            "virtualenv_python" => {
                self.virtualenv_python = value.to_text().ok_or_else(|| invalid("a string"))?
            }
            "tests" => self.tests = value.to_text().ok_or_else(|| invalid("a glob pattern"))?,
            "excludes" => append(&mut self.excludes, value).ok_or_else(|| invalid("a list of strings"))?,
            "sources" => append(&mut self.sources, value).ok_or_else(|| invalid("a list of strings"))?,
            "packages" => append(&mut self.packages, value).ok_or_else(|| invalid("a list of strings"))?,
            "python_packages" => {
                append(&mut self.python_packages, value).ok_or_else(|| invalid("a list of strings"))?
            }
            "requirements" => {
                append(&mut self.requirements, value).ok_or_else(|| invalid("a list of strings"))?
            }
            "makefile" => append(&mut self.makefile, value).ok_or_else(|| invalid("a list of targets"))?,
            "setup" => append(&mut self.setup, value).ok_or_else(|| invalid("a list of scripts"))?,
            "teardown" => append(&mut self.teardown, value).ok_or_else(|| invalid("a list of scripts"))?,
            _ => {
                let slot = self.extra.entry(key.to_string()).or_insert(Value::Null);
                match (slot, value) {
                    (Value::List(items), Value::List(more)) => items.extend(more),
                    (Value::List(items), scalar) => items.push(scalar),
                    (slot, value) => *slot = value,
                }
            }
        }
        Ok(())
    }

    /// The descriptor to deploy before running tests with this
    /// configuration, if any.
    pub fn deploy_target(&self) -> Option<PathBuf> {
        match &self.bundle_deploy {
            BundleDeploy::Enabled(true) => self.bundle.clone(),
            BundleDeploy::Enabled(false) => None,
            BundleDeploy::Path(path) => Some(path.clone()),
        }
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Str(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => Some(true),
            "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `Some(None)` for an explicit null.
fn optional_secs(value: &Value) -> Option<Option<Duration>> {
    match value {
        Value::Null => Some(None),
        other => other.as_secs().map(|s| Some(Duration::from_secs(s))),
    }
}

fn append(items: &mut Vec<String>, value: Value) -> Option<()> {
    match value {
        Value::List(more) => {
            let more = more.iter().map(Value::to_text).collect::<Option<Vec<_>>>()?;
            items.extend(more);
        }
        Value::Null => {}
        scalar => items.push(scalar.to_text()?),
    }
    Some(())
}
