use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// A malformed or ill-typed configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{}: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    /// A recognized key was given a value of the wrong shape.
    #[error("invalid value for `{key}`: expected {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

/// Suite construction cannot continue.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("missing required bundle file: {}", .0.display())]
    MissingBundle(PathBuf),

    #[error("ambiguous bundle options: {}", display_paths(.0))]
    AmbiguousBundle(Vec<PathBuf>),

    #[error("ambiguous deployment in {}, choose one of: {}", path.display(), names.join(", "))]
    AmbiguousDeployment { path: PathBuf, names: Vec<String> },

    #[error("no deployment named `{name}` in {}", path.display())]
    UnknownDeployment { path: PathBuf, name: String },

    #[error("malformed bundle descriptor {}: {message}", path.display())]
    Descriptor { path: PathBuf, message: String },

    #[error("component `{name}` not found at {}", path.display())]
    ComponentNotFound { name: String, path: PathBuf },

    #[error("{} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("invalid test pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{}: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors reported by an [crate::executor::Environment].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvError {
    /// The environment endpoint closed or reset the connection.
    #[error("transient connectivity error: {0}")]
    Transient(String),

    #[error("environment operation failed: {0}")]
    Failed(String),
}

impl EnvError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EnvError::Transient(_))
    }
}

/// Errors that abort the whole run. Per-test failures never show up here;
/// they are recorded in [crate::executor::results::TestResult] instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("environment {operation} did not complete within {}s: {last}", timeout.as_secs())]
    EnvironmentTimeout {
        operation: &'static str,
        timeout: Duration,
        last: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}
