//! Aggregate descriptors ("bundles") and the collaborator that resolves the
//! components they reference to local directories.
//!
//! Two descriptor layouts are understood:
//! ```yaml
//! # A single deployment, named after the file.
//! services:
//!   mysql: { charm: "cs:trusty/mysql" }
//! ```
//! ```yaml
//! # One or more named deployments.
//! wiki:
//!   series: precise
//!   services:
//!     mediawiki: { charm: mediawiki }
//! ```
use crate::{
    errors::DiscoveryError,
    model::{component_name, Entity},
};
use serde_yaml::Value as Yaml;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

const SERVICE_KEYS: &[&str] = &["services", "applications"];

/// A component referenced by a deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    /// Charm URL, e.g. `cs:trusty/mysql-12`, `local:mysql` or `./mysql`.
    pub charm: Option<String>,
    /// Explicit location of the component, relative to the descriptor.
    pub path: Option<PathBuf>,
}

impl Service {
    /// `(series, name)` of the charm, with any store prefix and revision
    /// suffix removed.
    pub fn charm_ref(&self) -> (Option<String>, String) {
        let url = match &self.charm {
            Some(url) => url.as_str(),
            None => return (None, self.name.clone()),
        };
        let url = url.splitn(2, ':').last().unwrap_or(url);
        let mut parts: Vec<&str> = url.rsplitn(2, '/').collect();
        let name = strip_revision(parts.remove(0));
        let series = parts
            .pop()
            .and_then(|s| s.rsplit('/').next())
            .filter(|s| !s.starts_with('~') && *s != "." && *s != "..")
            .map(String::from);
        (series, name.to_string())
    }

    fn local_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        self.charm
            .as_deref()
            .filter(|c| c.starts_with("./") || c.starts_with("../") || c.starts_with('/'))
            .map(PathBuf::from)
    }
}

/// One named deployment of a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub name: String,
    pub series: Option<String>,
    pub services: Vec<Service>,
}

/// A parsed descriptor file.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub path: PathBuf,
    pub deployments: Vec<Deployment>,
}

impl Descriptor {
    pub fn from_path(path: &Path) -> Result<Self, DiscoveryError> {
        if !path.is_file() {
            return Err(DiscoveryError::MissingBundle(path.to_path_buf()));
        }
        let malformed = |message: String| DiscoveryError::Descriptor {
            path: path.to_path_buf(),
            message,
        };
        let contents = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: Yaml = serde_yaml::from_str(&contents).map_err(|e| malformed(e.to_string()))?;

        let deployments = if let Some(services) = services_of(&doc) {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            vec![deployment(name, &doc, services)]
        } else {
            let mapping = doc
                .as_mapping()
                .ok_or_else(|| malformed("expected a mapping at the top level".to_string()))?;
            let mut deployments = vec![];
            for (key, body) in mapping {
                if let (Some(name), Some(services)) = (key.as_str(), services_of(body)) {
                    deployments.push(deployment(name.to_string(), body, services));
                }
            }
            deployments
        };
        if deployments.is_empty() {
            return Err(malformed("no services defined".to_string()));
        }
        Ok(Descriptor {
            path: path.to_path_buf(),
            deployments,
        })
    }

    /// Pick the deployment to test. With no name given, the descriptor must
    /// define exactly one.
    pub fn select(&self, name: Option<&str>) -> Result<&Deployment, DiscoveryError> {
        match name {
            Some(name) => self
                .deployments
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| DiscoveryError::UnknownDeployment {
                    path: self.path.clone(),
                    name: name.to_string(),
                }),
            None if self.deployments.len() == 1 => Ok(&self.deployments[0]),
            None => Err(DiscoveryError::AmbiguousDeployment {
                path: self.path.clone(),
                names: self.deployments.iter().map(|d| d.name.clone()).collect(),
            }),
        }
    }
}

fn services_of(doc: &Yaml) -> Option<&serde_yaml::Mapping> {
    SERVICE_KEYS
        .iter()
        .find_map(|key| doc.get(*key))
        .and_then(Yaml::as_mapping)
}

fn deployment(
    name: String,
    body: &Yaml,
    services: &serde_yaml::Mapping,
) -> Deployment {
    let services = services
        .iter()
        .filter_map(|(key, spec)| {
            let name = key.as_str()?.to_string();
            Some(Service {
                name,
                charm: spec.get("charm").and_then(Yaml::as_str).map(String::from),
                path: spec.get("path").and_then(Yaml::as_str).map(PathBuf::from),
            })
        })
        .collect();
    Deployment {
        name,
        series: body.get("series").and_then(Yaml::as_str).map(String::from),
        services,
    }
}

fn strip_revision(name: &str) -> &str {
    match name.rfind('-') {
        Some(idx) if idx + 1 < name.len() && name[idx + 1..].chars().all(|c| c.is_ascii_digit()) => {
            &name[..idx]
        }
        _ => name,
    }
}

/// True if the YAML at `path` looks like a bundle descriptor.
pub fn is_descriptor(path: &Path) -> bool {
    let doc: Yaml = match std::fs::read_to_string(path)
        .ok()
        .and_then(|c| serde_yaml::from_str(&c).ok())
    {
        Some(doc) => doc,
        None => return false,
    };
    if services_of(&doc).is_some() {
        return true;
    }
    doc.as_mapping()
        .map(|m| m.values().any(|body| services_of(body).is_some()))
        .unwrap_or(false)
}

/// Locate the descriptor for `directory`.
///
/// An explicit path (relative to `directory`) must exist. Otherwise the YAML
/// files of `directory` are inspected and at most one may be a descriptor.
pub fn find_bundle_file(
    directory: &Path,
    explicit: Option<&Path>,
) -> Result<Option<PathBuf>, DiscoveryError> {
    if let Some(path) = explicit {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            directory.join(path)
        };
        if !path.is_file() {
            return Err(DiscoveryError::MissingBundle(path));
        }
        return Ok(Some(path));
    }

    let base = glob::Pattern::escape(&directory.to_string_lossy());
    let mut candidates = vec![];
    for ext in &["yaml", "yml"] {
        let pattern = format!("{}/*.{}", base, ext);
        let paths = glob::glob(&pattern).map_err(|err| DiscoveryError::Pattern {
            pattern: pattern.clone(),
            message: err.to_string(),
        })?;
        candidates.extend(paths.filter_map(Result::ok).filter(|p| is_descriptor(p)));
    }
    candidates.sort();
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        _ => Err(DiscoveryError::AmbiguousBundle(candidates)),
    }
}

/// Resolves the components of a deployment to directories on disk.
pub trait Fetcher {
    fn fetch(
        &self,
        descriptor: &Descriptor,
        deployment: &Deployment,
    ) -> Result<Vec<Entity>, DiscoveryError>;
}

/// Finds components in local repositories laid out as `<root>/<series>/<name>`
/// or `<root>/<name>`. The descriptor's own directory is always searched last.
#[derive(Debug, Default)]
pub struct LocalFetcher {
    roots: Vec<PathBuf>,
}

impl LocalFetcher {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn locate(&self, base: &Path, series: Option<&str>, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(base))
            .flat_map(|root| {
                let mut candidates = vec![];
                if let Some(series) = series {
                    candidates.push(root.join(series).join(name));
                }
                candidates.push(root.join(name));
                candidates
            })
            .find(|p| p.is_dir())
    }
}

impl Fetcher for LocalFetcher {
    fn fetch(
        &self,
        descriptor: &Descriptor,
        deployment: &Deployment,
    ) -> Result<Vec<Entity>, DiscoveryError> {
        let base = descriptor.path.parent().unwrap_or_else(|| Path::new("."));
        let mut seen = HashSet::new();
        let mut components = vec![];

        for service in &deployment.services {
            let (series, name) = service.charm_ref();
            let directory = match service.local_path() {
                Some(path) => {
                    let path = base.join(path);
                    if !path.is_dir() {
                        return Err(DiscoveryError::ComponentNotFound {
                            name: service.name.clone(),
                            path,
                        });
                    }
                    path
                }
                None => {
                    let series = series.or_else(|| deployment.series.clone());
                    match self.locate(base, series.as_deref(), &name) {
                        Some(path) => path,
                        None => {
                            tracing::warn!(service = %service.name, charm = %name, "no local copy of component, skipping");
                            continue;
                        }
                    }
                }
            };
            let directory = directory.canonicalize().unwrap_or(directory);
            if !seen.insert(directory.clone()) {
                continue;
            }
            let name = component_name(&directory.join(crate::model::METADATA_FILE)).unwrap_or(name);
            tracing::debug!(%name, directory = %directory.display(), "fetched component");
            components.push(Entity::at(name, &directory));
        }
        Ok(components)
    }
}
