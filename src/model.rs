//! Classification of the directory under test.
use crate::{errors::DiscoveryError, picker::bundle};
use std::path::{Path, PathBuf};

/// Metadata file marking a directory as a single deployable component.
pub const METADATA_FILE: &str = "metadata.yaml";

/// Name, location, and tests directory of something under test.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub directory: PathBuf,
    pub testdir: Option<PathBuf>,
}

impl Entity {
    /// Describe `directory`, looking for a `tests` directory inside it.
    pub fn at(name: String, directory: &Path) -> Self {
        Entity {
            name,
            directory: directory.to_path_buf(),
            testdir: find_testdir(directory),
        }
    }
}

/// What is being tested.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    /// An aggregate that references several components through a
    /// descriptor file.
    Bundle { entity: Entity, descriptor: PathBuf },
    /// A single deployable unit.
    Component(Entity),
    /// A bare folder of tests.
    TestDirectory(Entity),
}

impl Model {
    pub fn entity(&self) -> &Entity {
        match self {
            Model::Bundle { entity, .. } => entity,
            Model::Component(entity) | Model::TestDirectory(entity) => entity,
        }
    }

    pub fn name(&self) -> &str {
        &self.entity().name
    }

    pub fn directory(&self) -> &Path {
        &self.entity().directory
    }

    pub fn testdir(&self) -> Option<&Path> {
        self.entity().testdir.as_deref()
    }

    /// Bundles and components are deployable, test directories are not.
    pub fn is_deployable(&self) -> bool {
        !matches!(self, Model::TestDirectory(_))
    }
}

/// `<directory>/tests` when it is a directory.
pub fn find_testdir(directory: &Path) -> Option<PathBuf> {
    let testdir = directory.join("tests");
    if testdir.is_dir() {
        Some(testdir)
    } else {
        None
    }
}

/// Classify `directory`. Returns `None` if it does not exist.
///
/// A bundle descriptor wins over component metadata, which wins over a
/// plain directory of tests. `explicit_bundle` is resolved relative to
/// `directory` and must exist.
pub fn classify(
    directory: &Path,
    explicit_bundle: Option<&Path>,
) -> Result<Option<Model>, DiscoveryError> {
    if !directory.is_dir() {
        return Ok(None);
    }
    let directory = directory.canonicalize().map_err(|source| DiscoveryError::Io {
        path: directory.to_path_buf(),
        source,
    })?;

    if let Some(descriptor) = bundle::find_bundle_file(&directory, explicit_bundle)? {
        let name = descriptor
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir_name(&directory));
        tracing::debug!(descriptor = %descriptor.display(), "classified as bundle");
        return Ok(Some(Model::Bundle {
            entity: Entity::at(name, &directory),
            descriptor,
        }));
    }

    let metadata = directory.join(METADATA_FILE);
    if metadata.is_file() {
        let name = component_name(&metadata).unwrap_or_else(|| dir_name(&directory));
        tracing::debug!(%name, "classified as component");
        return Ok(Some(Model::Component(Entity::at(name, &directory))));
    }

    Ok(Some(Model::TestDirectory(Entity::at(
        dir_name(&directory),
        &directory,
    ))))
}

/// The `name` field of a component metadata file.
pub fn component_name(metadata: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(metadata).ok()?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&contents).ok()?;
    doc.get("name")?.as_str().map(String::from)
}

fn dir_name(directory: &Path) -> String {
    directory
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| directory.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BUNDLE: &str = "wiki:\n  services:\n    mediawiki:\n      charm: cs:precise/mediawiki\n";

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let model = classify(&dir.path().join("nope"), None).unwrap();
        assert!(model.is_none());
    }

    #[test]
    fn test_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();
        let model = classify(dir.path(), None).unwrap().unwrap();
        assert!(matches!(model, Model::TestDirectory(_)));
        assert!(model.testdir().unwrap().ends_with("tests"));
        assert!(!model.is_deployable());
    }

    #[test]
    fn component_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE), "name: mysql\nsummary: db\n").unwrap();
        let model = classify(dir.path(), None).unwrap().unwrap();
        assert!(matches!(model, Model::Component(_)));
        assert_eq!(model.name(), "mysql");
        assert_eq!(model.testdir(), None);
    }

    #[test]
    fn bundle_beats_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE), "name: mysql\n").unwrap();
        fs::write(dir.path().join("bundle.yaml"), BUNDLE).unwrap();
        let model = classify(dir.path(), None).unwrap().unwrap();
        match model {
            Model::Bundle { entity, descriptor } => {
                assert_eq!(entity.name, "bundle");
                assert!(descriptor.ends_with("bundle.yaml"));
            }
            other => panic!("expected a bundle, got {:?}", other),
        }
    }

    #[test]
    fn non_descriptor_yaml_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tests.yaml"), "reset: false\n").unwrap();
        let model = classify(dir.path(), None).unwrap().unwrap();
        assert!(matches!(model, Model::TestDirectory(_)));
    }

    #[test]
    fn ambiguous_bundles() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), BUNDLE).unwrap();
        fs::write(dir.path().join("b.yaml"), BUNDLE).unwrap();
        let err = classify(dir.path(), None).unwrap_err();
        assert!(matches!(err, DiscoveryError::AmbiguousBundle(ref paths) if paths.len() == 2));
    }

    #[test]
    fn explicit_bundle_disambiguates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), BUNDLE).unwrap();
        fs::write(dir.path().join("b.yaml"), BUNDLE).unwrap();
        let model = classify(dir.path(), Some(Path::new("b.yaml"))).unwrap().unwrap();
        assert_eq!(model.name(), "b");
    }

    #[test]
    fn explicit_bundle_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = classify(dir.path(), Some(Path::new("missing.yaml"))).unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingBundle(_)));
    }
}
