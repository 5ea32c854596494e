//! Pickers turn the directory under test into a [Suite] tree.
//!
//! The tree mirrors what is being tested: a bundle suite holds one child
//! suite per component its descriptor references, followed by its own
//! implicit and explicit tests.
pub mod bundle;

use crate::{
    config::Config,
    errors::DiscoveryError,
    executor::{
        suite::{Spec, Suite},
        ExecContext,
    },
    model::Model,
};
use bundle::{Descriptor, Fetcher, LocalFetcher};
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Command run by the implicit validation test of deployable models.
pub const PROOF_COMMAND: &[&str] = &["charm", "proof"];

const MAKEFILES: &[&str] = &["GNUmakefile", "makefile", "Makefile"];

/// Extensions of the control file that may accompany a test file.
const CONTROL_EXTENSIONS: &[&str] = &["yaml", "yml", "toml"];

/// Command line choices that shape discovery.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Don't generate the `proof` and make target tests.
    pub skip_implicit: bool,
    /// Skip suites whose name contains any of these.
    pub excludes: Vec<String>,
    /// Only keep test files with these names. Empty keeps everything.
    pub filter: Vec<String>,
    /// Deployment of the bundle descriptor to test.
    pub deployment: Option<String>,
    /// Replaces the `tests` glob of every suite.
    pub test_pattern: Option<String>,
    /// Assume every configured make target exists instead of probing.
    pub dry_run: bool,
}

/// Decides whether a make target exists without running it.
pub trait Probe {
    fn has_target(&self, dir: &Path, target: &str, ctx: &ExecContext) -> bool;
}

/// Asks `make -n` whether it knows how to build a target.
#[derive(Debug, Default, Clone, Copy)]
pub struct MakeProbe;

impl Probe for MakeProbe {
    fn has_target(&self, dir: &Path, target: &str, ctx: &ExecContext) -> bool {
        let status = Command::new("make")
            .args(["-n", target])
            .current_dir(dir)
            .envs(ctx.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) => status.success(),
            Err(err) => {
                tracing::debug!(%target, %err, "make probe failed");
                false
            }
        }
    }
}

/// Builds suites with the given collaborators.
pub struct Picker<'a> {
    options: &'a Options,
    fetcher: &'a dyn Fetcher,
    probe: &'a dyn Probe,
    ctx: &'a ExecContext,
}

impl<'a> Picker<'a> {
    pub fn new(
        options: &'a Options,
        fetcher: &'a dyn Fetcher,
        probe: &'a dyn Probe,
        ctx: &'a ExecContext,
    ) -> Self {
        Self {
            options,
            fetcher,
            probe,
            ctx,
        }
    }

    /// Build the suite for `model` with `config` as its resolved
    /// configuration.
    pub fn build_suite(&self, model: &Model, config: &Config) -> Result<Suite, DiscoveryError> {
        self.assemble(model, config, true)
    }

    /// `root` is false for component suites, which ignore the name filter.
    fn assemble(&self, model: &Model, config: &Config, root: bool) -> Result<Suite, DiscoveryError> {
        let mut config = config.clone();
        if let Model::Bundle { descriptor, .. } = model {
            config.bundle.get_or_insert_with(|| descriptor.clone());
        }
        let mut suite = Suite::new(model.name().to_string(), config);

        if self.is_excluded(&suite) {
            tracing::info!(suite = %suite.name, "excluded");
            return Ok(suite);
        }

        if !self.options.skip_implicit && model.is_deployable() {
            self.implicit_tests(model, &mut suite);
        }

        let children = match model {
            Model::Bundle { descriptor, .. } => self.component_suites(descriptor, &suite.config)?,
            _ => vec![],
        };

        if let Some(testdir) = model.testdir() {
            for spec in self.find_tests(model.directory(), testdir, &suite, root)? {
                suite.push(spec);
            }
        }
        suite.prepend(children);
        tracing::debug!(suite = %suite.name, tests = suite.size(), "assembled suite");
        Ok(suite)
    }

    fn is_excluded(&self, suite: &Suite) -> bool {
        suite
            .config
            .excludes
            .iter()
            .chain(&self.options.excludes)
            .any(|pat| !pat.is_empty() && suite.name.contains(pat.as_str()))
    }

    fn is_selected(&self, path: &Path, root: bool) -> bool {
        let filter = &self.options.filter;
        match path.file_name() {
            Some(name) => !root || filter.is_empty() || filter.iter().any(|f| name == f.as_str()),
            None => false,
        }
    }

    fn implicit_tests(&self, model: &Model, suite: &mut Suite) {
        let dir = model.directory();
        let suite_name = Some(suite.name.as_str());
        let proof = PROOF_COMMAND.iter().map(|s| s.to_string()).collect();
        let mut specs = vec![Spec::standalone("proof".to_string(), proof, dir, suite_name)];

        if MAKEFILES.iter().any(|f| dir.join(f).is_file()) {
            for target in &suite.config.makefile {
                if self.options.dry_run || self.probe.has_target(dir, target, self.ctx) {
                    let argv = vec!["make".to_string(), "-s".to_string(), target.clone()];
                    specs.push(Spec::standalone(format!("make {}", target), argv, dir, suite_name));
                }
            }
        }
        for spec in specs {
            suite.push(spec);
        }
    }

    fn component_suites(&self, descriptor: &Path, config: &Config) -> Result<Vec<Suite>, DiscoveryError> {
        let parsed = Descriptor::from_path(descriptor)?;
        let deployment = parsed.select(self.options.deployment.as_deref())?;
        let mut suites = vec![];
        for entity in self.fetcher.fetch(&parsed, deployment)? {
            let confdir = entity.testdir.clone().unwrap_or_else(|| entity.directory.clone());
            let child_config = Config::discover(&confdir, Some(config))?;
            let child = self.assemble(&Model::Component(entity), &child_config, false)?;
            if child.is_empty() {
                tracing::debug!(component = %child.name, "no tests found");
                continue;
            }
            suites.push(child);
        }
        Ok(suites)
    }

    /// The executable test files of `testdir`, in lexical order.
    fn find_tests(
        &self,
        dirname: &Path,
        testdir: &Path,
        suite: &Suite,
        root: bool,
    ) -> Result<Vec<Spec>, DiscoveryError> {
        let pattern = self
            .options
            .test_pattern
            .as_deref()
            .unwrap_or(&suite.config.tests);
        let full = format!("{}/{}", glob::Pattern::escape(&testdir.to_string_lossy()), pattern);
        let paths = glob::glob(&full).map_err(|err| DiscoveryError::Pattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?;

        let mut files: Vec<PathBuf> = paths
            .filter_map(Result::ok)
            .filter(|path| is_test_file(path))
            .filter(|path| self.is_selected(path, root))
            .collect();
        files.sort();

        let mut specs = Vec::with_capacity(files.len());
        for file in files {
            let config = match control_file(&file) {
                Some(control) => Config::from_path(&control, Some(&suite.config))?,
                None => suite.config.clone(),
            };
            require_descriptors(&config)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let executable = vec![file.to_string_lossy().into_owned()];
            let spec = Spec::new(name, executable, dirname, Some(testdir), &config, Some(&suite.name))
                .with_deployment(self.options.deployment.clone());
            specs.push(spec);
        }
        Ok(specs)
    }
}

/// Descriptors a test would deploy or fetch from must exist.
fn require_descriptors(config: &Config) -> Result<(), DiscoveryError> {
    for path in config.bundle.iter().cloned().chain(config.deploy_target()) {
        if !path.is_file() {
            return Err(DiscoveryError::MissingBundle(path));
        }
    }
    Ok(())
}

fn control_file(test: &Path) -> Option<PathBuf> {
    CONTROL_EXTENSIONS
        .iter()
        .map(|ext| test.with_extension(ext))
        .find(|p| p != test && p.is_file())
}

/// Regular files we are allowed to read and execute.
fn is_test_file(path: &Path) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return false,
    };
    meta.is_file() && is_executable(&meta) && std::fs::File::open(path).is_ok()
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

/// Build the suite for `model` using local component lookup and `make`
/// probes.
pub fn build_suite(model: &Model, config: &Config, options: &Options) -> Result<Suite, DiscoveryError> {
    let ctx = ExecContext::default();
    let fetcher = LocalFetcher::default();
    Picker::new(options, &fetcher, &MakeProbe, &ctx).build_suite(model, config)
}
