use crate::config::Config;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// One executable test with its setup and teardown candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    pub name: String,
    /// Command line of the main phase.
    pub executable: Vec<String>,
    /// Working directory for every phase.
    pub dirname: PathBuf,
    pub setup: Vec<PathBuf>,
    pub teardown: Vec<PathBuf>,
    pub bootstrap: bool,
    pub reset: bool,
    pub reset_timeout: Duration,
    /// Descriptor to deploy before this test runs.
    pub deploy: Option<PathBuf>,
    /// Deployment of `deploy` to select.
    pub deployment: Option<String>,
    pub deployment_timeout: Option<Duration>,
    /// Limit for each setup, main, and teardown candidate.
    pub timeout: Option<Duration>,
    /// Name of the owning suite, for reporting.
    pub suite: Option<String>,
}

impl Spec {
    /// Build a test from its resolved configuration. Relative setup and
    /// teardown scripts are looked up in `dirname`, then next to the test
    /// file in `origin`.
    pub fn new(
        name: String,
        executable: Vec<String>,
        dirname: &Path,
        origin: Option<&Path>,
        config: &Config,
        suite: Option<&str>,
    ) -> Self {
        let resolve = |scripts: &[String]| {
            scripts
                .iter()
                .map(|script| resolve_candidate(script, dirname, origin))
                .collect()
        };
        Spec {
            name,
            executable,
            dirname: dirname.to_path_buf(),
            setup: resolve(&config.setup),
            teardown: resolve(&config.teardown),
            bootstrap: config.bootstrap,
            reset: config.reset,
            reset_timeout: config.reset_timeout,
            deploy: config.deploy_target(),
            deployment: None,
            deployment_timeout: config.deployment_timeout,
            timeout: config.timeout,
            suite: suite.map(String::from),
        }
    }

    /// A test that only inspects the source tree: no environment, no
    /// deployment, no reset, no setup or teardown.
    pub fn standalone(name: String, executable: Vec<String>, dirname: &Path, suite: Option<&str>) -> Self {
        Spec {
            name,
            executable,
            dirname: dirname.to_path_buf(),
            setup: vec![],
            teardown: vec![],
            bootstrap: false,
            reset: false,
            reset_timeout: Duration::from_secs(0),
            deploy: None,
            deployment: None,
            deployment_timeout: None,
            timeout: None,
            suite: suite.map(String::from),
        }
    }

    pub fn with_deployment(mut self, deployment: Option<String>) -> Self {
        self.deployment = deployment;
        self
    }

    /// True if running this test requires a live environment.
    pub fn needs_environment(&self) -> bool {
        self.bootstrap || self.deploy.is_some()
    }
}

fn resolve_candidate(script: &str, dirname: &Path, origin: Option<&Path>) -> PathBuf {
    let path = Path::new(script);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let primary = dirname.join(path);
    if primary.exists() {
        return primary;
    }
    origin
        .map(|dir| dir.join(path))
        .filter(|p| p.exists())
        .unwrap_or(primary)
}

/// An element of a suite.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Spec(Spec),
    Suite(Suite),
}

/// An ordered, possibly nested collection of tests sharing a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Suite {
    pub name: String,
    pub config: Config,
    nodes: Vec<Node>,
}

/// Callbacks for a depth-first walk over a [Suite].
pub trait Visitor {
    fn enter_suite(&mut self, _suite: &Suite) {}
    fn visit_spec(&mut self, spec: &Spec);
    fn leave_suite(&mut self, _suite: &Suite) {}
}

struct Counter(usize);

impl Visitor for Counter {
    fn visit_spec(&mut self, _spec: &Spec) {
        self.0 += 1;
    }
}

impl Suite {
    pub fn new(name: String, config: Config) -> Self {
        Suite {
            name,
            config,
            nodes: vec![],
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn push(&mut self, spec: Spec) {
        self.nodes.push(Node::Spec(spec));
    }

    pub fn push_suite(&mut self, suite: Suite) {
        self.nodes.push(Node::Suite(suite));
    }

    /// Put `suites` in front of everything else, keeping their order.
    pub fn prepend(&mut self, suites: Vec<Suite>) {
        self.nodes.splice(0..0, suites.into_iter().map(Node::Suite));
    }

    /// Visit every test, depth first, in execution order.
    pub fn walk<V: Visitor>(&self, visitor: &mut V) {
        visitor.enter_suite(self);
        for node in &self.nodes {
            match node {
                Node::Spec(spec) => visitor.visit_spec(spec),
                Node::Suite(suite) => suite.walk(visitor),
            }
        }
        visitor.leave_suite(self);
    }

    /// Number of tests, counting through nested suites.
    pub fn size(&self) -> usize {
        let mut counter = Counter(0);
        self.walk(&mut counter);
        counter.0
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
