use crate::executor::results::{JsonReporter, Reporter, SpecReporter};
use std::path::PathBuf;
use structopt::StructOpt;

/// Options for the CLI.
#[derive(StructOpt, Debug)]
#[structopt(
    name = "rigtest",
    about = "Deploy workloads into an environment and run their tests."
)]
pub struct Opts {
    /// Directory of the bundle, component, or tests to run.
    #[structopt(name = "DIR", parse(from_os_str), default_value = ".")]
    pub dir: PathBuf,

    /// Only run test files with these names.
    #[structopt(name = "TESTS")]
    pub tests: Vec<String>,

    /// Environment to run against. Defaults to the current juju environment.
    #[structopt(short, long)]
    pub environment: Option<String>,

    /// Bundle descriptor, relative to DIR.
    #[structopt(short, long, parse(from_os_str))]
    pub bundle: Option<PathBuf>,

    /// Deployment of the bundle descriptor to test.
    #[structopt(short, long)]
    pub deployment: Option<String>,

    /// Show what would run without touching the environment.
    #[structopt(short = "n", long)]
    pub dry_run: bool,

    /// Report format: spec or json.
    #[structopt(short, long, default_value = "spec")]
    pub reporter: ReporterKind,

    /// Write the report to this file instead of stdout.
    #[structopt(short, long, parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Stop at the first failing test.
    #[structopt(short, long)]
    pub failfast: bool,

    /// Don't generate the proof and make target tests.
    #[structopt(short, long)]
    pub skip_implicit: bool,

    /// Glob selecting test files, overriding the `tests` option.
    #[structopt(long)]
    pub test_pattern: Option<String>,

    /// Skip suites whose name contains this. Can be repeated.
    #[structopt(short = "x", long = "exclude", number_of_values = 1)]
    pub excludes: Vec<String>,

    /// Log filter, e.g. `info` or `rigtest=debug`.
    #[structopt(short, long, default_value = "info")]
    pub log_level: String,

    /// Show the output of passing tests and log at debug level.
    #[structopt(short, long)]
    pub verbose: bool,

    /// Leave an environment bootstrapped by this run in place.
    #[structopt(long)]
    pub no_destroy: bool,

    /// Local repository to look up bundle components in. Can be repeated.
    #[structopt(long = "components", parse(from_os_str), number_of_values = 1)]
    pub components: Vec<PathBuf>,
}

/// Possible values for the --reporter flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    /// One line per test as it finishes.
    Spec,
    /// A JSON array of every result.
    Json,
}

impl ReporterKind {
    pub fn build(self, verbose: bool) -> Box<dyn Reporter> {
        match self {
            ReporterKind::Spec => Box::new(SpecReporter::new(verbose)),
            ReporterKind::Json => Box::new(JsonReporter::default()),
        }
    }
}

impl std::str::FromStr for ReporterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec" => Ok(ReporterKind::Spec),
            "json" => Ok(ReporterKind::Json),
            _ => Err("Must be one of spec, json.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Opts::from_iter_safe(&["rigtest"]).unwrap();
        assert_eq!(opts.dir, PathBuf::from("."));
        assert_eq!(opts.reporter, ReporterKind::Spec);
        assert_eq!(opts.log_level, "info");
        assert!(opts.tests.is_empty());
        assert!(!opts.no_destroy);
    }

    #[test]
    fn repeated_flags() {
        let opts = Opts::from_iter_safe(&[
            "rigtest", "-x", "mysql", "--exclude", "cache", "-r", "json", "-n", "bundles/wiki", "10-deploy",
            "20-scale",
        ])
        .unwrap();
        assert_eq!(opts.excludes, vec!["mysql", "cache"]);
        assert_eq!(opts.reporter, ReporterKind::Json);
        assert!(opts.dry_run);
        assert_eq!(opts.dir, PathBuf::from("bundles/wiki"));
        assert_eq!(opts.tests, vec!["10-deploy", "20-scale"]);
    }

    #[test]
    fn unknown_reporter() {
        assert!(Opts::from_iter_safe(&["rigtest", "-r", "dots"]).is_err());
    }
}
