use rigtest::{
    cli::Opts,
    config::Config,
    errors::{DiscoveryError, Error},
    executor::{
        current_environment, CommandEnvironment, Context, Environment, ExecContext,
        ProcessInvoker, ResetPolicy, RunOptions, Runner,
    },
    model,
    picker::{self, bundle::LocalFetcher, MakeProbe, Picker},
};

use colored::*;
use std::io::Write;
use structopt::StructOpt;
use tokio::runtime;

fn init_tracing(opts: &Opts) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if opts.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&opts.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(opts: &Opts) -> Result<i32, Error> {
    let model = model::classify(&opts.dir, opts.bundle.as_deref())?
        .ok_or_else(|| DiscoveryError::MissingDirectory(opts.dir.clone()))?;
    let config = Config::discover(model.testdir().unwrap_or_else(|| model.directory()), None)?;

    let options = picker::Options {
        skip_implicit: opts.skip_implicit,
        excludes: opts.excludes.clone(),
        filter: opts.tests.clone(),
        deployment: opts.deployment.clone(),
        test_pattern: opts.test_pattern.clone(),
        dry_run: opts.dry_run,
    };
    let ctx = ExecContext::default();
    let fetcher = LocalFetcher::new(opts.components.clone());
    let suite = Picker::new(&options, &fetcher, &MakeProbe, &ctx).build_suite(&model, &config)?;
    if suite.is_empty() {
        tracing::warn!(dir = %opts.dir.display(), "no tests found");
    }

    let runtime = runtime::Builder::new_current_thread().enable_all().build()?;

    // Asking juju for its current environment is itself a side effect.
    let target = match (&opts.environment, opts.dry_run) {
        (Some(name), _) => Some(name.clone()),
        (None, false) => {
            runtime.block_on(current_environment(&ProcessInvoker, model.directory(), &ctx))
        }
        (None, true) => None,
    };
    let env = match target {
        Some(name) => {
            tracing::info!(environment = %name, "using environment");
            Some(Box::new(CommandEnvironment::new(name, model.directory())) as Box<dyn Environment>)
        }
        None => {
            tracing::warn!("no environment selected, lifecycle steps are skipped");
            None
        }
    };

    let run_options = RunOptions {
        dry_run: opts.dry_run,
        failfast: opts.failfast,
        destroy: !opts.no_destroy,
        reset: ResetPolicy::default(),
    };
    let runner = Runner::new(env, Box::new(ProcessInvoker), ctx.clone(), run_options);

    let out: Box<dyn Write> = match &opts.output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let mut reporter = opts.reporter.build(opts.verbose);

    runtime.block_on(Context::new(suite, runner).flat_summary(&mut *reporter, out))
}

fn main() {
    let opts = Opts::from_args();
    init_tracing(&opts);
    std::process::exit(match run(&opts) {
        Err(err) => {
            eprintln!("{} {}", "fatal:".red().bold(), err);
            2
        }
        Ok(code) => code,
    })
}
