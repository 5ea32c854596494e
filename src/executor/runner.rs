//! Drives every test of a suite through its phases and manages the
//! lifecycle of the environment the tests run against.
//!
//! ```text
//! Pending -> (Bootstrap) -> (Deploy) -> Setup -> Main -> Teardown -> (Reset)
//! ```
//! Main only runs when every setup candidate passed. Teardown always runs
//! and replaces the recorded result only when it fails itself.
use super::{
    results::{Failure, Phase, TestResult},
    suite::{Node, Spec, Suite},
    Environment, ExecContext, Invoker, ResetOptions,
};
use crate::errors::{EnvError, Error};
use futures::{channel::mpsc::UnboundedSender, future::LocalBoxFuture, FutureExt};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::{self, Instant};

/// Exit code recorded when a candidate could not be started at all.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Pacing of the reset loops.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetPolicy {
    /// Pause between failed reset attempts.
    pub backoff: Duration,
    /// Pause between status polls while waiting for workloads to go away.
    pub poll_interval: Duration,
    pub options: ResetOptions,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            options: ResetOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Pretend every lifecycle call and command succeeded.
    pub dry_run: bool,
    /// Stop at the first failing result.
    pub failfast: bool,
    /// Destroy an environment we bootstrapped once all tests ran.
    pub destroy: bool,
    pub reset: ResetPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            failfast: false,
            destroy: true,
            reset: ResetPolicy::default(),
        }
    }
}

/// Counts of the results produced by a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub failed: usize,
    /// Traversal ended early because of failfast.
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Combined outcome of the candidates of one phase.
struct PhaseOutcome {
    returncode: i32,
    output: String,
    failed: Option<String>,
}

pub struct Runner {
    env: Option<Box<dyn Environment>>,
    invoker: Box<dyn Invoker>,
    ctx: ExecContext,
    options: RunOptions,
    /// We created the environment and own its teardown.
    bootstrapped: bool,
    attached: bool,
    /// Descriptor deployed in the current environment lifecycle.
    deployed: Option<PathBuf>,
    stats: RunStats,
}

impl Runner {
    /// Without an environment every lifecycle step is skipped and tests run
    /// against whatever the machine provides.
    pub fn new(
        env: Option<Box<dyn Environment>>,
        invoker: Box<dyn Invoker>,
        ctx: ExecContext,
        options: RunOptions,
    ) -> Self {
        Self {
            env,
            invoker,
            ctx,
            options,
            bootstrapped: false,
            attached: false,
            deployed: None,
            stats: RunStats::default(),
        }
    }

    /// Run every test of `suite` in order, sending each result as soon as it
    /// is known. An environment bootstrapped by the run is destroyed before
    /// returning, even after a fatal error.
    pub async fn run(
        &mut self,
        suite: &Suite,
        results: UnboundedSender<TestResult>,
    ) -> Result<RunStats, Error> {
        let _target = match &self.env {
            Some(env) => Some(self.ctx.enter(env.name())),
            None => None,
        };
        tracing::info!(suite = %suite.name, tests = suite.size(), "starting run");
        let outcome = self.run_suite(suite, &results).await;
        self.destroy().await;
        outcome?;
        Ok(self.stats)
    }

    fn run_suite<'a>(
        &'a mut self,
        suite: &'a Suite,
        results: &'a UnboundedSender<TestResult>,
    ) -> LocalBoxFuture<'a, Result<Flow, Error>> {
        async move {
            for node in suite.nodes() {
                match node {
                    Node::Spec(spec) => {
                        let result = self.run_test(spec).await;
                        let flow = self.handle_result(result, results);
                        self.maybe_reset(spec).await?;
                        if flow == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                    Node::Suite(child) => {
                        tracing::debug!(suite = %child.name, "entering suite");
                        if self.run_suite(child, results).await? == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                    }
                }
            }
            Ok(Flow::Continue)
        }
        .boxed_local()
    }

    fn handle_result(&mut self, result: TestResult, results: &UnboundedSender<TestResult>) -> Flow {
        self.stats.total += 1;
        let failed = !result.passed();
        if failed {
            self.stats.failed += 1;
        }
        let test = result.test.clone();
        if results.unbounded_send(result).is_err() {
            tracing::debug!(%test, "result receiver is gone");
        }
        if failed && self.options.failfast {
            tracing::info!(%test, "failfast");
            self.stats.stopped = true;
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn run_test(&mut self, spec: &Spec) -> TestResult {
        let start = Instant::now();
        let mut result = TestResult::new(&spec.name, spec.suite.as_deref());
        result.dirname = Some(spec.dirname.clone());

        if spec.needs_environment() {
            if let Err(err) = self.ensure_environment(spec).await {
                tracing::warn!(test = %spec.name, %err, "environment unavailable");
                let mut failed = synthetic("bootstrap", spec, err.to_string(), Failure::Bootstrap);
                failed.duration = start.elapsed();
                return failed;
            }
        }
        if let Some(descriptor) = &spec.deploy {
            if let Some(mut failed) = self.deploy(spec, descriptor).await {
                failed.duration = start.elapsed();
                return failed;
            }
        }

        let setup = spec.setup.iter().map(|p| vec![p.to_string_lossy().into_owned()]);
        let setup = self.run_phase(Phase::Setup, setup.collect(), spec).await;
        apply(&mut result, Phase::Setup, setup);

        if result.passed() {
            let main = self.run_phase(Phase::Main, vec![spec.executable.clone()], spec).await;
            apply(&mut result, Phase::Main, main);
        }

        let teardown = spec.teardown.iter().rev().map(|p| vec![p.to_string_lossy().into_owned()]);
        let teardown = self.run_phase(Phase::Teardown, teardown.collect(), spec).await;
        if teardown.returncode != 0 {
            tracing::error!(test = %spec.name, returncode = teardown.returncode, "teardown failed");
            apply(&mut result, Phase::Teardown, teardown);
        }

        result.duration = start.elapsed();
        tracing::info!(test = %spec.name, returncode = result.returncode, "finished");
        result
    }

    /// Run `candidates` in order until one fails.
    async fn run_phase(&self, phase: Phase, candidates: Vec<Vec<String>>, spec: &Spec) -> PhaseOutcome {
        let mut outcome = PhaseOutcome {
            returncode: 0,
            output: String::new(),
            failed: None,
        };
        for argv in candidates {
            let command = argv.join(" ");
            if self.options.dry_run {
                tracing::info!(%phase, %command, "dry run");
                continue;
            }
            tracing::debug!(%phase, %command, "running candidate");
            let (code, output) = match self.invoker.invoke(&argv, &spec.dirname, spec.timeout, &self.ctx).await {
                Ok(done) => (done.returncode, done.output),
                Err(err) => (SPAWN_FAILURE_CODE, format!("failed to run {}: {}\n", command, err)),
            };
            outcome.output.push_str(&output);
            if code != 0 {
                outcome.returncode = code;
                outcome.failed = Some(command);
                break;
            }
        }
        outcome
    }

    /// Bootstrap or attach to the environment if that hasn't happened yet.
    async fn ensure_environment(&mut self, spec: &Spec) -> Result<(), EnvError> {
        if self.attached || self.options.dry_run {
            return Ok(());
        }
        let env = match &self.env {
            Some(env) => env,
            None => return Ok(()),
        };
        match env.status(&self.ctx).await {
            Ok(_) => {
                tracing::info!(environment = env.name(), "attaching to running environment");
                env.connect(&self.ctx).await?;
            }
            Err(err) if spec.bootstrap => {
                tracing::info!(environment = env.name(), %err, "bootstrapping");
                env.bootstrap(&self.ctx).await?;
                self.bootstrapped = true;
                env.connect(&self.ctx).await?;
            }
            Err(err) => return Err(err),
        }
        self.attached = true;
        Ok(())
    }

    /// Deploy `descriptor` unless it is already up. Returns the failing
    /// result when deployment did not succeed.
    async fn deploy(&mut self, spec: &Spec, descriptor: &Path) -> Option<TestResult> {
        if self.deployed.as_deref() == Some(descriptor) {
            return None;
        }
        let env = match &self.env {
            Some(env) if !self.options.dry_run => env,
            _ => {
                tracing::info!(descriptor = %descriptor.display(), "skipping deploy");
                self.deployed = Some(descriptor.to_path_buf());
                return None;
            }
        };
        tracing::info!(descriptor = %descriptor.display(), deployment = ?spec.deployment, "deploying");
        let call = env.deploy(descriptor, spec.deployment.as_deref(), &self.ctx);
        let outcome = match spec.deployment_timeout {
            Some(limit) => match time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EnvError::Failed(format!("deployment did not finish within {:?}", limit))),
            },
            None => call.await,
        };
        let (returncode, output) = match outcome {
            Ok(done) if done.success() => {
                self.deployed = Some(descriptor.to_path_buf());
                return None;
            }
            Ok(done) => (done.returncode, done.output),
            Err(err) => (1, err.to_string()),
        };
        tracing::warn!(descriptor = %descriptor.display(), returncode, "deploy failed");
        let failure = Failure::Deploy {
            descriptor: descriptor.to_path_buf(),
        };
        let mut failed = synthetic("deploy", spec, output, failure);
        failed.returncode = returncode;
        Some(failed)
    }

    async fn maybe_reset(&mut self, spec: &Spec) -> Result<(), Error> {
        if !spec.reset || !self.attached || self.options.dry_run {
            return Ok(());
        }
        if let Some(env) = &self.env {
            tracing::info!(environment = env.name(), "resetting");
            reset_environment(&**env, &self.ctx, &self.options.reset, spec.reset_timeout).await?;
            self.deployed = None;
        }
        Ok(())
    }

    async fn destroy(&mut self) {
        if !self.bootstrapped || !self.options.destroy || self.options.dry_run {
            return;
        }
        if let Some(env) = &self.env {
            tracing::info!(environment = env.name(), "destroying");
            if let Err(err) = env.destroy(&self.ctx).await {
                tracing::error!(environment = env.name(), %err, "failed to destroy environment");
            }
        }
        self.bootstrapped = false;
        self.attached = false;
        self.deployed = None;
    }
}

fn synthetic(name: &str, spec: &Spec, output: String, failure: Failure) -> TestResult {
    let mut result = TestResult::new(name, spec.suite.as_deref());
    result.dirname = Some(spec.dirname.clone());
    result.returncode = 1;
    result.output = output;
    result.exit = Some(failure);
    result
}

fn apply(result: &mut TestResult, phase: Phase, outcome: PhaseOutcome) {
    result.returncode = outcome.returncode;
    result.output.push_str(&outcome.output);
    if let Some(candidate) = outcome.failed {
        result.exit = Some(Failure::Execution { phase, candidate });
    }
}

/// Reset `env` and wait until no workloads are left, within `budget`.
///
/// Failed reset attempts are retried after `policy.backoff`; a dropped
/// connection is re-established first.
pub async fn reset_environment(
    env: &dyn Environment,
    ctx: &ExecContext,
    policy: &ResetPolicy,
    budget: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + budget;
    let expired = |operation: &'static str, last: String| Error::EnvironmentTimeout {
        operation,
        timeout: budget,
        last,
    };

    loop {
        let err = match env.reset(&policy.options, ctx).await {
            Ok(()) => break,
            Err(err) => err,
        };
        if Instant::now() >= deadline {
            return Err(expired("reset", err.to_string()));
        }
        if err.is_transient() {
            tracing::warn!(%err, "connection lost during reset, reconnecting");
            reconnect(env, ctx).await;
        } else {
            tracing::warn!(%err, "reset failed, retrying");
        }
        time::sleep(policy.backoff).await;
    }

    loop {
        let last = match env.status(ctx).await {
            Ok(status) if status.active.is_empty() => return Ok(()),
            Ok(status) => {
                let active: Vec<&str> = status.active.iter().map(String::as_str).collect();
                format!("still active: {}", active.join(", "))
            }
            Err(err) => {
                if err.is_transient() {
                    reconnect(env, ctx).await;
                }
                err.to_string()
            }
        };
        if Instant::now() >= deadline {
            return Err(expired("drain", last));
        }
        tracing::debug!(%last, "waiting for workloads to go away");
        time::sleep(policy.poll_interval).await;
    }
}

async fn reconnect(env: &dyn Environment, ctx: &ExecContext) {
    if let Err(err) = env.connect(ctx).await {
        tracing::debug!(%err, "reconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        executor::{Outcome, Status},
    };
    use async_trait::async_trait;
    use futures::{channel::mpsc, StreamExt};
    use std::{
        collections::{BTreeSet, HashMap, VecDeque},
        io,
        sync::{Arc, Mutex},
    };

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct FakeEnv {
        log: Log,
        /// `status` answers before any bootstrap.
        running: bool,
        booted: Mutex<bool>,
        resets: Mutex<VecDeque<Result<(), EnvError>>>,
        active: Mutex<VecDeque<BTreeSet<String>>>,
        deploy_code: i32,
    }

    impl FakeEnv {
        fn note(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl Environment for FakeEnv {
        fn name(&self) -> &str {
            "local"
        }

        async fn bootstrap(&self, _ctx: &ExecContext) -> Result<(), EnvError> {
            self.note("bootstrap".to_string());
            *self.booted.lock().unwrap() = true;
            Ok(())
        }

        async fn connect(&self, _ctx: &ExecContext) -> Result<(), EnvError> {
            self.note("connect".to_string());
            Ok(())
        }

        async fn deploy(
            &self,
            descriptor: &Path,
            _deployment: Option<&str>,
            ctx: &ExecContext,
        ) -> Result<Outcome, EnvError> {
            assert_eq!(ctx.current().as_deref(), Some("local"));
            self.note(format!("deploy {}", descriptor.display()));
            Ok(Outcome::new(self.deploy_code, "deploying\n"))
        }

        async fn reset(&self, _options: &ResetOptions, _ctx: &ExecContext) -> Result<(), EnvError> {
            self.note("reset".to_string());
            self.resets.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn status(&self, _ctx: &ExecContext) -> Result<Status, EnvError> {
            self.note("status".to_string());
            if !self.running && !*self.booted.lock().unwrap() {
                return Err(EnvError::Failed("environment is not bootstrapped".to_string()));
            }
            let active = self.active.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Status { active })
        }

        async fn destroy(&self, _ctx: &ExecContext) -> Result<(), EnvError> {
            self.note("destroy".to_string());
            Ok(())
        }
    }

    /// Exits with the configured code for each command name and records
    /// what ran.
    #[derive(Default)]
    struct Recording {
        calls: Log,
        codes: HashMap<&'static str, i32>,
    }

    #[async_trait]
    impl Invoker for Recording {
        async fn invoke(
            &self,
            argv: &[String],
            _cwd: &Path,
            _timeout: Option<Duration>,
            _ctx: &ExecContext,
        ) -> io::Result<Outcome> {
            let name = argv[0].clone();
            self.calls.lock().unwrap().push(name.clone());
            let code = self.codes.get(name.as_str()).copied().unwrap_or(0);
            Ok(Outcome::new(code, format!("ran {}\n", name)))
        }
    }

    fn spec(name: &str) -> Spec {
        let mut spec = Spec::standalone(name.to_string(), vec![name.to_string()], Path::new("/work"), Some("suite"));
        spec.reset_timeout = Duration::from_secs(5);
        spec
    }

    fn phased(name: &str) -> Spec {
        let mut spec = spec(name);
        spec.setup = vec![PathBuf::from("s1"), PathBuf::from("s2")];
        spec.teardown = vec![PathBuf::from("t1"), PathBuf::from("t2")];
        spec
    }

    fn lifecycle(name: &str) -> Spec {
        let mut spec = spec(name);
        spec.bootstrap = true;
        spec.reset = true;
        spec.deploy = Some(PathBuf::from("bundle.yaml"));
        spec
    }

    fn suite_of(specs: Vec<Spec>) -> Suite {
        let mut suite = Suite::new("suite".to_string(), Config::default());
        for spec in specs {
            suite.push(spec);
        }
        suite
    }

    fn fast() -> RunOptions {
        RunOptions {
            reset: ResetPolicy {
                backoff: Duration::from_millis(1),
                poll_interval: Duration::from_millis(1),
                options: ResetOptions::default(),
            },
            ..RunOptions::default()
        }
    }

    struct Harness {
        calls: Log,
        env_log: Log,
    }

    impl Harness {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn env_log(&self) -> Vec<String> {
            self.env_log.lock().unwrap().clone()
        }
    }

    async fn execute(
        suite: &Suite,
        env: Option<FakeEnv>,
        codes: &[(&'static str, i32)],
        options: RunOptions,
    ) -> (Result<RunStats, Error>, Vec<TestResult>, Harness) {
        let invoker = Recording {
            calls: Log::default(),
            codes: codes.iter().copied().collect(),
        };
        let env_log = env.as_ref().map(|e| Arc::clone(&e.log)).unwrap_or_default();
        let harness = Harness {
            calls: Arc::clone(&invoker.calls),
            env_log,
        };
        let env = env.map(|e| Box::new(e) as Box<dyn Environment>);
        let mut runner = Runner::new(env, Box::new(invoker), ExecContext::default(), options);
        let (tx, rx) = mpsc::unbounded();
        let stats = runner.run(suite, tx).await;
        let results: Vec<TestResult> = rx.collect().await;
        (stats, results, harness)
    }

    #[tokio::test]
    async fn phases_run_in_order() {
        let suite = suite_of(vec![phased("main")]);
        let (stats, results, harness) = execute(&suite, None, &[], fast()).await;
        assert_eq!(stats.unwrap(), RunStats { total: 1, failed: 0, stopped: false });
        assert_eq!(harness.calls(), vec!["s1", "s2", "main", "t2", "t1"]);
        assert_eq!(results[0].returncode, 0);
        assert_eq!(results[0].exit, None);
        assert!(results[0].output.contains("ran main\n"));
        assert_eq!(results[0].suite.as_deref(), Some("suite"));
    }

    #[tokio::test]
    async fn failed_setup_skips_main() {
        let suite = suite_of(vec![phased("main")]);
        let (_, results, harness) = execute(&suite, None, &[("s1", 3)], fast()).await;
        assert_eq!(harness.calls(), vec!["s1", "t2", "t1"]);
        assert_eq!(results[0].returncode, 3);
        assert_eq!(
            results[0].exit,
            Some(Failure::Execution {
                phase: Phase::Setup,
                candidate: "s1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn teardown_only_overwrites_on_failure() {
        let suite = suite_of(vec![phased("main")]);
        let (_, results, _) = execute(&suite, None, &[("main", 2)], fast()).await;
        assert_eq!(results[0].returncode, 2);
        assert!(matches!(results[0].exit, Some(Failure::Execution { phase: Phase::Main, .. })));

        let (_, results, _) = execute(&suite, None, &[("t1", 4)], fast()).await;
        assert_eq!(results[0].returncode, 4);
        assert_eq!(
            results[0].exit,
            Some(Failure::Execution {
                phase: Phase::Teardown,
                candidate: "t1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn failfast_stops_nested_traversal() {
        let mut inner = Suite::new("inner".to_string(), Config::default());
        inner.push(spec("b"));
        inner.push(spec("c"));
        let mut suite = suite_of(vec![spec("a")]);
        suite.push_suite(inner);
        suite.push(spec("d"));

        let options = RunOptions {
            failfast: true,
            ..fast()
        };
        let (stats, results, harness) = execute(&suite, None, &[("b", 1)], options).await;
        assert_eq!(results.len(), 2);
        assert_eq!(harness.calls(), vec!["a", "b"]);
        assert_eq!(stats.unwrap(), RunStats { total: 2, failed: 1, stopped: true });

        let (_, results, _) = execute(&suite, None, &[("b", 1)], fast()).await;
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn bootstraps_once_and_destroys() {
        let suite = suite_of(vec![lifecycle("a"), lifecycle("b")]);
        let (stats, results, harness) = execute(&suite, Some(FakeEnv::default()), &[], fast()).await;
        assert_eq!(stats.unwrap().failed, 0);
        assert_eq!(results.len(), 2);
        let log = harness.env_log();
        assert_eq!(&log[..4], &["status", "bootstrap", "connect", "deploy bundle.yaml"]);
        assert_eq!(log.iter().filter(|e| *e == "bootstrap").count(), 1);
        assert_eq!(log.last().map(String::as_str), Some("destroy"));
    }

    #[tokio::test]
    async fn attaching_does_not_destroy() {
        let suite = suite_of(vec![lifecycle("a")]);
        let env = FakeEnv {
            running: true,
            ..Default::default()
        };
        let (_, _, harness) = execute(&suite, Some(env), &[], fast()).await;
        let log = harness.env_log();
        assert_eq!(&log[..2], &["status", "connect"]);
        assert!(!log.contains(&"bootstrap".to_string()));
        assert!(!log.contains(&"destroy".to_string()));
    }

    #[tokio::test]
    async fn no_destroy_keeps_environment() {
        let suite = suite_of(vec![lifecycle("a")]);
        let options = RunOptions {
            destroy: false,
            ..fast()
        };
        let (_, _, harness) = execute(&suite, Some(FakeEnv::default()), &[], options).await;
        assert!(harness.env_log().contains(&"bootstrap".to_string()));
        assert!(!harness.env_log().contains(&"destroy".to_string()));
    }

    #[tokio::test]
    async fn redeploys_after_reset() {
        let suite = suite_of(vec![lifecycle("a"), lifecycle("b")]);
        let (_, _, harness) = execute(&suite, Some(FakeEnv::default()), &[], fast()).await;
        let deploys = harness.env_log().iter().filter(|e| e.starts_with("deploy")).count();
        assert_eq!(deploys, 2);

        let mut keep = lifecycle("b");
        keep.reset = false;
        let mut first = lifecycle("a");
        first.reset = false;
        let suite = suite_of(vec![first, keep]);
        let (_, _, harness) = execute(&suite, Some(FakeEnv::default()), &[], fast()).await;
        let deploys = harness.env_log().iter().filter(|e| e.starts_with("deploy")).count();
        assert_eq!(deploys, 1);
    }

    #[tokio::test]
    async fn failed_deploy_short_circuits() {
        let suite = suite_of(vec![lifecycle("a")]);
        let env = FakeEnv {
            deploy_code: 2,
            ..Default::default()
        };
        let (stats, results, harness) = execute(&suite, Some(env), &[], fast()).await;
        assert_eq!(stats.unwrap().failed, 1);
        assert!(harness.calls().is_empty());
        assert_eq!(results[0].test, "deploy");
        assert_eq!(results[0].returncode, 2);
        assert_eq!(results[0].output, "deploying\n");
        assert!(matches!(results[0].exit, Some(Failure::Deploy { .. })));
        assert!(harness.env_log().contains(&"reset".to_string()));
    }

    #[tokio::test]
    async fn unreachable_environment_fails_each_test() {
        let mut a = lifecycle("a");
        a.bootstrap = false;
        let mut b = lifecycle("b");
        b.bootstrap = false;
        let suite = suite_of(vec![a, b]);
        let (stats, results, harness) = execute(&suite, Some(FakeEnv::default()), &[], fast()).await;
        assert_eq!(stats.unwrap().failed, 2);
        assert!(results.iter().all(|r| r.test == "bootstrap" && r.exit == Some(Failure::Bootstrap)));
        assert_eq!(harness.env_log(), vec!["status", "status"]);
        assert!(harness.calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let mut spec = lifecycle("a");
        spec.setup = vec![PathBuf::from("s1")];
        let suite = suite_of(vec![spec]);
        let options = RunOptions {
            dry_run: true,
            ..fast()
        };
        let (stats, results, harness) = execute(&suite, Some(FakeEnv::default()), &[("a", 1)], options).await;
        assert_eq!(stats.unwrap().failed, 0);
        assert_eq!(results[0].returncode, 0);
        assert!(harness.calls().is_empty());
        assert!(harness.env_log().is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_a_result() {
        struct Broken;

        #[async_trait]
        impl Invoker for Broken {
            async fn invoke(
                &self,
                _argv: &[String],
                _cwd: &Path,
                _timeout: Option<Duration>,
                _ctx: &ExecContext,
            ) -> io::Result<Outcome> {
                Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
            }
        }

        let suite = suite_of(vec![spec("a")]);
        let mut runner = Runner::new(None, Box::new(Broken), ExecContext::default(), fast());
        let (tx, rx) = mpsc::unbounded();
        runner.run(&suite, tx).await.unwrap();
        let results: Vec<TestResult> = rx.collect().await;
        assert_eq!(results[0].returncode, SPAWN_FAILURE_CODE);
        assert!(results[0].output.contains("no such file"));
    }

    #[tokio::test]
    async fn reset_retries_transient_errors() {
        let env = FakeEnv {
            running: true,
            ..Default::default()
        };
        for _ in 0..3 {
            env.resets
                .lock()
                .unwrap()
                .push_back(Err(EnvError::Transient("connection is shut down".to_string())));
        }
        let policy = fast().reset;
        reset_environment(&env, &ExecContext::default(), &policy, Duration::from_secs(5))
            .await
            .unwrap();
        let log = env.log.lock().unwrap().clone();
        assert_eq!(log.iter().filter(|e| *e == "reset").count(), 4);
        assert_eq!(log.iter().filter(|e| *e == "connect").count(), 3);
    }

    #[tokio::test]
    async fn reset_gives_up_after_budget() {
        let env = FakeEnv {
            running: true,
            ..Default::default()
        };
        for _ in 0..10_000 {
            env.resets
                .lock()
                .unwrap()
                .push_back(Err(EnvError::Failed("denied".to_string())));
        }
        let policy = fast().reset;
        let err = reset_environment(&env, &ExecContext::default(), &policy, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EnvironmentTimeout { operation: "reset", .. }));
    }

    #[tokio::test]
    async fn reset_keeps_reconnecting_until_budget() {
        let env = FakeEnv {
            running: true,
            ..Default::default()
        };
        for _ in 0..10_000 {
            env.resets
                .lock()
                .unwrap()
                .push_back(Err(EnvError::Transient("connection is shut down".to_string())));
        }
        let policy = fast().reset;
        let err = reset_environment(&env, &ExecContext::default(), &policy, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EnvironmentTimeout { operation: "reset", .. }));
        let log = env.log.lock().unwrap();
        assert!(log.iter().any(|entry| entry == "connect"));
        assert!(!log.iter().any(|entry| entry == "status"));
    }

    #[tokio::test]
    async fn drain_waits_for_workloads() {
        let env = FakeEnv {
            running: true,
            ..Default::default()
        };
        let busy: BTreeSet<String> = vec!["mysql".to_string()].into_iter().collect();
        env.active.lock().unwrap().extend(vec![busy.clone(), busy.clone()]);
        let policy = fast().reset;
        reset_environment(&env, &ExecContext::default(), &policy, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(env.log.lock().unwrap().iter().filter(|e| *e == "status").count(), 3);

        for _ in 0..10_000 {
            env.active.lock().unwrap().push_back(busy.clone());
        }
        let err = reset_environment(&env, &ExecContext::default(), &policy, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EnvironmentTimeout { operation: "drain", .. }));
    }
}
