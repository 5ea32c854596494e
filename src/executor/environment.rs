//! The managed runtime environment tests are deployed into.
use super::{ExecContext, Invoker, Outcome, ProcessInvoker};
use crate::errors::EnvError;
use async_trait::async_trait;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

/// Output fragments that mean the endpoint dropped the connection.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection is shut down",
    "connection reset",
    "broken pipe",
    "connection refused",
    "unexpected eof",
];

/// What is currently running in the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub active: BTreeSet<String>,
}

/// How a reset should clean up.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetOptions {
    /// Also release the machines the workloads ran on.
    pub terminate_workloads: bool,
    /// Wait this long between removing workloads and terminating machines.
    pub terminate_delay: Duration,
    pub force_terminate: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            terminate_workloads: true,
            terminate_delay: Duration::from_secs(0),
            force_terminate: false,
        }
    }
}

/// Lifecycle operations the runner drives. `bootstrap` and `connect` must be
/// idempotent. Implementations report a dropped connection as
/// [EnvError::Transient] so the caller can reconnect and retry.
#[async_trait]
pub trait Environment: Send + Sync {
    fn name(&self) -> &str;

    async fn bootstrap(&self, ctx: &ExecContext) -> Result<(), EnvError>;

    async fn connect(&self, ctx: &ExecContext) -> Result<(), EnvError>;

    async fn deploy(
        &self,
        descriptor: &Path,
        deployment: Option<&str>,
        ctx: &ExecContext,
    ) -> Result<Outcome, EnvError>;

    async fn reset(&self, options: &ResetOptions, ctx: &ExecContext) -> Result<(), EnvError>;

    async fn status(&self, ctx: &ExecContext) -> Result<Status, EnvError>;

    async fn destroy(&self, ctx: &ExecContext) -> Result<(), EnvError>;
}

/// An environment driven through the `juju` and `juju-deployer` command line
/// tools. The target is selected through the context, not through flags.
pub struct CommandEnvironment {
    name: String,
    cwd: PathBuf,
    invoker: Box<dyn Invoker>,
}

impl CommandEnvironment {
    pub fn new(name: String, cwd: &Path) -> Self {
        Self::with_invoker(name, cwd, Box::new(ProcessInvoker))
    }

    pub fn with_invoker(name: String, cwd: &Path, invoker: Box<dyn Invoker>) -> Self {
        Self {
            name,
            cwd: cwd.to_path_buf(),
            invoker,
        }
    }

    async fn call(&self, argv: &[&str], ctx: &ExecContext) -> Result<Outcome, EnvError> {
        let argv: Vec<String> = argv.iter().map(|a| a.to_string()).collect();
        self.invoker
            .invoke(&argv, &self.cwd, None, ctx)
            .await
            .map_err(|err| EnvError::Failed(format!("{}: {}", argv.join(" "), err)))
    }

    /// Like `call` but a non-zero exit is an error.
    async fn check(&self, argv: &[&str], ctx: &ExecContext) -> Result<String, EnvError> {
        let outcome = self.call(argv, ctx).await?;
        if outcome.success() {
            Ok(outcome.output)
        } else {
            Err(classify_failure(&outcome))
        }
    }

    async fn raw_status(&self, ctx: &ExecContext) -> Result<serde_json::Value, EnvError> {
        let output = self.check(&["juju", "status", "--format=json"], ctx).await?;
        serde_json::from_str(&output)
            .map_err(|err| EnvError::Failed(format!("unreadable status: {}", err)))
    }
}

#[async_trait]
impl Environment for CommandEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn bootstrap(&self, ctx: &ExecContext) -> Result<(), EnvError> {
        self.check(&["juju", "bootstrap"], ctx).await.map(|_| ())
    }

    async fn connect(&self, ctx: &ExecContext) -> Result<(), EnvError> {
        self.raw_status(ctx).await.map(|_| ())
    }

    async fn deploy(
        &self,
        descriptor: &Path,
        deployment: Option<&str>,
        ctx: &ExecContext,
    ) -> Result<Outcome, EnvError> {
        let descriptor = descriptor.to_string_lossy();
        let mut argv = vec!["juju-deployer", "-vW", "-c", descriptor.as_ref()];
        argv.extend(deployment);
        self.call(&argv, ctx).await
    }

    async fn reset(&self, options: &ResetOptions, ctx: &ExecContext) -> Result<(), EnvError> {
        let status = self.raw_status(ctx).await?;
        for service in workload_names(&status) {
            self.check(&["juju", "destroy-service", service.as_str()], ctx).await?;
        }
        if !options.terminate_workloads {
            return Ok(());
        }
        let machines: Vec<String> = status
            .get("machines")
            .and_then(serde_json::Value::as_object)
            .map(|m| m.keys().filter(|id| id.as_str() != "0").cloned().collect())
            .unwrap_or_default();
        if machines.is_empty() {
            return Ok(());
        }
        tokio::time::sleep(options.terminate_delay).await;
        let mut argv = vec!["juju", "terminate-machine"];
        if options.force_terminate {
            argv.push("--force");
        }
        argv.extend(machines.iter().map(String::as_str));
        self.check(&argv, ctx).await.map(|_| ())
    }

    async fn status(&self, ctx: &ExecContext) -> Result<Status, EnvError> {
        let status = self.raw_status(ctx).await?;
        Ok(Status {
            active: workload_names(&status).into_iter().collect(),
        })
    }

    async fn destroy(&self, ctx: &ExecContext) -> Result<(), EnvError> {
        self.check(&["juju", "destroy-environment", "-y", self.name.as_str()], ctx)
            .await
            .map(|_| ())
    }
}

fn workload_names(status: &serde_json::Value) -> Vec<String> {
    ["services", "applications"]
        .iter()
        .filter_map(|key| status.get(*key).and_then(serde_json::Value::as_object))
        .flat_map(|workloads| workloads.keys().cloned())
        .collect()
}

/// Decide whether a failed command lost its connection or really failed.
pub fn classify_failure(outcome: &Outcome) -> EnvError {
    let lowered = outcome.output.to_lowercase();
    let message = format!("exit {}: {}", outcome.returncode, outcome.output.trim());
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        EnvError::Transient(message)
    } else {
        EnvError::Failed(message)
    }
}

/// Name of the environment the `juju` client currently points at.
pub async fn current_environment(invoker: &dyn Invoker, cwd: &Path, ctx: &ExecContext) -> Option<String> {
    let argv = vec!["juju".to_string(), "switch".to_string()];
    let outcome = match invoker.invoke(&argv, cwd, None, ctx).await {
        Ok(outcome) if outcome.success() => outcome,
        Ok(outcome) => {
            tracing::debug!(code = outcome.returncode, "juju switch failed");
            return None;
        }
        Err(err) => {
            tracing::debug!(%err, "juju switch failed");
            return None;
        }
    };
    outcome
        .output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}
