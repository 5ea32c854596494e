//! An executor runs an assembled suite against an environment and streams
//! out the results.

mod context;
mod env;
mod environment;
pub mod results;
mod runner;
pub mod suite;

pub use context::Context;
pub use env::{ContextGuard, ExecContext, TARGET_ENV_VAR};
pub use environment::{
    classify_failure, current_environment, CommandEnvironment, Environment, ResetOptions, Status,
};
pub use runner::{reset_environment, ResetPolicy, RunOptions, RunStats, Runner, SPAWN_FAILURE_CODE};
pub use test::{Invoker, Outcome, ProcessInvoker, TIMEOUT_CODE};
