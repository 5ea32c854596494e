//! The target environment seen by spawned processes.
//!
//! Children learn which environment to act on through [TARGET_ENV_VAR]. The
//! value comes from an [ExecContext] passed to every call that spawns a
//! process; the orchestrator's own environment is never modified.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Variable set on child processes naming the current target environment.
pub const TARGET_ENV_VAR: &str = "JUJU_ENV";

/// A stack of target environment names. Clones share the same stack.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    stack: Arc<Mutex<Vec<String>>>,
}

/// Restores the previous target when dropped.
#[must_use = "the target is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    stack: Arc<Mutex<Vec<String>>>,
    depth: usize,
}

impl ExecContext {
    /// Make `target` the current environment until the guard is dropped.
    pub fn enter(&self, target: &str) -> ContextGuard {
        let mut stack = self.lock();
        if stack.last().map(String::as_str) != Some(target) {
            tracing::debug!(from = ?stack.last(), to = target, "switching target environment");
        }
        stack.push(target.to_string());
        ContextGuard {
            stack: Arc::clone(&self.stack),
            depth: stack.len(),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.lock().last().cloned()
    }

    /// Variables to add to a child's environment.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        self.current()
            .map(|target| vec![(TARGET_ENV_VAR, target)])
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let mut stack = self.stack.lock().unwrap_or_else(PoisonError::into_inner);
        stack.truncate(self.depth.saturating_sub(1));
    }
}
