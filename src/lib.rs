//! Rigtest runs the tests of deployable workloads inside a managed
//! environment: it bootstraps the environment, deploys the workload, runs
//! each test through its setup, main, and teardown phases, and resets the
//! environment between tests.
//!
//! ## Testing Model
//! Rigtest looks at the directory it is pointed at and decides what it is
//! testing:
//!   - A **bundle**: the directory holds a descriptor (a `*.yaml` file with a
//!     `services` section) naming several components. The tests of every
//!     component the descriptor references run first, then the bundle's own.
//!   - A **component**: the directory holds a `metadata.yaml`.
//!   - A **test directory**: anything else.
//!
//! Tests are the executable files under `tests/`. Bundles and components
//! also get implicit tests: `charm proof` and, when a Makefile exists, one
//! test for each of the `lint` and `test` targets it defines.
//!
//! ## Configuration
//! A `tests.yaml` (or `tests.toml`) file in the tests directory configures
//! the suite. Nested suites inherit the configuration of their parent.
//! Scalars are replaced, lists are extended.
//! ```yaml
//! # Bootstrap the environment if it isn't running yet.
//! bootstrap: true
//! # Reset the environment after every test.
//! reset: true
//! # Seconds to wait for a reset to finish.
//! reset_timeout: 180
//! # Glob selecting the test files.
//! tests: "[0-9]*"
//! # Scripts run before and after every test, relative to the test.
//! setup: [00-setup]
//! teardown: [99-cleanup]
//! # Skip suites whose name contains any of these.
//! excludes: [mysql]
//! # Make targets turned into implicit tests.
//! makefile: [lint, test]
//! ```
//! A test file `10-deploy` may carry a `10-deploy.yaml` control file that
//! overrides the suite configuration for that test only.
//!
//! ## Running
//! ```text
//! rigtest -e local bundles/wiki
//! ✓ mysql:proof (0.41s)
//! ✓ mysql:10-deploy (102.37s)
//! ✗ wiki:20-scale (233.10s) (main: /srv/bundles/wiki/tests/20-scale)
//!   2 passing / 1 failing (335.88s)
//! ```
//! Rigtest exits with 0 when every test passed, 1 when some test failed, and
//! 2 when the run could not be completed.
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod model;
pub mod picker;
