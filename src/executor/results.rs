use colored::*;
use serde::{Serialize, Serializer};
use std::{fmt, io, path::PathBuf, time::Duration};

/// Which phase of a test a candidate belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Main,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Setup => "setup",
            Phase::Main => "main",
            Phase::Teardown => "teardown",
        })
    }
}

/// Why a result is failing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Failure {
    /// The environment could not be bootstrapped or attached.
    Bootstrap,
    /// Deploying the descriptor failed or timed out.
    Deploy { descriptor: PathBuf },
    /// A setup, main, or teardown candidate exited non-zero.
    Execution { phase: Phase, candidate: String },
}

/// The outcome of running one test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub test: String,
    pub suite: Option<String>,
    pub dirname: Option<PathBuf>,
    pub returncode: i32,
    pub output: String,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub exit: Option<Failure>,
}

impl TestResult {
    pub fn new(test: &str, suite: Option<&str>) -> Self {
        TestResult {
            test: test.to_string(),
            suite: suite.map(String::from),
            dirname: None,
            returncode: 0,
            output: String::new(),
            duration: Duration::default(),
            exit: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.returncode == 0
    }

    /// Generate colorized string to report this result.
    pub fn report_str(&self, show_output: bool) -> String {
        let (mark, paint): (&str, fn(&str) -> ColoredString) = if self.passed() {
            ("✓ ", |s| s.green())
        } else {
            ("✗ ", |s| s.red())
        };
        let mut buf = String::new();
        buf.push_str(&paint(mark).to_string());
        if let Some(suite) = &self.suite {
            buf.push_str(&paint(suite).bold().to_string());
            buf.push_str(&paint(":").to_string());
        }
        buf.push_str(&paint(&self.test).to_string());
        buf.push_str(&format!(" ({:.2}s)", self.duration.as_secs_f64()).dimmed().to_string());

        match &self.exit {
            Some(Failure::Bootstrap) => buf.push_str(&" (bootstrap)".dimmed().to_string()),
            Some(Failure::Deploy { .. }) => buf.push_str(&" (deploy)".dimmed().to_string()),
            Some(Failure::Execution { phase, candidate }) if !self.passed() => {
                buf.push_str(&format!(" ({}: {})", phase, candidate).dimmed().to_string());
            }
            _ => {}
        }
        if show_output && !self.output.is_empty() {
            for line in self.output.lines() {
                buf.push_str("\n    ");
                buf.push_str(line);
            }
        }
        buf
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Consumes results as they arrive and renders them.
///
/// Every method returns the text to write to the output stream.
pub trait Reporter {
    fn header(&mut self) -> String {
        String::new()
    }

    fn emit(&mut self, result: &TestResult) -> String;

    fn summary(&mut self) -> io::Result<String>;

    /// Process exit code: 1 if any result was non-zero, else 0.
    fn exit(&self) -> i32;
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    pass: usize,
    fail: usize,
    seconds: f64,
}

impl Tally {
    fn count(&mut self, result: &TestResult) {
        if result.passed() {
            self.pass += 1;
        } else {
            self.fail += 1;
        }
        self.seconds += result.duration.as_secs_f64();
    }
}

/// One line per result, as it arrives.
#[derive(Debug, Default)]
pub struct SpecReporter {
    /// Show the output of passing tests too.
    verbose: bool,
    tally: Tally,
}

impl SpecReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            tally: Tally::default(),
        }
    }
}

impl Reporter for SpecReporter {
    fn header(&mut self) -> String {
        format!("{}\n", "Running tests...".bold())
    }

    fn emit(&mut self, result: &TestResult) -> String {
        self.tally.count(result);
        result.report_str(self.verbose || !result.passed()) + "\n"
    }

    fn summary(&mut self) -> io::Result<String> {
        let Tally { pass, fail, seconds } = self.tally;
        let mut buf = String::new();
        buf.push_str(&format!("  {} passing", pass).green().bold().to_string());
        if fail != 0 {
            buf.push_str(&format!(" / {} failing", fail).red().bold().to_string());
        }
        buf.push_str(&format!(" ({:.2}s)\n", seconds).dimmed().to_string());
        Ok(buf)
    }

    fn exit(&self) -> i32 {
        (self.tally.fail != 0) as i32
    }
}

/// Collects every result and prints them as a JSON array at the end.
#[derive(Debug, Default)]
pub struct JsonReporter {
    results: Vec<TestResult>,
}

impl Reporter for JsonReporter {
    fn emit(&mut self, result: &TestResult) -> String {
        self.results.push(result.clone());
        String::new()
    }

    fn summary(&mut self) -> io::Result<String> {
        let mut doc = serde_json::to_string_pretty(&self.results)?;
        doc.push('\n');
        Ok(doc)
    }

    fn exit(&self) -> i32 {
        self.results.iter().any(|r| !r.passed()) as i32
    }
}
