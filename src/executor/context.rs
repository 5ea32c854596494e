use super::{results::Reporter, suite::Suite, Runner};
use crate::errors::Error;
use futures::{
    channel::mpsc,
    future,
    io::{AllowStdIo, AsyncWriteExt},
    StreamExt,
};

/// Pairs a suite with the runner that executes it and streams results to a
/// reporter as they are produced.
pub struct Context {
    suite: Suite,
    runner: Runner,
}

impl Context {
    pub fn new(suite: Suite, runner: Runner) -> Self {
        Context { suite, runner }
    }

    /// Runs the suite and writes every result to `out` as soon as it is
    /// available, followed by the reporter's summary. The summary is also
    /// written when the run aborts; the fatal error is returned afterwards.
    pub async fn flat_summary<W: std::io::Write + Unpin>(
        self,
        reporter: &mut dyn Reporter,
        out: W,
    ) -> Result<i32, Error> {
        let Context { suite, mut runner } = self;
        let mut handle = AllowStdIo::new(std::io::BufWriter::new(out));
        let (tx, mut rx) = mpsc::unbounded();

        handle.write_all(reporter.header().as_bytes()).await?;
        let run = runner.run(&suite, tx);
        let drain = async {
            while let Some(result) = rx.next().await {
                let buf = reporter.emit(&result);
                if !buf.is_empty() {
                    handle.write_all(buf.as_bytes()).await?;
                    handle.flush().await?;
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let (outcome, drained) = future::join(run, drain).await;
        drained?;

        handle.write_all(reporter.summary()?.as_bytes()).await?;
        handle.flush().await?;

        let stats = outcome?;
        tracing::debug!(total = stats.total, failed = stats.failed, "run complete");
        Ok(reporter.exit())
    }
}
