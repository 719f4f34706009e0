//! Sink Workers
//!
//! Every sink branch runs as its own tokio task so that persistence I/O never
//! blocks the aggregation hot path. The pipeline talks to a branch through a
//! bounded channel:
//!
//! - `Put` hands over rows; the sink buffers them and writes full batches.
//! - `Flush` writes whatever is buffered and acknowledges the outcome.
//! - `Stop` flushes, shuts the sink down and ends the task.
//!
//! Between commands the worker flushes on a timer, so a quiet stream still
//! reaches the sinks within one batch interval.
//!
//! ## Criticality
//!
//! A [`Criticality::Required`] branch halts on its first error: it stops
//! writing and reports the error on the next flush, which fails the pipeline
//! before any offset is committed. A [`Criticality::BestEffort`] branch logs
//! the error and keeps going; its puts never wait for channel capacity, so a
//! stalled search index cannot stall the relational branches.

use std::fmt;
use std::time::Duration;

use salesflow_connectors::{ConnectorError, SinkConnector};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{PipelineError, Result};

type Ack = oneshot::Sender<salesflow_connectors::Result<()>>;

/// How a branch failure affects the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Required,
    BestEffort,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criticality::Required => write!(f, "required"),
            Criticality::BestEffort => write!(f, "best_effort"),
        }
    }
}

enum Command<R> {
    Put(Vec<R>),
    /// Best-effort branches are flushed without waiting for the outcome.
    Flush(Option<Ack>),
    Stop(Ack),
}

/// Handle to a running sink branch.
pub struct SinkWorker<R> {
    name: String,
    criticality: Criticality,
    tx: mpsc::Sender<Command<R>>,
    handle: JoinHandle<()>,
}

impl<R: Send + Sync + 'static> SinkWorker<R> {
    /// Spawn the worker task for an already started sink.
    pub fn spawn(
        sink: Box<dyn SinkConnector<R>>,
        criticality: Criticality,
        flush_interval: Duration,
        capacity: usize,
    ) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let branch = Branch {
            name: name.clone(),
            criticality,
            sink,
            failure: None,
            halted: false,
        };
        let handle = tokio::spawn(branch.run(rx, flush_interval));

        tracing::info!(branch = %name, criticality = %criticality, "sink worker started");
        Self {
            name,
            criticality,
            tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    /// Hand rows to the branch.
    ///
    /// Returns `false` when a best-effort branch was backed up and the rows
    /// were shed instead of queued.
    pub async fn put(&self, rows: Vec<R>) -> Result<bool> {
        if rows.is_empty() {
            return Ok(true);
        }
        match self.criticality {
            Criticality::Required => {
                self.tx
                    .send(Command::Put(rows))
                    .await
                    .map_err(|_| self.closed())?;
                Ok(true)
            }
            Criticality::BestEffort => match self.tx.try_send(Command::Put(rows)) {
                Ok(()) => Ok(true),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(branch = %self.name, "branch is backed up, shedding rows");
                    Ok(false)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(branch = %self.name, "branch has stopped, dropping rows");
                    Ok(false)
                }
            },
        }
    }

    /// Write everything handed over so far.
    ///
    /// For a required branch this waits for the write and returns its error,
    /// or the error that halted the branch earlier. A best-effort branch is
    /// only asked to flush.
    pub async fn flush(&self) -> Result<()> {
        match self.criticality {
            Criticality::Required => {
                let (ack, done) = oneshot::channel();
                self.tx
                    .send(Command::Flush(Some(ack)))
                    .await
                    .map_err(|_| self.closed())?;
                self.settle(done).await
            }
            Criticality::BestEffort => {
                if self.tx.try_send(Command::Flush(None)).is_err() {
                    tracing::debug!(branch = %self.name, "flush request skipped, branch busy");
                }
                Ok(())
            }
        }
    }

    /// Flush, stop the sink and wait for the task to end.
    pub async fn stop(self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Stop(ack)).await.is_err() {
            return Err(self.closed());
        }
        let result = self.settle(done).await;
        if let Err(e) = self.handle.await {
            tracing::error!(branch = %self.name, error = %e, "sink worker task panicked");
            return Err(PipelineError::BranchClosed(self.name));
        }
        result
    }

    async fn settle(&self, done: oneshot::Receiver<salesflow_connectors::Result<()>>) -> Result<()> {
        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(PipelineError::Sink {
                branch: self.name.clone(),
                source,
            }),
            Err(_) => Err(self.closed()),
        }
    }

    fn closed(&self) -> PipelineError {
        PipelineError::BranchClosed(self.name.clone())
    }
}

/// State owned by the worker task.
struct Branch<R> {
    name: String,
    criticality: Criticality,
    sink: Box<dyn SinkConnector<R>>,
    /// First unreported error of a required branch.
    failure: Option<ConnectorError>,
    halted: bool,
}

impl<R: Send + Sync + 'static> Branch<R> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command<R>>, flush_interval: Duration) {
        let start = tokio::time::Instant::now() + flush_interval;
        let mut ticker = tokio::time::interval_at(start, flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Put(rows)) => {
                        if !self.halted {
                            let result = self.sink.put(&rows).await;
                            self.observe(result);
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        if !self.halted {
                            let result = self.sink.flush().await;
                            self.observe(result);
                        }
                        if let Some(ack) = ack {
                            let _ = ack.send(self.report());
                        }
                    }
                    Some(Command::Stop(ack)) => {
                        if !self.halted {
                            let result = self.sink.stop().await;
                            self.observe(result);
                        }
                        let _ = ack.send(self.report());
                        break;
                    }
                    None => {
                        // Handle dropped without a stop; write what we have.
                        if !self.halted {
                            let result = self.sink.stop().await;
                            self.observe(result);
                        }
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !self.halted && self.sink.buffered() > 0 {
                        let result = self.sink.flush().await;
                        self.observe(result);
                    }
                }
            }
        }

        tracing::info!(branch = %self.name, halted = self.halted, "sink worker stopped");
    }

    fn observe(&mut self, result: salesflow_connectors::Result<()>) {
        let Err(e) = result else {
            return;
        };
        match self.criticality {
            Criticality::BestEffort => {
                tracing::warn!(
                    branch = %self.name,
                    error = %e,
                    "best-effort branch write failed, continuing"
                );
            }
            Criticality::Required => {
                tracing::error!(
                    branch = %self.name,
                    error = %e,
                    "required branch write failed, halting branch"
                );
                self.halted = true;
                if self.failure.is_none() {
                    self.failure = Some(e);
                }
            }
        }
    }

    fn report(&mut self) -> salesflow_connectors::Result<()> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        if self.halted {
            return Err(ConnectorError::SinkError(format!(
                "{} halted after an earlier failure",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Recorded {
        buffered: Vec<u32>,
        written: Vec<u32>,
        failing_flushes: usize,
        flushes: usize,
        stopped: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl RecordingSink {
        fn fail_next_flushes(&self, n: usize) {
            self.recorded.lock().unwrap().failing_flushes = n;
        }

        fn written(&self) -> Vec<u32> {
            self.recorded.lock().unwrap().written.clone()
        }

        fn flushes(&self) -> usize {
            self.recorded.lock().unwrap().flushes
        }

        fn stopped(&self) -> bool {
            self.recorded.lock().unwrap().stopped
        }
    }

    #[async_trait]
    impl SinkConnector<u32> for RecordingSink {
        async fn start(&mut self) -> salesflow_connectors::Result<()> {
            Ok(())
        }

        async fn put(&mut self, rows: &[u32]) -> salesflow_connectors::Result<()> {
            self.recorded.lock().unwrap().buffered.extend_from_slice(rows);
            Ok(())
        }

        async fn flush(&mut self) -> salesflow_connectors::Result<()> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.flushes += 1;
            if recorded.failing_flushes > 0 {
                recorded.failing_flushes -= 1;
                return Err(ConnectorError::SinkError("rejected".to_string()));
            }
            let rows = std::mem::take(&mut recorded.buffered);
            recorded.written.extend(rows);
            Ok(())
        }

        fn buffered(&self) -> usize {
            self.recorded.lock().unwrap().buffered.len()
        }

        async fn stop(&mut self) -> salesflow_connectors::Result<()> {
            self.flush().await?;
            self.recorded.lock().unwrap().stopped = true;
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn spawn(sink: &RecordingSink, criticality: Criticality) -> SinkWorker<u32> {
        SinkWorker::spawn(
            Box::new(sink.clone()),
            criticality,
            Duration::from_secs(60),
            8,
        )
    }

    // ---------------------------------------------------------------
    // Happy path
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_flush_writes_everything_put_before_it() {
        let sink = RecordingSink::default();
        let worker = spawn(&sink, Criticality::Required);

        worker.put(vec![1, 2]).await.unwrap();
        worker.put(vec![3]).await.unwrap();
        worker.flush().await.unwrap();

        assert_eq!(sink.written(), vec![1, 2, 3]);
        worker.stop().await.unwrap();
        assert!(sink.stopped());
    }

    #[tokio::test]
    async fn test_empty_put_is_accepted_without_a_command() {
        let sink = RecordingSink::default();
        let worker = spawn(&sink, Criticality::Required);
        assert!(worker.put(Vec::new()).await.unwrap());
        worker.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_without_explicit_flush() {
        let sink = RecordingSink::default();
        let worker = SinkWorker::spawn(
            Box::new(sink.clone()),
            Criticality::Required,
            Duration::from_millis(200),
            8,
        );

        worker.put(vec![7]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(sink.written(), vec![7]);
        worker.stop().await.unwrap();
    }

    // ---------------------------------------------------------------
    // Failures
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_required_failure_halts_branch() {
        let sink = RecordingSink::default();
        sink.fail_next_flushes(1);
        let worker = spawn(&sink, Criticality::Required);

        worker.put(vec![1]).await.unwrap();
        let err = worker.flush().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Sink { ref branch, source: ConnectorError::SinkError(_) } if branch == "recording"
        ));

        // Halted: later rows are not written and the failure keeps being reported.
        worker.put(vec![2]).await.unwrap();
        assert!(worker.flush().await.is_err());
        assert!(sink.written().is_empty());
        assert_eq!(sink.flushes(), 1);

        assert!(worker.stop().await.is_err());
        assert!(!sink.stopped());
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_not_reported() {
        let sink = RecordingSink::default();
        sink.fail_next_flushes(1);
        let worker = spawn(&sink, Criticality::BestEffort);

        worker.put(vec![1]).await.unwrap();
        worker.flush().await.unwrap();
        worker.put(vec![2]).await.unwrap();
        worker.stop().await.unwrap();

        // The first flush failed, the stop flush wrote both rows.
        assert_eq!(sink.written(), vec![1, 2]);
        assert!(sink.stopped());
    }

    #[test]
    fn test_criticality_display() {
        assert_eq!(Criticality::Required.to_string(), "required");
        assert_eq!(Criticality::BestEffort.to_string(), "best_effort");
    }
}
