//! Fan-out Pipeline
//!
//! Polls encoded transactions from a [`SourceConnector`], decodes and
//! validates them, folds each one into the three roll-ups and hands the
//! results to five independent sink branches:
//!
//! ```text
//!                                 ┌─> transactions                          (required)
//!                                 ├─> by category/day ─> sales_per_category (required)
//! source ─> decode ─> validate ───┼─> by day          ─> sales_per_day      (required)
//!                                 ├─> by month        ─> sales_per_month    (required)
//!                                 └─> search mirror                         (best effort)
//! ```
//!
//! The pipeline task owns all aggregator state, so every key has exactly one
//! writer. There is no transaction spanning the branches; each target is an
//! eventually consistent projection of the stream.
//!
//! ## Checkpoints
//!
//! Every `commit_interval` the pipeline flushes the required branches, and
//! only when all of them succeeded commits the source offsets. Keys past the
//! retention horizon are evicted afterwards, once their final totals are
//! durable. A crash therefore re-delivers at most the records since the last
//! checkpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use salesflow_connectors::{
    DocumentIndex, RelationalStore, SearchMirrorConnector, SinkConnector, SourceConnector,
    SourceRecord, UpsertSinkConnector,
};
use salesflow_core::{
    decode_transaction, AggregateUpdate, AggregationKey, CategoryDay, CoreError, Day,
    FoldOutcome, KeyedAggregator, Month, Transaction, Validator,
};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::worker::{Criticality, SinkWorker};

/// Pause between polls that returned nothing.
const IDLE_BACKOFF: Duration = Duration::from_millis(20);

pub const RAW_BRANCH: &str = "transactions";
pub const CATEGORY_BRANCH: &str = "sales_per_category";
pub const DAY_BRANCH: &str = "sales_per_day";
pub const MONTH_BRANCH: &str = "sales_per_month";
pub const SEARCH_BRANCH: &str = "search_mirror";

pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn SourceConnector>,
    validator: Validator,
    by_category: KeyedAggregator<CategoryDay>,
    by_day: KeyedAggregator<Day>,
    by_month: KeyedAggregator<Month>,
    raw_sink: SinkWorker<Transaction>,
    category_sink: SinkWorker<AggregateUpdate<CategoryDay>>,
    day_sink: SinkWorker<AggregateUpdate<Day>>,
    month_sink: SinkWorker<AggregateUpdate<Month>>,
    search_sink: Option<SinkWorker<Transaction>>,
    stats: Arc<PipelineStats>,
    last_checkpoint: Instant,
}

impl Pipeline {
    /// Start every sink branch, then the source.
    ///
    /// `index` is optional: without it the search mirror branch is not run.
    pub async fn start(
        config: PipelineConfig,
        mut source: Box<dyn SourceConnector>,
        store: Arc<dyn RelationalStore>,
        index: Option<Arc<dyn DocumentIndex>>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_policy();

        let raw_sink = start_branch(
            UpsertSinkConnector::<Transaction>::new(RAW_BRANCH, store.clone(), &config.sink)
                .with_retry_policy(retry.clone()),
            Criticality::Required,
            &config,
        )
        .await?;
        let category_sink = start_branch(
            UpsertSinkConnector::<AggregateUpdate<CategoryDay>>::new(
                CATEGORY_BRANCH,
                store.clone(),
                &config.sink,
            )
            .with_retry_policy(retry.clone()),
            Criticality::Required,
            &config,
        )
        .await?;
        let day_sink = start_branch(
            UpsertSinkConnector::<AggregateUpdate<Day>>::new(DAY_BRANCH, store.clone(), &config.sink)
                .with_retry_policy(retry.clone()),
            Criticality::Required,
            &config,
        )
        .await?;
        let month_sink = start_branch(
            UpsertSinkConnector::<AggregateUpdate<Month>>::new(MONTH_BRANCH, store, &config.sink)
                .with_retry_policy(retry.clone()),
            Criticality::Required,
            &config,
        )
        .await?;
        let search_sink = match index {
            Some(index) => Some(
                start_branch(
                    SearchMirrorConnector::new(
                        SEARCH_BRANCH,
                        &config.search_index,
                        index,
                        &config.sink,
                    )
                    .with_retry_policy(retry),
                    Criticality::BestEffort,
                    &config,
                )
                .await?,
            ),
            None => {
                tracing::info!("search mirror disabled");
                None
            }
        };

        source.start().await?;

        tracing::info!(
            source = %source.name(),
            batch_size = config.sink.batch_size,
            commit_interval_ms = config.commit_interval.as_millis() as u64,
            replay_window = config.replay_window,
            retention_days = ?config.retention.horizon_days,
            max_future_skew = ?config.max_future_skew,
            "pipeline started"
        );

        Ok(Self {
            validator: config.validator(),
            by_category: aggregator(&config),
            by_day: aggregator(&config),
            by_month: aggregator(&config),
            config,
            source,
            raw_sink,
            category_sink,
            day_sink,
            month_sink,
            search_sink,
            stats: Arc::new(PipelineStats::new()),
            last_checkpoint: Instant::now(),
        })
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn by_category(&self) -> &KeyedAggregator<CategoryDay> {
        &self.by_category
    }

    pub fn by_day(&self) -> &KeyedAggregator<Day> {
        &self.by_day
    }

    pub fn by_month(&self) -> &KeyedAggregator<Month> {
        &self.by_month
    }

    /// Poll the source once and process whatever it returned.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let records = self.source.poll().await?;
        if !records.is_empty() {
            self.process(&records).await?;
        }
        Ok(records.len())
    }

    /// Decode, validate, fold and fan out one polled batch.
    ///
    /// Malformed and invalid records are counted and dropped. An error means a
    /// required branch has stopped accepting rows.
    pub async fn process(&mut self, records: &[SourceRecord]) -> Result<()> {
        let mut transactions = Vec::with_capacity(records.len());
        let mut category_updates = Vec::new();
        let mut day_updates = Vec::new();
        let mut month_updates = Vec::new();

        for record in records {
            PipelineStats::incr(&self.stats.received);
            let Some(tx) = self.admit(record) else {
                continue;
            };

            fold(&mut self.by_category, &tx, &mut category_updates, &self.stats);
            fold(&mut self.by_day, &tx, &mut day_updates, &self.stats);
            fold(&mut self.by_month, &tx, &mut month_updates, &self.stats);
            transactions.push(tx);
        }

        PipelineStats::add(&self.stats.processed, transactions.len() as u64);

        if let Some(search) = &self.search_sink {
            if !transactions.is_empty() && !search.put(transactions.clone()).await? {
                PipelineStats::incr(&self.stats.shed);
            }
        }
        self.category_sink.put(category_updates).await?;
        self.day_sink.put(day_updates).await?;
        self.month_sink.put(month_updates).await?;
        self.raw_sink.put(transactions).await?;
        Ok(())
    }

    fn admit(&self, record: &SourceRecord) -> Option<Transaction> {
        let raw = match decode_transaction(&record.value) {
            Ok(raw) => raw,
            Err(e) => {
                PipelineStats::incr(&self.stats.malformed);
                let err = CoreError::from(e);
                tracing::warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    reason = err.reason(),
                    error = %err,
                    "dropping undecodable record"
                );
                return None;
            }
        };

        match self.validator.validate(raw) {
            Ok(tx) => Some(tx),
            Err(e) => {
                PipelineStats::incr(&self.stats.rejected);
                let err = CoreError::from(e);
                tracing::warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    reason = err.reason(),
                    error = %err,
                    "dropping invalid transaction"
                );
                None
            }
        }
    }

    /// Flush every required branch, then commit the source offsets, then
    /// evict expired keys.
    ///
    /// Nothing is committed unless all required branches flushed.
    pub async fn checkpoint(&mut self) -> Result<()> {
        tokio::try_join!(
            self.raw_sink.flush(),
            self.category_sink.flush(),
            self.day_sink.flush(),
            self.month_sink.flush(),
        )?;
        if let Some(search) = &self.search_sink {
            search.flush().await?;
        }

        self.source.commit().await?;

        let evicted = self.by_category.evict_expired()
            + self.by_day.evict_expired()
            + self.by_month.evict_expired();
        PipelineStats::add(&self.stats.evicted, evicted as u64);
        PipelineStats::incr(&self.stats.checkpoints);
        self.last_checkpoint = Instant::now();

        let snapshot = self.stats.snapshot();
        tracing::debug!(
            received = snapshot.received,
            processed = snapshot.processed,
            dropped = snapshot.dropped(),
            evicted,
            category_keys = self.by_category.stats().keys,
            day_keys = self.by_day.stats().keys,
            month_keys = self.by_month.stats().keys,
            "checkpoint committed"
        );
        Ok(())
    }

    /// Consume until `cancel` fires, then shut down cleanly.
    ///
    /// On a fatal error the branches and the source are stopped without a
    /// final commit, and the error is returned.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<StatsSnapshot> {
        match self.consume(&cancel).await {
            Ok(()) => self.shutdown().await,
            Err(e) => {
                tracing::error!(error = %e, "pipeline failed, stopping without commit");
                if let Err(close_err) = self.close().await {
                    tracing::warn!(error = %close_err, "error while stopping failed pipeline");
                }
                Err(e)
            }
        }
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<()> {
        // A poll is never cancelled midway: it may already have taken records
        // off the source, and those must reach the sinks before a commit.
        while !cancel.is_cancelled() {
            if self.poll_once().await? == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_BACKOFF) => {}
                }
            }

            if self.last_checkpoint.elapsed() >= self.config.commit_interval {
                self.checkpoint().await?;
            }
        }
        Ok(())
    }

    /// Final checkpoint, then stop every branch and the source.
    pub async fn shutdown(mut self) -> Result<StatsSnapshot> {
        let checkpoint = self.checkpoint().await;
        let closed = self.close().await;
        checkpoint?;
        let snapshot = closed?;
        tracing::info!(
            received = snapshot.received,
            processed = snapshot.processed,
            malformed = snapshot.malformed,
            rejected = snapshot.rejected,
            checkpoints = snapshot.checkpoints,
            "pipeline stopped"
        );
        Ok(snapshot)
    }

    async fn close(self) -> Result<StatsSnapshot> {
        let Pipeline {
            mut source,
            raw_sink,
            category_sink,
            day_sink,
            month_sink,
            search_sink,
            stats,
            ..
        } = self;

        let mut results = vec![
            raw_sink.stop().await,
            category_sink.stop().await,
            day_sink.stop().await,
            month_sink.stop().await,
        ];
        if let Some(search) = search_sink {
            results.push(search.stop().await);
        }
        results.push(source.stop().await.map_err(Into::into));

        for result in results {
            result?;
        }
        Ok(stats.snapshot())
    }
}

fn aggregator<K: AggregationKey>(config: &PipelineConfig) -> KeyedAggregator<K> {
    KeyedAggregator::new()
        .with_replay_window(config.replay_window)
        .with_retention(config.retention)
}

fn fold<K: AggregationKey>(
    aggregator: &mut KeyedAggregator<K>,
    tx: &Transaction,
    updates: &mut Vec<AggregateUpdate<K>>,
    stats: &PipelineStats,
) {
    match aggregator.apply(tx) {
        FoldOutcome::Updated(update) => updates.push(update),
        FoldOutcome::Duplicate => PipelineStats::incr(&stats.duplicates),
        FoldOutcome::Late => PipelineStats::incr(&stats.late),
    }
}

async fn start_branch<R, S>(
    mut sink: S,
    criticality: Criticality,
    config: &PipelineConfig,
) -> Result<SinkWorker<R>>
where
    R: Send + Sync + 'static,
    S: SinkConnector<R> + 'static,
{
    sink.start().await?;
    Ok(SinkWorker::spawn(
        Box::new(sink),
        criticality,
        config.sink.batch_interval,
        config.channel_capacity,
    ))
}
