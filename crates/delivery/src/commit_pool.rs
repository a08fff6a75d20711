//! ConcurrentCommitPool - relational-store sink behind a worker pool
//!
//! 结构：
//! - N 个 worker 共享一个容量为 1 的 `async_channel`，每个 job 附带 accepted 信号，
//!   Batcher 的 flush 在某个 worker 真正取走 batch 后才返回（背压点）
//! - worker 为每个 batch 单独 spawn 一次多行 insert，并与 `operation_timeout` 赛跑
//! - 超时只记录日志，不取消 insert；insert 结束时才 resolve `BatchAck`
//! - 失败只记录与计数，不重试

use std::sync::Arc;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    Batch, BatchAck, BatchFate, BatchSink, ColumnValue, CommitPoolConfig, ContractError,
    RowInserter,
};
use observability::{record_delivery, record_operation_latency_ms, record_operation_timeout};

use crate::metrics::SinkMetrics;
use crate::row_mapper::RowMapper;

/// Worker pool sizing and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPoolOptions {
    /// Number of concurrent workers
    pub worker_pool_size: usize,
    /// How long a worker waits on one insert before reporting it stuck
    pub operation_timeout: Duration,
    /// How long `close` waits for workers to drain
    pub shutdown_grace: Duration,
}

impl Default for CommitPoolOptions {
    fn default() -> Self {
        Self {
            worker_pool_size: 5,
            operation_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

impl From<&CommitPoolConfig> for CommitPoolOptions {
    fn from(config: &CommitPoolConfig) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size,
            operation_timeout: config.operation_timeout(),
            shutdown_grace: config.operation_timeout(),
        }
    }
}

/// Where rows go
#[derive(Debug, Clone)]
pub struct TableTarget {
    pub table: String,
    pub columns: Vec<String>,
}

/// One batch travelling from the batcher to a worker
struct Job {
    rows: Vec<Vec<ColumnValue>>,
    /// Records that could not be mapped to a row
    unmapped: usize,
    ack: BatchAck,
    accepted: oneshot::Sender<()>,
}

/// State shared by every worker
struct CommitContext<I> {
    name: String,
    target: TableTarget,
    inserter: I,
    operation_timeout: Duration,
    metrics: Arc<SinkMetrics>,
}

/// Sink adapter that commits batches through a [`RowInserter`]
pub struct ConcurrentCommitPool {
    name: String,
    mapper: RowMapper,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
    metrics: Arc<SinkMetrics>,
}

impl ConcurrentCommitPool {
    /// Spawn the workers
    pub fn spawn<I>(
        name: impl Into<String>,
        inserter: I,
        mapper: RowMapper,
        target: TableTarget,
        options: CommitPoolOptions,
    ) -> Self
    where
        I: RowInserter + Sync + 'static,
    {
        let name = name.into();
        let worker_count = options.worker_pool_size.max(1);
        let metrics = Arc::new(SinkMetrics::new());
        let (tx, rx) = bounded(1);

        let context = Arc::new(CommitContext {
            name: name.clone(),
            target,
            inserter,
            operation_timeout: options.operation_timeout,
            metrics: Arc::clone(&metrics),
        });

        let workers = (0..worker_count)
            .map(|id| {
                let rx = rx.clone();
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    commit_worker(id, rx, context).await;
                })
            })
            .collect();

        info!(sink = %name, workers = worker_count, "Commit pool started");

        Self {
            name,
            mapper,
            jobs: Some(tx),
            workers,
            shutdown_grace: options.shutdown_grace,
            metrics,
        }
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Map a batch to rows, dropping records that do not fit the table
    fn map_rows(&self, batch: &Batch) -> (Vec<Vec<ColumnValue>>, usize) {
        let mut rows = Vec::with_capacity(batch.len());
        let mut unmapped = 0;
        for record in batch.records() {
            match self.mapper.map(record.payload()) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    unmapped += 1;
                    warn!(sink = %self.name, position = %record.position(), error = %e, "Record skipped");
                }
            }
        }
        (rows, unmapped)
    }
}

impl BatchSink for ConcurrentCommitPool {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "commit_pool_flush",
        skip(self, batch, ack),
        fields(sink = %self.name, records = batch.len(), seq = ack.seq())
    )]
    async fn flush(&mut self, batch: Batch, ack: BatchAck) {
        self.metrics.add_received(batch.len());
        let (rows, unmapped) = self.map_rows(&batch);
        drop(batch);

        if rows.is_empty() {
            self.metrics.add_dropped(unmapped);
            record_delivery(&self.name, 0, unmapped);
            ack.resolve(BatchFate::Dropped { dropped: unmapped });
            return;
        }

        let Some(jobs) = self.jobs.as_ref() else {
            error!(sink = %self.name, "Commit pool already closed, batch dropped");
            let dropped = rows.len() + unmapped;
            self.metrics.add_dropped(dropped);
            ack.resolve(BatchFate::Dropped { dropped });
            return;
        };

        let (accepted_tx, accepted_rx) = oneshot::channel();
        let job = Job {
            rows,
            unmapped,
            ack,
            accepted: accepted_tx,
        };

        if let Err(e) = jobs.send(job).await {
            // Every worker is gone; the job (and its ack) is dropped with the error
            error!(sink = %self.name, error = %e, "No commit worker available, batch dropped");
            self.metrics.inc_failure_count();
            return;
        }

        // Rendezvous: wait until a worker has taken the batch
        if accepted_rx.await.is_err() {
            warn!(sink = %self.name, "Batch discarded before a worker accepted it");
        }
    }

    #[instrument(name = "commit_pool_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        // Closing the hand-off lets idle workers exit
        self.jobs = None;

        let deadline = Instant::now() + self.shutdown_grace;
        let mut abandoned = 0;
        for worker in self.workers.drain(..) {
            match timeout_at(deadline, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(sink = %self.name, error = ?e, "Commit worker panicked"),
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            warn!(
                sink = %self.name,
                workers = abandoned,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Commit workers still busy at shutdown"
            );
        }
        info!(sink = %self.name, metrics = %self.metrics.snapshot(), "Commit pool closed");
        Ok(())
    }
}

/// Worker loop: one batch at a time until the hand-off closes
#[instrument(name = "commit_worker_loop", skip(rx, context), fields(sink = %context.name))]
async fn commit_worker<I>(id: usize, rx: Receiver<Job>, context: Arc<CommitContext<I>>)
where
    I: RowInserter + Sync + 'static,
{
    debug!(sink = %context.name, worker = id, "Commit worker started");

    while let Ok(job) = rx.recv().await {
        let Job {
            rows,
            unmapped,
            ack,
            accepted,
        } = job;
        let _ = accepted.send(());

        let seq = ack.seq();
        context.metrics.batch_started();
        let insert = tokio::spawn(commit(Arc::clone(&context), rows, unmapped, ack));

        match timeout(context.operation_timeout, insert).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(sink = %context.name, worker = id, seq, error = ?e, "Insert task panicked");
            }
            Err(_) => {
                let stuck = ContractError::OperationTimeout {
                    sink_name: context.name.clone(),
                    waited_ms: context.operation_timeout.as_millis() as u64,
                };
                context.metrics.inc_timeout_count();
                record_operation_timeout(&context.name);
                error!(sink = %context.name, worker = id, seq, error = %stuck, "Insert is stuck, moving on");
            }
        }
    }

    debug!(sink = %context.name, worker = id, "Commit worker stopped");
}

/// Run one insert to completion and resolve its ack
async fn commit<I>(
    context: Arc<CommitContext<I>>,
    rows: Vec<Vec<ColumnValue>>,
    unmapped: usize,
    ack: BatchAck,
) where
    I: RowInserter + Sync + 'static,
{
    let count = rows.len();
    let started = Instant::now();
    let result = context
        .inserter
        .insert_rows(&context.target.table, &context.target.columns, rows)
        .await;
    record_operation_latency_ms(&context.name, started.elapsed().as_secs_f64() * 1000.0);

    let fate = match result {
        Ok(()) => {
            context.metrics.add_sent(count);
            context.metrics.add_dropped(unmapped);
            record_delivery(&context.name, count, unmapped);
            if unmapped == 0 {
                BatchFate::Delivered
            } else {
                BatchFate::PartiallyDelivered { dropped: unmapped }
            }
        }
        Err(e) => {
            let dropped = count + unmapped;
            context.metrics.inc_failure_count();
            context.metrics.add_dropped(dropped);
            record_delivery(&context.name, 0, dropped);
            error!(sink = %context.name, rows = count, error = %e, "Insert failed");
            BatchFate::Dropped { dropped }
        }
    };

    context.metrics.batch_finished();
    ack.resolve(fate);
}
