//! Batcher 控制循环
//!
//! 单个 tokio 任务独占当前 batch。记录、定时 tick、显式 flush 与策略更新
//! 都经由同一个命令通道串行处理，batch 状态因此无需加锁。
//!
//! flush 规则：
//! - 追加新记录会超过 `max_bytes` 时，先 flush 当前 batch（空 batch 跳过）
//! - 追加后达到 `max_count` 或 `max_bytes` 立即 flush
//! - 定时器每 `max_interval` 触发一次，非空则 flush；每次 flush 后重置定时器
//! - 单条超限记录单独成批，不与其他记录合并

use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace};

use contracts::{Batch, BatchPolicy, BatchSink, ContractError, CursorTracker, Record};
use observability::{record_batch_flushed, record_received, DeliveryAggregator, FlushTrigger};

use crate::handle::BatcherHandle;

/// Commands accepted by the control task
pub(crate) enum Command {
    Record(Record),
    Flush(oneshot::Sender<()>),
    Configure(BatchPolicy),
}

/// Accumulation engine for one destination
pub struct Batcher<S> {
    destination: String,
    policy: BatchPolicy,
    sink: S,
    tracker: CursorTracker,
    current: Batch,
    aggregator: Option<Arc<Mutex<DeliveryAggregator>>>,
}

impl<S> Batcher<S>
where
    S: BatchSink + Send + 'static,
{
    /// Create a batcher; the policy is validated up front
    pub fn new(
        destination: impl Into<String>,
        policy: BatchPolicy,
        sink: S,
        tracker: CursorTracker,
    ) -> Result<Self, ContractError> {
        policy.validate()?;
        Ok(Self {
            destination: destination.into(),
            policy,
            sink,
            tracker,
            current: Batch::new(),
            aggregator: None,
        })
    }

    /// Share a run-wide aggregator for end-of-run summaries
    pub fn with_aggregator(mut self, aggregator: Arc<Mutex<DeliveryAggregator>>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Spawn the control task
    ///
    /// `channel_capacity` bounds the intake queue; `send` waits when it is full.
    pub fn spawn(self, channel_capacity: usize) -> BatcherHandle {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let destination = self.destination.clone();
        let tracker = self.tracker.clone();

        let task = tokio::spawn(async move {
            self.run(rx).await;
        });

        BatcherHandle::new(destination, tx, tracker, task)
    }

    #[instrument(
        name = "batcher_run",
        skip(self, rx),
        fields(destination = %self.destination)
    )]
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut ticker = new_ticker(self.policy.max_interval);
        debug!(
            destination = %self.destination,
            max_count = self.policy.max_count,
            max_bytes = self.policy.max_bytes,
            max_interval_ms = self.policy.max_interval.as_millis() as u64,
            "Batcher started"
        );

        loop {
            tokio::select! {
                biased;

                command = rx.recv() => match command {
                    Some(Command::Record(record)) => self.on_record(record, &mut ticker).await,
                    Some(Command::Flush(done)) => {
                        self.flush(FlushTrigger::Explicit, &mut ticker).await;
                        // Requester may have given up waiting
                        let _ = done.send(());
                    }
                    Some(Command::Configure(policy)) => {
                        self.on_configure(policy, &mut ticker).await;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush(FlushTrigger::Interval, &mut ticker).await;
                }
            }
        }

        self.flush(FlushTrigger::Shutdown, &mut ticker).await;
        if let Err(e) = self.sink.close().await {
            error!(
                destination = %self.destination,
                sink = %self.sink.name(),
                error = %e,
                "Sink close failed"
            );
        }

        info!(
            destination = %self.destination,
            position = ?self.tracker.position(),
            "Batcher stopped"
        );
    }

    async fn on_record(&mut self, record: Record, ticker: &mut Interval) {
        record_received(&self.destination, record.len());
        if let Some(ref aggregator) = self.aggregator {
            lock(aggregator).on_received();
        }

        if !self.current.is_empty()
            && self.current.size_bytes() + record.len() > self.policy.max_bytes
        {
            self.flush(FlushTrigger::Size, ticker).await;
        }

        self.current.push(record);
        trace!(
            destination = %self.destination,
            pending = self.current.len(),
            bytes = self.current.size_bytes(),
            "Record appended"
        );

        if let Some(trigger) = self.threshold_reached() {
            self.flush(trigger, ticker).await;
        }
    }

    async fn on_configure(&mut self, policy: BatchPolicy, ticker: &mut Interval) {
        debug!(
            destination = %self.destination,
            old = ?self.policy,
            new = ?policy,
            "Batch policy updated"
        );
        if policy.max_interval != self.policy.max_interval {
            *ticker = new_ticker(policy.max_interval);
        }
        self.policy = policy;

        // Tighter thresholds apply to what is already pending
        if let Some(trigger) = self.threshold_reached() {
            self.flush(trigger, ticker).await;
        }
    }

    fn threshold_reached(&self) -> Option<FlushTrigger> {
        if self.current.len() >= self.policy.max_count {
            Some(FlushTrigger::Count)
        } else if self.current.size_bytes() >= self.policy.max_bytes {
            Some(FlushTrigger::Size)
        } else {
            None
        }
    }

    /// Hand the pending batch to the sink; no-op when nothing is pending
    async fn flush(&mut self, trigger: FlushTrigger, ticker: &mut Interval) {
        if self.current.is_empty() {
            return;
        }

        let batch = mem::take(&mut self.current);
        let records = batch.len();
        let bytes = batch.size_bytes();
        let ack = self.tracker.issue(batch.position().cloned());

        record_batch_flushed(&self.destination, trigger, records, bytes);
        if let Some(ref aggregator) = self.aggregator {
            lock(aggregator).on_flushed(trigger, records, bytes);
        }
        debug!(
            destination = %self.destination,
            trigger = trigger.as_str(),
            seq = ack.seq(),
            records,
            bytes,
            "Flushing batch"
        );

        self.sink.flush(batch, ack).await;
        ticker.reset();
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn lock(aggregator: &Mutex<DeliveryAggregator>) -> std::sync::MutexGuard<'_, DeliveryAggregator> {
    aggregator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BatchAck, BatchFate, PositionToken};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    /// Mock sink that records every flushed batch
    #[derive(Clone, Default)]
    struct RecordingSink {
        flushed: Arc<Mutex<Vec<Vec<String>>>>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<Vec<String>> {
            self.flushed.lock().unwrap().clone()
        }
    }

    impl BatchSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn flush(&mut self, batch: Batch, ack: BatchAck) {
            let payloads = batch
                .records()
                .iter()
                .map(|r| String::from_utf8_lossy(r.payload()).into_owned())
                .collect();
            self.flushed.lock().unwrap().push(payloads);
            ack.resolve(BatchFate::Delivered);
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn policy(max_count: usize, max_bytes: usize) -> BatchPolicy {
        BatchPolicy::new(max_count, max_bytes, Duration::from_secs(1))
    }

    fn spawn(policy: BatchPolicy) -> (BatcherHandle, RecordingSink) {
        let sink = RecordingSink::default();
        let batcher = Batcher::new(
            "events",
            policy,
            sink.clone(),
            CursorTracker::detached("events"),
        )
        .unwrap();
        (batcher.spawn(100), sink)
    }

    /// Let the control task drain its queue without reaching the next tick
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn rec(payload: &'static str, position: u64) -> Record {
        Record::new(payload, position)
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_threshold_flushes_full_batch() {
        let (handle, sink) = spawn(policy(2, 1024 * 1024));

        handle.send(rec("hihi", 1)).await.unwrap();
        handle.send(rec("heyhey", 2)).await.unwrap();
        handle.send(rec("hmmhmm", 3)).await.unwrap();
        settle().await;

        assert_eq!(sink.batches(), vec![vec!["hihi", "heyhey"]]);

        handle.shutdown().await;
        assert_eq!(
            sink.batches(),
            vec![vec!["hihi", "heyhey"], vec!["hmmhmm"]]
        );
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_record_is_flushed_alone() {
        let (handle, sink) = spawn(policy(10, 8));

        handle.send(rec("hellohello", 1)).await.unwrap();
        settle().await;
        assert_eq!(sink.batches(), vec![vec!["hellohello"]]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_flushes_before_overflow() {
        let (handle, sink) = spawn(policy(10, 8));

        handle.send(rec("heyhey", 1)).await.unwrap();
        handle.send(rec("hihi", 2)).await.unwrap();
        settle().await;
        // heyhey + hihi would be 10 bytes: heyhey goes out on its own
        assert_eq!(sink.batches(), vec![vec!["heyhey"]]);

        handle.send(rec("yoyo", 3)).await.unwrap();
        settle().await;
        // hihi + yoyo hits exactly 8 bytes
        assert_eq!(sink.batches(), vec![vec!["heyhey"], vec!["hihi", "yoyo"]]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_flush_within_limits_until_interval() {
        let (handle, sink) = spawn(policy(10, 1024));

        handle.send(rec("a", 1)).await.unwrap();
        handle.send(rec("b", 2)).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        assert!(sink.batches().is_empty());

        sleep(Duration::from_millis(600)).await;
        assert_eq!(sink.batches(), vec![vec!["a", "b"]]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_restarts_after_flush() {
        let (handle, sink) = spawn(policy(2, 1024));

        handle.send(rec("a", 1)).await.unwrap();
        sleep(Duration::from_millis(900)).await;
        handle.send(rec("b", 2)).await.unwrap();
        handle.send(rec("c", 3)).await.unwrap();
        settle().await;
        assert_eq!(sink.batches(), vec![vec!["a", "b"]]);

        // The first 1s deadline has passed; c waits a full interval
        sleep(Duration::from_millis(300)).await;
        assert_eq!(sink.batches().len(), 1);

        sleep(Duration::from_millis(800)).await;
        assert_eq!(sink.batches(), vec![vec!["a", "b"], vec!["c"]]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticks_do_not_touch_sink() {
        let (handle, sink) = spawn(policy(10, 1024));

        sleep(Duration::from_secs(5)).await;
        assert!(sink.batches().is_empty());
        assert_eq!(handle.tracker().in_flight(), 0);

        handle.shutdown().await;
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush() {
        let (handle, sink) = spawn(policy(10, 1024));

        // Nothing pending: no sink call
        handle.flush().await.unwrap();
        assert!(sink.batches().is_empty());

        handle.send(rec("x", 1)).await.unwrap();
        handle.send(rec("y", 2)).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(sink.batches(), vec![vec!["x", "y"]]);

        handle.flush().await.unwrap();
        assert_eq!(sink.batches().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_record_rejected() {
        let (handle, sink) = spawn(policy(10, 1024));

        let err = handle.send(rec("", 1)).await.unwrap_err();
        assert!(matches!(err, ContractError::EmptyRecord));

        handle.shutdown().await;
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_across_batches() {
        let (handle, sink) = spawn(policy(3, 1024));

        for (i, payload) in ["r0", "r1", "r2", "r3", "r4", "r5", "r6"].iter().enumerate() {
            handle.send(rec(payload, i as u64)).await.unwrap();
        }
        handle.shutdown().await;

        let flat: Vec<String> = sink.batches().into_iter().flatten().collect();
        assert_eq!(flat, vec!["r0", "r1", "r2", "r3", "r4", "r5", "r6"]);
        assert_eq!(sink.batches().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_advances_with_flushed_batches() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let tracker = CursorTracker::new(
            "events",
            Arc::new(move |p: &PositionToken| sink_seen.lock().unwrap().push(p.to_string())),
        );
        let sink = RecordingSink::default();
        let handle = Batcher::new("events", policy(2, 1024), sink, tracker)
            .unwrap()
            .spawn(10);

        handle.send(rec("a", 11)).await.unwrap();
        handle.send(rec("b", 12)).await.unwrap();
        handle.send(rec("c", 13)).await.unwrap();
        settle().await;
        assert_eq!(handle.tracker().position(), Some("12".into()));

        handle.shutdown().await;
        assert_eq!(*seen.lock().unwrap(), vec!["12", "13"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_applies_in_order() {
        let (handle, sink) = spawn(policy(10, 1024));

        handle.send(rec("a", 1)).await.unwrap();
        handle.send(rec("b", 2)).await.unwrap();
        handle.configure(policy(2, 1024)).await.unwrap();
        settle().await;
        // Pending batch already meets the new count threshold
        assert_eq!(sink.batches(), vec![vec!["a", "b"]]);

        let invalid = handle.configure(policy(0, 1024)).await;
        assert!(invalid.unwrap_err().is_config());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregator_sees_every_flush() {
        let aggregator = Arc::new(Mutex::new(DeliveryAggregator::new()));
        let handle = Batcher::new(
            "events",
            policy(2, 1024),
            RecordingSink::default(),
            CursorTracker::detached("events"),
        )
        .unwrap()
        .with_aggregator(Arc::clone(&aggregator))
        .spawn(10);

        for i in 0..5u64 {
            handle.send(rec("payload", i)).await.unwrap();
        }
        handle.shutdown().await;

        let summary = aggregator.lock().unwrap().summary();
        assert_eq!(summary.records_received, 5);
        assert_eq!(summary.batches_flushed, 3);
        assert_eq!(summary.flushes_by_trigger.get("count"), Some(&2));
        assert_eq!(summary.flushes_by_trigger.get("shutdown"), Some(&1));
    }

    #[test]
    fn test_invalid_policy_rejected_at_construction() {
        let result = Batcher::new(
            "events",
            BatchPolicy::default().with_max_interval(Duration::ZERO),
            RecordingSink::default(),
            CursorTracker::detached("events"),
        );
        assert!(result.is_err());
    }
}
