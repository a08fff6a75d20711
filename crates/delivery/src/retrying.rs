//! RetryingPutter - streaming-ingestion sink with partial-failure retry
//!
//! 每个 batch 按 [`MAX_PUT_BATCH`] 切块，各块独立重试：
//! - 只重新提交服务端报告失败的记录（按下标提取）
//! - 重试前等待 `delay`，从 250ms 开始每次翻倍，总共最多 5 次尝试
//! - 传输层错误视为整块失败，消耗同一份重试预算
//! - 预算耗尽仍有失败时，该块剩余记录被丢弃并报告 terminal error

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    Batch, BatchAck, BatchFate, BatchSink, ContractError, PutOutcome, Record, RecordPutter,
    MAX_PUT_BATCH,
};
use observability::{record_delivery, record_put_retry};

use crate::metrics::SinkMetrics;

/// Backoff schedule for partial failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, the first submission included
    pub max_attempts: u32,
    /// Wait before the first resubmission; doubles afterwards
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before resubmitting after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Sink adapter that delivers batches through a [`RecordPutter`]
pub struct RetryingPutter<P> {
    name: String,
    putter: P,
    policy: RetryPolicy,
    metrics: Arc<SinkMetrics>,
}

impl<P> RetryingPutter<P>
where
    P: RecordPutter + Sync,
{
    pub fn new(name: impl Into<String>, putter: P) -> Self {
        Self {
            name: name.into(),
            putter,
            policy: RetryPolicy::default(),
            metrics: Arc::new(SinkMetrics::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    pub fn putter(&self) -> &P {
        &self.putter
    }

    /// Deliver a batch of payloads, returning how many were dropped
    pub async fn put_all(&self, payloads: &[Bytes]) -> usize {
        let mut dropped = 0;
        for chunk in payloads.chunks(MAX_PUT_BATCH) {
            if let Err(e) = self.put_chunk(chunk).await {
                let lost = match &e {
                    ContractError::TerminalBatchFailure { dropped, .. } => *dropped,
                    _ => chunk.len(),
                };
                dropped += lost;
                error!(sink = %self.name, stream = %self.putter.stream(), error = %e, "Chunk dropped");
            }
        }
        dropped
    }

    /// Submit one chunk, resubmitting failed records until the budget runs out
    async fn put_chunk(&self, chunk: &[Bytes]) -> Result<(), ContractError> {
        let mut pending: Vec<Bytes> = chunk.to_vec();
        let mut attempt: u32 = 1;

        loop {
            let failed = match self.submit(&pending).await {
                Ok(outcome) => failed_records(&pending, &outcome),
                Err(e) => {
                    self.metrics.inc_failure_count();
                    warn!(
                        sink = %self.name,
                        attempt,
                        records = pending.len(),
                        error = %e,
                        "Put call failed"
                    );
                    pending.clone()
                }
            };

            if failed.is_empty() {
                if attempt > 1 {
                    debug!(sink = %self.name, attempt, "Chunk delivered after retry");
                }
                return Ok(());
            }

            if attempt >= self.policy.max_attempts {
                return Err(ContractError::terminal(
                    &self.name,
                    failed.len(),
                    format!(
                        "too many retries, failed to put {} records after {} attempts -- stream: {}",
                        failed.len(),
                        attempt,
                        self.putter.stream()
                    ),
                ));
            }

            let partial = ContractError::PartialBatchFailure {
                sink_name: self.name.clone(),
                failed: failed.len(),
                total: pending.len(),
            };
            let delay = self.policy.backoff(attempt);
            warn!(
                sink = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %partial,
                "Retrying failed records"
            );
            self.metrics.inc_retry_count();
            record_put_retry(&self.name, attempt, failed.len());

            sleep(delay).await;
            pending = failed;
            attempt += 1;
        }
    }

    async fn submit(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
        match records {
            [single] => self
                .putter
                .put_one(single.clone())
                .await
                .map(|()| PutOutcome::success()),
            _ => self.putter.put_many(records).await,
        }
    }
}

/// Records the server rejected, in submission order
fn failed_records(submitted: &[Bytes], outcome: &PutOutcome) -> Vec<Bytes> {
    let mut indices = outcome.failed.clone();
    indices.sort_unstable();
    indices.dedup();
    indices
        .into_iter()
        .filter_map(|idx| submitted.get(idx).cloned())
        .collect()
}

impl<P> BatchSink for RetryingPutter<P>
where
    P: RecordPutter + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "retrying_putter_flush",
        skip(self, batch, ack),
        fields(sink = %self.name, records = batch.len(), seq = ack.seq())
    )]
    async fn flush(&mut self, batch: Batch, ack: BatchAck) {
        let total = batch.len();
        self.metrics.add_received(total);

        let payloads: Vec<Bytes> = batch
            .into_records()
            .into_iter()
            .map(Record::into_payload)
            .collect();
        let dropped = self.put_all(&payloads).await;
        let sent = total - dropped;

        self.metrics.add_sent(sent);
        self.metrics.add_dropped(dropped);
        record_delivery(&self.name, sent, dropped);

        let fate = if dropped == 0 {
            BatchFate::Delivered
        } else if sent == 0 {
            BatchFate::Dropped { dropped }
        } else {
            BatchFate::PartiallyDelivered { dropped }
        };
        debug!(sink = %self.name, sent, dropped, fate = fate.as_str(), "Batch resolved");
        ack.resolve(fate);
    }

    #[instrument(name = "retrying_putter_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(
            sink = %self.name,
            stream = %self.putter.stream(),
            metrics = %self.metrics.snapshot(),
            "RetryingPutter closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CursorTracker, PositionToken};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Scripted outcome for one `put_many` / `put_one` call
    enum Step {
        Fail(Vec<usize>),
        Transport,
    }

    /// Mock putter replaying scripted outcomes; succeeds once the script runs out
    #[derive(Default)]
    struct ScriptedPutter {
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(Instant, Vec<String>)>>,
        always_fail: bool,
    }

    impl ScriptedPutter {
        fn with_script(steps: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                always_fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, records)| records.clone())
                .collect()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        fn respond(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
            let seen = records
                .iter()
                .map(|r| String::from_utf8_lossy(r).into_owned())
                .collect();
            self.calls.lock().unwrap().push((Instant::now(), seen));

            if self.always_fail {
                return Ok(PutOutcome::with_failed((0..records.len()).collect()));
            }
            match self.script.lock().unwrap().pop_front() {
                Some(Step::Fail(failed)) => Ok(PutOutcome::with_failed(failed)),
                Some(Step::Transport) => Err(ContractError::sink_write("scripted", "connection reset")),
                None => Ok(PutOutcome::success()),
            }
        }
    }

    impl RecordPutter for ScriptedPutter {
        fn stream(&self) -> &str {
            "scripted"
        }

        async fn put_one(&self, record: Bytes) -> Result<(), ContractError> {
            let outcome = self.respond(std::slice::from_ref(&record))?;
            if outcome.is_success() {
                Ok(())
            } else {
                Err(ContractError::sink_write("scripted", "record rejected"))
            }
        }

        async fn put_many(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
            self.respond(records)
        }
    }

    fn payloads(items: &[&'static str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from_static(s.as_bytes())).collect()
    }

    #[test]
    fn test_backoff_doubles_from_250ms() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=4).map(|a| policy.backoff(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmits_only_failed_records() {
        let putter = RetryingPutter::new(
            "events",
            ScriptedPutter::with_script(vec![Step::Fail(vec![1, 3])]),
        );

        let dropped = putter.put_all(&payloads(&["a", "b", "c", "d"])).await;
        assert_eq!(dropped, 0);

        let inner = putter.putter();
        assert_eq!(
            inner.calls(),
            vec![vec!["a", "b", "c", "d"], vec!["b", "d"]]
        );
        let times = inner.call_times();
        assert!(times[1] - times[0] >= Duration::from_millis(250));
        assert_eq!(putter.metrics().retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_five_attempts() {
        let putter = RetryingPutter::new("events", ScriptedPutter::failing());

        let dropped = putter.put_all(&payloads(&["a", "b"])).await;
        assert_eq!(dropped, 2);

        let inner = putter.putter();
        assert_eq!(inner.calls().len(), 5);

        let times = inner.call_times();
        let expected = [250u64, 500, 1000, 2000];
        for (gap, want) in times.windows(2).map(|w| w[1] - w[0]).zip(expected) {
            assert!(gap >= Duration::from_millis(want), "gap {gap:?} < {want}ms");
            assert!(gap < Duration::from_millis(want + 50), "gap {gap:?} >> {want}ms");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_reports_remaining_records() {
        let putter = RetryingPutter::new("events", ScriptedPutter::failing());

        let err = putter
            .put_chunk(&payloads(&["a", "b", "c"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::TerminalBatchFailure { dropped: 3, ref sink_name, .. } if sink_name == "events"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_uses_same_budget() {
        let putter = RetryingPutter::new(
            "events",
            ScriptedPutter::with_script(vec![Step::Transport, Step::Fail(vec![0])]),
        );

        let dropped = putter.put_all(&payloads(&["a", "b"])).await;
        assert_eq!(dropped, 0);
        assert_eq!(
            putter.putter().calls(),
            vec![vec!["a", "b"], vec!["a", "b"], vec!["a"]]
        );
        assert_eq!(putter.metrics().failure_count(), 1);
        assert_eq!(putter.metrics().retry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_batch_split_into_chunks() {
        let putter = RetryingPutter::new("events", ScriptedPutter::default());
        let records: Vec<Bytes> = (0..1201).map(|i| Bytes::from(i.to_string())).collect();

        let dropped = putter.put_all(&records).await;
        assert_eq!(dropped, 0);

        let sizes: Vec<usize> = putter.putter().calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![500, 500, 201]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_resolves_ack_with_fate() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let tracker = CursorTracker::new(
            "events",
            Arc::new(move |p: &PositionToken| sink_seen.lock().unwrap().push(p.to_string())),
        );

        let mut putter = RetryingPutter::new("events", ScriptedPutter::failing());
        let batch: Batch = vec![Record::new("a", 1u64), Record::new("b", 2u64)]
            .into_iter()
            .collect();
        let ack = tracker.issue(batch.position().cloned());

        putter.flush(batch, ack).await;

        // Dropped batches still advance the cursor
        assert_eq!(*seen.lock().unwrap(), vec!["2"]);
        let snapshot = putter.metrics().snapshot();
        assert_eq!(snapshot.received_count, 2);
        assert_eq!(snapshot.dropped_count, 2);
        assert_eq!(snapshot.sent_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_record_uses_put_one() {
        let putter = RetryingPutter::new(
            "events",
            ScriptedPutter::with_script(vec![Step::Fail(vec![0])]),
        );

        let dropped = putter.put_all(&payloads(&["only"])).await;
        assert_eq!(dropped, 0);
        assert_eq!(putter.putter().calls(), vec![vec!["only"], vec!["only"]]);
    }
}
