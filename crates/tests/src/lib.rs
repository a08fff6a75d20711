//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - Router → Batcher → Sink → CursorTracker 的端到端测试（mock 下游）
//! - 配置驱动的 destination 构建

#[cfg(test)]
mod contract_tests {
    use contracts::{BatchPolicy, MAX_PUT_BATCH};

    #[test]
    fn test_contract_constants() {
        assert_eq!(contracts::ConfigVersion::default(), contracts::ConfigVersion::V1);
        assert_eq!(MAX_PUT_BATCH, 500);
        assert!(BatchPolicy::default().validate().is_ok());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use batcher::{Batcher, BatcherHandle, DestinationFactory, Router};
    use bytes::Bytes;
    use contracts::{
        BatchPolicy, ColumnValue, ContractError, CursorTracker, PositionToken, PutOutcome, Record,
        RecordPutter, RowInserter,
    };
    use delivery::{CommitPoolOptions, ConcurrentCommitPool, RetryingPutter, RowMapper, TableTarget};

    type Positions = Arc<Mutex<Vec<String>>>;

    fn tracker(name: &str) -> (CursorTracker, Positions) {
        let seen = Positions::default();
        let sink_seen = Arc::clone(&seen);
        let tracker = CursorTracker::new(
            name,
            Arc::new(move |p: &PositionToken| sink_seen.lock().unwrap().push(p.to_string())),
        );
        (tracker, seen)
    }

    /// Accepts every record except those starting with `bad`
    #[derive(Clone, Default)]
    struct PickyPutter {
        accepted: Arc<Mutex<Vec<Bytes>>>,
        calls: Arc<AtomicUsize>,
    }

    impl RecordPutter for PickyPutter {
        fn stream(&self) -> &str {
            "picky"
        }

        async fn put_one(&self, record: Bytes) -> Result<(), ContractError> {
            let outcome = self.put_many(std::slice::from_ref(&record)).await?;
            if outcome.is_success() {
                Ok(())
            } else {
                Err(ContractError::sink_write("picky", "record rejected"))
            }
        }

        async fn put_many(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failed = Vec::new();
            let mut accepted = self.accepted.lock().unwrap();
            for (idx, record) in records.iter().enumerate() {
                if record.starts_with(b"bad") {
                    failed.push(idx);
                } else {
                    accepted.push(record.clone());
                }
            }
            Ok(PutOutcome::with_failed(failed))
        }
    }

    /// Insert latency chosen per batch by the first row's `delay_ms` column
    #[derive(Clone, Default)]
    struct SlowInserter {
        rows: Arc<Mutex<Vec<i64>>>,
    }

    impl RowInserter for SlowInserter {
        async fn insert_rows(
            &self,
            _table: &str,
            _columns: &[String],
            rows: Vec<Vec<ColumnValue>>,
        ) -> Result<(), ContractError> {
            if let Some(ColumnValue::Int(delay)) = rows.first().and_then(|r| r.get(1)) {
                tokio::time::sleep(Duration::from_millis(*delay as u64)).await;
            }
            let mut stored = self.rows.lock().unwrap();
            for row in rows {
                if let Some(ColumnValue::Int(id)) = row.first() {
                    stored.push(*id);
                }
            }
            Ok(())
        }
    }

    /// One RetryingPutter-backed batcher per routing key
    struct PutterFactory {
        putter: PickyPutter,
        positions: Arc<Mutex<Vec<(String, Positions)>>>,
    }

    impl DestinationFactory for PutterFactory {
        async fn create(&self, name: &str) -> Result<Option<BatcherHandle>, ContractError> {
            let (tracker, seen) = tracker(name);
            self.positions
                .lock()
                .unwrap()
                .push((name.to_string(), seen));
            let sink = RetryingPutter::new(name, self.putter.clone());
            let policy = BatchPolicy::new(3, 1024, Duration::from_secs(1));
            Ok(Some(Batcher::new(name, policy, sink, tracker)?.spawn(16)))
        }
    }

    /// Router → Batcher → RetryingPutter → CursorTracker
    ///
    /// 验证：
    /// 1. 每个 routing key 独立分批
    /// 2. 被永久拒绝的记录在重试预算耗尽后丢弃
    /// 3. 丢弃不阻塞 cursor 前进
    #[tokio::test(start_paused = true)]
    async fn test_routed_putter_pipeline() {
        let putter = PickyPutter::default();
        let positions = Arc::new(Mutex::new(Vec::new()));
        let factory = PutterFactory {
            putter: putter.clone(),
            positions: Arc::clone(&positions),
        };
        let mut router = Router::new(factory);

        let input = [
            ("a1", "alpha"),
            ("b1", "beta"),
            ("bad-a2", "alpha"),
            ("a3", "alpha"),
            ("b2", "beta"),
        ];
        for (line, (payload, key)) in input.iter().enumerate() {
            router
                .send(Record::routed(*payload, line as u64 + 1, *key))
                .await
                .unwrap();
        }
        router.shutdown().await;

        let mut accepted: Vec<_> = putter
            .accepted
            .lock()
            .unwrap()
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect();
        accepted.sort();
        assert_eq!(accepted, vec!["a1", "a3", "b1", "b2"]);

        // alpha: 1 first submit + 4 resubmissions of the bad record; beta: 1
        assert_eq!(putter.calls.load(Ordering::SeqCst), 6);

        let positions = positions.lock().unwrap();
        for (name, seen) in positions.iter() {
            let last = seen.lock().unwrap().last().cloned();
            match name.as_str() {
                "alpha" => assert_eq!(last.as_deref(), Some("4")),
                "beta" => assert_eq!(last.as_deref(), Some("5")),
                other => panic!("unexpected destination {other}"),
            }
        }
    }

    /// Batcher → ConcurrentCommitPool with out-of-order completion
    ///
    /// 第一个 batch 的 insert 最慢，后续 batch 先完成；cursor 必须等第一个
    /// batch 完成后才前进，且最终位置为最后一个 batch 的位置。
    #[tokio::test(start_paused = true)]
    async fn test_commit_pool_cursor_waits_for_slow_batch() {
        let inserter = SlowInserter::default();
        let (tracker, seen) = tracker("rows");
        let pool = ConcurrentCommitPool::spawn(
            "rows",
            inserter.clone(),
            RowMapper::new(vec!["id".into(), "delay_ms".into()], false),
            TableTarget {
                table: "events".into(),
                columns: vec!["id".into(), "delay_ms".into()],
            },
            CommitPoolOptions {
                worker_pool_size: 3,
                operation_timeout: Duration::from_millis(100),
                shutdown_grace: Duration::from_secs(10),
            },
        );

        let policy = BatchPolicy::new(1, 1024, Duration::from_secs(60));
        let handle = Batcher::new("rows", policy, pool, tracker.clone())
            .unwrap()
            .spawn(8);

        let delays = [500, 10, 20];
        for (idx, delay) in delays.iter().enumerate() {
            let payload = format!(r#"{{"id": {}, "delay_ms": {}}}"#, idx, delay);
            handle.send(Record::new(payload, idx as u64 + 1)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(tracker.in_flight(), 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["3"]);

        handle.shutdown().await;
        let mut rows = inserter.rows.lock().unwrap().clone();
        rows.sort();
        assert_eq!(rows, vec![0, 1, 2]);
        assert_eq!(tracker.in_flight(), 0);
    }

    /// Interval trigger end to end: nothing flushes before max_interval
    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_delivers_pending_records() {
        let putter = PickyPutter::default();
        let (tracker, seen) = tracker("timed");
        let sink = RetryingPutter::new("timed", putter.clone());
        let policy = BatchPolicy::new(100, 1024, Duration::from_millis(200));
        let handle = Batcher::new("timed", policy, sink, tracker).unwrap().spawn(8);

        handle.send(Record::new("x", 1u64)).await.unwrap();
        handle.send(Record::new("y", 2u64)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(putter.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(putter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["2"]);

        handle.shutdown().await;
    }
}

#[cfg(test)]
mod config_tests {
    use std::sync::Arc;

    use batcher::Router;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ContractError, Record};
    use delivery::{ConfigFactory, CursorFile, CursorTarget};
    use tempfile::tempdir;

    /// Config file → ConfigFactory → Router with template retargeting and a
    /// persisted cursor
    #[tokio::test]
    async fn test_config_driven_router() {
        let dir = tempdir().unwrap();
        let toml = format!(
            r#"
[intake]
default_destination = "events"
template_destination = "events"

[[destinations]]
name = "events"
sink_type = "putter"
flush_count = 2
[destinations.putter]
kind = "file"
stream = "events"
params = {{ path = "{dir}" }}
"#,
            dir = dir.path().display()
        );
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        let cursor_path = dir.path().join("cursor.json");
        let cursor = Arc::new(CursorFile::open(&cursor_path).await.unwrap());
        let factory = ConfigFactory::new(Arc::new(config))
            .with_cursor(CursorTarget::File(Arc::clone(&cursor)));
        let mut router = Router::new(factory).with_default_destination("events");

        router.send(Record::new("e1", 1u64)).await.unwrap();
        router.send(Record::routed("o1", 2u64, "orders")).await.unwrap();
        router.send(Record::new("e2", 3u64)).await.unwrap();
        let err = router.send(Record::new("", 4u64)).await.unwrap_err();
        assert!(matches!(err, ContractError::EmptyRecord));
        router.shutdown().await;

        let events = std::fs::read_to_string(dir.path().join("events.ndjson")).unwrap();
        let orders = std::fs::read_to_string(dir.path().join("orders.ndjson")).unwrap();
        assert_eq!(events, "e1\ne2\n");
        assert_eq!(orders, "o1\n");

        assert_eq!(cursor.position("events"), Some("3".into()));
        assert_eq!(cursor.position("orders"), Some("2".into()));

        cursor.sync().await.unwrap();
        let reopened = CursorFile::open(&cursor_path).await.unwrap();
        assert_eq!(reopened.position("events"), Some("3".into()));
        assert_eq!(reopened.position("orders"), Some("2".into()));
    }
}
