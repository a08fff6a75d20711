//! ConfigFactory - builds destinations from `PipelineConfig`
//!
//! Router 首次遇到某个 routing key 时调用 [`ConfigFactory::create`]：
//! 1. 按名称查找 destination；找不到时若配置了 template_destination，
//!    以模板克隆一份并把 stream 改为该 routing key
//! 2. 按 sink_type 构造 sink（dry run 一律使用 LogSink）
//! 3. 创建 CursorTracker + Batcher 并 spawn

use std::sync::{Arc, Mutex};

use tracing::{info, instrument};

use batcher::{Batcher, BatcherHandle, DestinationFactory};
use contracts::{
    BatchSink, ContractError, CursorTracker, DestinationConfig, PipelineConfig, PutterConfig,
    PutterKind, SinkType,
};
use observability::DeliveryAggregator;

use crate::error::DeliveryError;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::position::CursorTarget;
use crate::putters::{FilePutter, UdpPutter};
use crate::retrying::RetryingPutter;
use crate::sinks::LogSink;

/// Metrics of every sink created so far, in creation order
#[derive(Clone, Default)]
pub struct SinkRegistry {
    inner: Arc<Mutex<Vec<(String, Arc<SinkMetrics>)>>>,
}

impl SinkRegistry {
    fn register(&self, name: &str, metrics: Arc<SinkMetrics>) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((name.to_string(), metrics));
    }

    pub fn snapshots(&self) -> Vec<(String, MetricsSnapshot)> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
            .collect()
    }
}

/// Destination factory driven by the pipeline config
pub struct ConfigFactory {
    config: Arc<PipelineConfig>,
    cursor: CursorTarget,
    dry_run: bool,
    aggregator: Arc<Mutex<DeliveryAggregator>>,
    registry: SinkRegistry,
}

impl ConfigFactory {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            config,
            cursor: CursorTarget::default(),
            dry_run: false,
            aggregator: Arc::new(Mutex::new(DeliveryAggregator::new())),
            registry: SinkRegistry::default(),
        }
    }

    pub fn with_cursor(mut self, cursor: CursorTarget) -> Self {
        self.cursor = cursor;
        self
    }

    /// Replace every sink with a LogSink
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn aggregator(&self) -> Arc<Mutex<DeliveryAggregator>> {
        Arc::clone(&self.aggregator)
    }

    pub fn registry(&self) -> SinkRegistry {
        self.registry.clone()
    }

    /// Resolve the destination config serving `name`
    fn lookup(&self, name: &str) -> Option<DestinationConfig> {
        if let Some(dest) = self.config.destination(name) {
            return Some(dest.clone());
        }
        let template = self.config.intake.template_destination.as_deref()?;
        self.config
            .destination(template)
            .map(|dest| dest.retargeted(name))
    }

    #[instrument(
        name = "config_factory_build",
        skip(self, dest),
        fields(destination = %dest.name, sink_type = ?dest.sink_type)
    )]
    async fn build(&self, dest: &DestinationConfig) -> Result<BatcherHandle, DeliveryError> {
        if self.dry_run {
            let sink = LogSink::new(&dest.name);
            let metrics = Arc::clone(sink.metrics());
            return self.launch(dest, sink, metrics);
        }

        match dest.sink_type {
            SinkType::Log => {
                let sink = LogSink::new(&dest.name);
                let metrics = Arc::clone(sink.metrics());
                self.launch(dest, sink, metrics)
            }
            SinkType::Putter => {
                let putter = dest.putter.as_ref().ok_or_else(|| {
                    DeliveryError::sink_creation(&dest.name, "missing [putter] settings")
                })?;
                self.build_putter(dest, putter).await
            }
            SinkType::CommitPool => self.build_commit_pool(dest).await,
        }
    }

    async fn build_putter(
        &self,
        dest: &DestinationConfig,
        config: &PutterConfig,
    ) -> Result<BatcherHandle, DeliveryError> {
        match config.kind {
            PutterKind::File => {
                let putter = FilePutter::from_params(&config.stream, &config.params).await?;
                let sink = RetryingPutter::new(&dest.name, putter);
                let metrics = Arc::clone(sink.metrics());
                self.launch(dest, sink, metrics)
            }
            PutterKind::Udp => {
                let putter = UdpPutter::from_params(&config.stream, &config.params).await?;
                let sink = RetryingPutter::new(&dest.name, putter);
                let metrics = Arc::clone(sink.metrics());
                self.launch(dest, sink, metrics)
            }
            PutterKind::Firehose => self.build_firehose(dest, config).await,
        }
    }

    #[cfg(feature = "firehose")]
    async fn build_firehose(
        &self,
        dest: &DestinationConfig,
        config: &PutterConfig,
    ) -> Result<BatcherHandle, DeliveryError> {
        let putter =
            crate::putters::FirehosePutter::from_params(&config.stream, &config.params).await?;
        let sink = RetryingPutter::new(&dest.name, putter);
        let metrics = Arc::clone(sink.metrics());
        self.launch(dest, sink, metrics)
    }

    #[cfg(not(feature = "firehose"))]
    async fn build_firehose(
        &self,
        dest: &DestinationConfig,
        _config: &PutterConfig,
    ) -> Result<BatcherHandle, DeliveryError> {
        Err(DeliveryError::FeatureDisabled {
            name: dest.name.clone(),
            feature: "firehose",
        })
    }

    #[cfg(feature = "postgres")]
    async fn build_commit_pool(
        &self,
        dest: &DestinationConfig,
    ) -> Result<BatcherHandle, DeliveryError> {
        use crate::commit_pool::{CommitPoolOptions, ConcurrentCommitPool, TableTarget};
        use crate::inserters::PgRowInserter;
        use crate::row_mapper::RowMapper;

        let config = dest.commit_pool.as_ref().ok_or_else(|| {
            DeliveryError::sink_creation(&dest.name, "missing [commit_pool] settings")
        })?;

        let inserter = PgRowInserter::connect(&dest.name, config).await?;
        let mapper = RowMapper::new(config.fields.clone(), config.allow_missing_fields);
        let target = TableTarget {
            table: config.table.clone(),
            columns: config.columns.clone(),
        };
        let sink = ConcurrentCommitPool::spawn(
            &dest.name,
            inserter,
            mapper,
            target,
            CommitPoolOptions::from(config),
        );
        let metrics = Arc::clone(sink.metrics());
        self.launch(dest, sink, metrics)
    }

    #[cfg(not(feature = "postgres"))]
    async fn build_commit_pool(
        &self,
        dest: &DestinationConfig,
    ) -> Result<BatcherHandle, DeliveryError> {
        Err(DeliveryError::FeatureDisabled {
            name: dest.name.clone(),
            feature: "postgres",
        })
    }

    fn launch<S>(
        &self,
        dest: &DestinationConfig,
        sink: S,
        metrics: Arc<SinkMetrics>,
    ) -> Result<BatcherHandle, DeliveryError>
    where
        S: BatchSink + Send + 'static,
    {
        let tracker = CursorTracker::new(&dest.name, self.cursor.sink_for(&dest.name));
        let batcher = Batcher::new(&dest.name, dest.batch_policy(), sink, tracker)?
            .with_aggregator(Arc::clone(&self.aggregator));
        self.registry.register(&dest.name, metrics);

        info!(
            destination = %dest.name,
            sink_type = ?dest.sink_type,
            dry_run = self.dry_run,
            "Destination created"
        );
        Ok(batcher.spawn(self.config.intake.channel_capacity))
    }
}

impl DestinationFactory for ConfigFactory {
    async fn create(&self, name: &str) -> Result<Option<BatcherHandle>, ContractError> {
        let Some(dest) = self.lookup(name) else {
            return Ok(None);
        };
        let handle = self.build(&dest).await?;
        Ok(Some(handle))
    }
}
