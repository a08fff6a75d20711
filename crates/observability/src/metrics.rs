//! 投递管道指标模块
//!
//! 基于 `metrics` facade 记录 batcher / sink / cursor 的运行指标，
//! 并提供进程内聚合器用于运行结束时输出摘要。

use metrics::{counter, gauge, histogram};

/// Flush 触发原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// 达到 max_count
    Count,
    /// 达到或将超过 max_bytes
    Size,
    /// 定时器
    Interval,
    /// 显式 flush 请求
    Explicit,
    /// 关闭时的最终 flush
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Size => "size",
            Self::Interval => "interval",
            Self::Explicit => "explicit",
            Self::Shutdown => "shutdown",
        }
    }
}

/// 记录进入 batcher 的记录
pub fn record_received(destination: &str, bytes: usize) {
    counter!(
        "batchline_records_received_total",
        "destination" => destination.to_string()
    )
    .increment(1);
    counter!(
        "batchline_bytes_received_total",
        "destination" => destination.to_string()
    )
    .increment(bytes as u64);
}

/// 记录一次 batch flush
pub fn record_batch_flushed(destination: &str, trigger: FlushTrigger, records: usize, bytes: usize) {
    counter!(
        "batchline_batches_flushed_total",
        "destination" => destination.to_string(),
        "trigger" => trigger.as_str()
    )
    .increment(1);
    histogram!(
        "batchline_batch_records",
        "destination" => destination.to_string()
    )
    .record(records as f64);
    histogram!(
        "batchline_batch_bytes",
        "destination" => destination.to_string()
    )
    .record(bytes as f64);
}

/// 记录 sink 投递结果
pub fn record_delivery(sink_name: &str, sent: usize, dropped: usize) {
    if sent > 0 {
        counter!(
            "batchline_records_sent_total",
            "sink" => sink_name.to_string()
        )
        .increment(sent as u64);
    }
    if dropped > 0 {
        counter!(
            "batchline_records_dropped_total",
            "sink" => sink_name.to_string()
        )
        .increment(dropped as u64);
    }
}

/// 记录一次部分失败后的重试
pub fn record_put_retry(sink_name: &str, attempt: u32, failed: usize) {
    counter!(
        "batchline_put_retries_total",
        "sink" => sink_name.to_string()
    )
    .increment(1);
    gauge!(
        "batchline_put_retry_attempt",
        "sink" => sink_name.to_string()
    )
    .set(attempt as f64);
    histogram!(
        "batchline_put_retry_records",
        "sink" => sink_name.to_string()
    )
    .record(failed as f64);
}

/// 记录超时未完成的 sink 操作
pub fn record_operation_timeout(sink_name: &str) {
    counter!(
        "batchline_operation_timeouts_total",
        "sink" => sink_name.to_string()
    )
    .increment(1);
}

/// 记录 sink 操作耗时
pub fn record_operation_latency_ms(sink_name: &str, latency_ms: f64) {
    histogram!(
        "batchline_operation_latency_ms",
        "sink" => sink_name.to_string()
    )
    .record(latency_ms);
}

/// 记录 cursor 前进
pub fn record_cursor_advanced(destination: &str) {
    counter!(
        "batchline_cursor_advances_total",
        "destination" => destination.to_string()
    )
    .increment(1);
}

/// 投递指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DeliveryAggregator {
    /// 接收记录数
    pub records_received: u64,

    /// flush 的 batch 数
    pub batches_flushed: u64,

    /// 各触发原因的 flush 次数
    pub flushes_by_trigger: std::collections::HashMap<&'static str, u64>,

    /// batch 记录数统计
    pub batch_records: RunningStats,

    /// batch 字节数统计
    pub batch_bytes: RunningStats,
}

impl DeliveryAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录接收
    pub fn on_received(&mut self) {
        self.records_received += 1;
    }

    /// 更新 flush 统计
    pub fn on_flushed(&mut self, trigger: FlushTrigger, records: usize, bytes: usize) {
        self.batches_flushed += 1;
        *self.flushes_by_trigger.entry(trigger.as_str()).or_insert(0) += 1;
        self.batch_records.push(records as f64);
        self.batch_bytes.push(bytes as f64);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            records_received: self.records_received,
            batches_flushed: self.batches_flushed,
            flushes_by_trigger: self.flushes_by_trigger.clone(),
            batch_records: StatsSummary::from(&self.batch_records),
            batch_bytes: StatsSummary::from(&self.batch_bytes),
        }
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub records_received: u64,
    pub batches_flushed: u64,
    pub flushes_by_trigger: std::collections::HashMap<&'static str, u64>,
    pub batch_records: StatsSummary,
    pub batch_bytes: StatsSummary,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Summary ===")?;
        writeln!(f, "Records received: {}", self.records_received)?;
        writeln!(f, "Batches flushed: {}", self.batches_flushed)?;
        writeln!(f, "Batch records: {}", self.batch_records)?;
        writeln!(f, "Batch bytes: {}", self.batch_bytes)?;

        if !self.flushes_by_trigger.is_empty() {
            writeln!(f, "Flush triggers:")?;
            let mut triggers: Vec<_> = self.flushes_by_trigger.iter().collect();
            triggers.sort();
            for (trigger, count) in triggers {
                writeln!(f, "  {}: {}", trigger, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_counts_triggers() {
        let mut aggregator = DeliveryAggregator::new();
        aggregator.on_received();
        aggregator.on_received();
        aggregator.on_flushed(FlushTrigger::Count, 2, 10);
        aggregator.on_flushed(FlushTrigger::Interval, 1, 4);
        aggregator.on_flushed(FlushTrigger::Count, 2, 12);

        let summary = aggregator.summary();
        assert_eq!(summary.records_received, 2);
        assert_eq!(summary.batches_flushed, 3);
        assert_eq!(summary.flushes_by_trigger.get("count"), Some(&2));
        assert_eq!(summary.flushes_by_trigger.get("interval"), Some(&1));
        assert_eq!(summary.batch_records.count, 3);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = DeliveryAggregator::new();
        aggregator.on_flushed(FlushTrigger::Size, 1, 10);

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Batches flushed: 1"));
        assert!(output.contains("size: 1"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_received("events", 12);
        record_batch_flushed("events", FlushTrigger::Explicit, 1, 12);
        record_delivery("events", 1, 0);
        record_put_retry("events", 1, 3);
        record_operation_timeout("rows");
        record_cursor_advanced("events");
    }
}
