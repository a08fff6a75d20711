//! Run statistics.

use std::time::Duration;

use delivery::MetricsSnapshot;
use observability::DeliverySummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Input lines consumed (blank lines included)
    pub lines_read: u64,

    /// Records refused at send time (empty or unroutable)
    pub records_rejected: u64,

    /// Whether the run stopped on a shutdown signal rather than end of input
    pub interrupted: bool,

    /// Total duration of the run
    pub duration: Duration,

    /// Batcher-side aggregate
    pub delivery: DeliverySummary,

    /// Per-sink counters, in destination creation order
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

impl RunStats {
    /// Records handed to the pipeline per second
    pub fn records_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.delivery.records_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.sinks.iter().map(|(_, s)| s.sent_count).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.sinks.iter().map(|(_, s)| s.dropped_count).sum()
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Summary ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Lines read: {}", self.lines_read);
        println!("Records rejected: {}", self.records_rejected);
        println!("Records/s: {:.2}", self.records_per_sec());
        if self.interrupted {
            println!("Stopped by shutdown signal");
        }

        println!("\n{}", self.delivery);

        if !self.sinks.is_empty() {
            println!("Sinks ({}):", self.sinks.len());
            for (name, snapshot) in &self.sinks {
                println!("  - {}: {}", name, snapshot);
            }
            println!(
                "  total: sent={} dropped={}",
                self.total_sent(),
                self.total_dropped()
            );
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_across_sinks() {
        let stats = RunStats {
            sinks: vec![
                (
                    "a".to_string(),
                    MetricsSnapshot {
                        sent_count: 3,
                        dropped_count: 1,
                        ..Default::default()
                    },
                ),
                (
                    "b".to_string(),
                    MetricsSnapshot {
                        sent_count: 4,
                        ..Default::default()
                    },
                ),
            ],
            ..Default::default()
        };

        assert_eq!(stats.total_sent(), 7);
        assert_eq!(stats.total_dropped(), 1);
        assert_eq!(stats.records_per_sec(), 0.0);
    }
}
