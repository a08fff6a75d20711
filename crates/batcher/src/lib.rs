//! # Batcher
//!
//! 记录累积与 flush 调度模块。
//!
//! 负责：
//! - 按条数 / 字节数 / 时间间隔 / 显式请求切分 batch
//! - 把 batch 连同 `BatchAck` 交给 sink，自身不做重试
//! - 按 routing key 为每个 destination 维护独立的 Batcher + Sink
//!
//! # Example
//!
//! ```ignore
//! use batcher::Batcher;
//! use contracts::{BatchPolicy, CursorTracker, Record};
//!
//! let handle = Batcher::new("events", BatchPolicy::default(), sink, CursorTracker::detached("events"))?
//!     .spawn(100);
//! handle.send(Record::new("payload", 1u64)).await?;
//! handle.shutdown().await;
//! ```

mod engine;
mod handle;
mod router;

pub use contracts::{BatchPolicy, BatchSink, Record};
pub use engine::Batcher;
pub use handle::BatcherHandle;
pub use router::{DestinationFactory, LocalDestinationFactory, Router};
