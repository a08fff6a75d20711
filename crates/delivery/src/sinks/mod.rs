//! Sink adapters without a downstream client

mod log;

pub use self::log::LogSink;
