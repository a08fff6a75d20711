//! RecordPutter implementations
//!
//! Contains FilePutter, UdpPutter and (with the `firehose` feature)
//! FirehosePutter.

mod file;
#[cfg(feature = "firehose")]
mod firehose;
mod udp;

pub use self::file::{FilePutter, FilePutterConfig};
#[cfg(feature = "firehose")]
pub use self::firehose::FirehosePutter;
pub use self::udp::{UdpPutter, UdpPutterConfig};
