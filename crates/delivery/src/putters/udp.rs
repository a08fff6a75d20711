//! UdpPutter - one datagram per record, fire-and-forget

use bytes::Bytes;
use contracts::{ContractError, PutOutcome, RecordPutter};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, instrument, warn};

/// Configuration for UdpPutter
#[derive(Debug, Clone)]
pub struct UdpPutterConfig {
    /// Target address
    pub addr: SocketAddr,
    /// Max datagram size (UDP typically 65507 for IPv4)
    pub max_datagram_size: usize,
}

impl UdpPutterConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;

        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr_str, e))?;

        let max_datagram_size = match params.get("max_datagram_size") {
            Some(raw) => raw
                .parse()
                .map_err(|e| format!("invalid max_datagram_size '{}': {}", raw, e))?,
            None => 65000,
        };

        Ok(Self {
            addr,
            max_datagram_size,
        })
    }
}

/// Putter that sends every record as its own UDP datagram
///
/// A record is reported failed when it is too large or the send errors;
/// delivery of sent datagrams is not confirmed.
pub struct UdpPutter {
    stream: String,
    config: UdpPutterConfig,
    socket: UdpSocket,
}

impl UdpPutter {
    /// Create a new UdpPutter
    #[instrument(name = "udp_putter_new", skip(stream, config))]
    pub async fn new(stream: impl Into<String>, config: UdpPutterConfig) -> std::io::Result<Self> {
        let stream = stream.into();
        // Bind to any available port
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&config.addr).await?;

        debug!(
            stream = %stream,
            target = %config.addr,
            "UdpPutter connected"
        );

        Ok(Self {
            stream,
            config,
            socket,
        })
    }

    /// Create from params (for factory)
    pub async fn from_params(
        stream: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let stream = stream.into();
        let config = UdpPutterConfig::from_params(params)
            .map_err(|e| ContractError::sink_connection(&stream, e))?;

        Self::new(stream.clone(), config)
            .await
            .map_err(|e| ContractError::sink_connection(&stream, e.to_string()))
    }

    async fn transmit(&self, record: &[u8]) -> Result<(), ContractError> {
        if record.len() > self.config.max_datagram_size {
            return Err(ContractError::sink_write(
                &self.stream,
                format!(
                    "record of {} bytes exceeds max datagram size {}",
                    record.len(),
                    self.config.max_datagram_size
                ),
            ));
        }

        let sent = self
            .socket
            .send(record)
            .await
            .map_err(|e| ContractError::sink_write(&self.stream, e.to_string()))?;
        debug!(stream = %self.stream, bytes = sent, "Sent");
        Ok(())
    }
}

impl RecordPutter for UdpPutter {
    fn stream(&self) -> &str {
        &self.stream
    }

    async fn put_one(&self, record: Bytes) -> Result<(), ContractError> {
        self.transmit(&record).await
    }

    #[instrument(
        name = "udp_putter_put_many",
        skip(self, records),
        fields(stream = %self.stream, records = records.len())
    )]
    async fn put_many(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
        let mut failed = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            if let Err(e) = self.transmit(record).await {
                warn!(stream = %self.stream, index = idx, error = %e, "Datagram not sent");
                failed.push(idx);
            }
        }
        Ok(PutOutcome::with_failed(failed))
    }
}
