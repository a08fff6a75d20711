//! FirehosePutter - Kinesis Data Firehose delivery stream

use aws_sdk_firehose::error::DisplayErrorContext;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record as FirehoseRecord;
use aws_sdk_firehose::Client;
use bytes::Bytes;
use contracts::{ContractError, PutOutcome, RecordPutter};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Putter backed by `PutRecord` / `PutRecordBatch`
///
/// Rejected entries are reported by index; nothing is retried here.
pub struct FirehosePutter {
    client: Client,
    stream: String,
}

impl FirehosePutter {
    pub fn new(client: Client, stream: impl Into<String>) -> Self {
        Self {
            client,
            stream: stream.into(),
        }
    }

    /// Build a client from the ambient AWS environment
    ///
    /// - Default: standard AWS resolution (region/creds from env/config/role).
    /// - Optional `region` param overrides the resolved region.
    /// - Optional `endpoint_url` param targets a local emulator.
    #[instrument(name = "firehose_putter_from_params", skip(params))]
    pub async fn from_params(
        stream: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = params.get("region") {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_firehose::config::Builder::from(&shared);
        if let Some(url) = params.get("endpoint_url") {
            builder = builder.endpoint_url(url);
        }

        info!(stream = %stream, region = ?shared.region(), "Firehose client configured");
        Ok(Self::new(Client::from_conf(builder.build()), stream))
    }

    fn entry(&self, data: &Bytes) -> Result<FirehoseRecord, ContractError> {
        FirehoseRecord::builder()
            .data(Blob::new(data.to_vec()))
            .build()
            .map_err(|e| ContractError::sink_write(&self.stream, e.to_string()))
    }
}

impl RecordPutter for FirehosePutter {
    fn stream(&self) -> &str {
        &self.stream
    }

    async fn put_one(&self, record: Bytes) -> Result<(), ContractError> {
        self.client
            .put_record()
            .delivery_stream_name(&self.stream)
            .record(self.entry(&record)?)
            .send()
            .await
            .map_err(|e| ContractError::sink_write(&self.stream, DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    #[instrument(
        name = "firehose_putter_put_many",
        skip(self, records),
        fields(stream = %self.stream, records = records.len())
    )]
    async fn put_many(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
        let entries = records
            .iter()
            .map(|r| self.entry(r))
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_record_batch()
            .delivery_stream_name(&self.stream)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(|e| ContractError::sink_write(&self.stream, DisplayErrorContext(&e).to_string()))?;

        if output.failed_put_count() == 0 {
            return Ok(PutOutcome::success());
        }

        let failed: Vec<usize> = output
            .request_responses()
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.error_code().is_some_and(|code| !code.is_empty()))
            .map(|(idx, _)| idx)
            .collect();
        debug!(
            stream = %self.stream,
            failed = failed.len(),
            reported = output.failed_put_count(),
            "PutRecordBatch partially rejected"
        );
        Ok(PutOutcome::with_failed(failed))
    }
}
