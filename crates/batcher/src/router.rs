//! Router - routing key to destination batcher
//!
//! 每个 routing key 拥有独立的 Batcher + Sink，首次出现时通过
//! [`DestinationFactory`] 懒创建。无 routing key 的记录进入默认 destination。

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use contracts::{ContractError, Record};

use crate::handle::BatcherHandle;

/// Builds the batcher for a destination on first use
#[trait_variant::make(DestinationFactory: Send)]
pub trait LocalDestinationFactory {
    /// `Ok(None)` means no destination can serve `name`
    async fn create(&self, name: &str) -> Result<Option<BatcherHandle>, ContractError>;
}

/// Fans records out to per-destination batchers
pub struct Router<F> {
    factory: F,
    default_destination: Option<String>,
    handles: HashMap<String, BatcherHandle>,
}

impl<F: DestinationFactory> Router<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            default_destination: None,
            handles: HashMap::new(),
        }
    }

    /// Destination for records without a routing key
    pub fn with_default_destination(mut self, name: impl Into<String>) -> Self {
        self.default_destination = Some(name.into());
        self
    }

    /// Route one record, creating its destination if needed
    pub async fn send(&mut self, record: Record) -> Result<(), ContractError> {
        if record.is_empty() {
            return Err(ContractError::EmptyRecord);
        }

        let key = match record
            .routing_key()
            .or(self.default_destination.as_deref())
        {
            Some(key) => key.to_string(),
            None => {
                return Err(ContractError::UnknownDestination {
                    key: String::from("<none>"),
                })
            }
        };

        let handle = self.resolve(&key).await?;
        handle.send(record).await
    }

    /// Create the destination eagerly (configured destinations at startup)
    pub async fn open(&mut self, name: &str) -> Result<(), ContractError> {
        self.resolve(name).await.map(|_| ())
    }

    async fn resolve(&mut self, key: &str) -> Result<&BatcherHandle, ContractError> {
        if !self.handles.contains_key(key) {
            let handle = self.factory.create(key).await?.ok_or_else(|| {
                warn!(key = %key, "No destination for routing key");
                ContractError::UnknownDestination {
                    key: key.to_string(),
                }
            })?;
            info!(destination = %key, "Destination opened");
            self.handles.insert(key.to_string(), handle);
        }

        self.handles
            .get(key)
            .ok_or_else(|| ContractError::UnknownDestination {
                key: key.to_string(),
            })
    }

    pub fn handle(&self, name: &str) -> Option<&BatcherHandle> {
        self.handles.get(name)
    }

    /// Names of the destinations opened so far
    pub fn destinations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Flush every destination
    #[instrument(name = "router_flush_all", skip(self), fields(destinations = self.handles.len()))]
    pub async fn flush_all(&self) -> Result<(), ContractError> {
        for handle in self.handles.values() {
            handle.flush().await?;
        }
        Ok(())
    }

    /// Flush and close every destination
    #[instrument(name = "router_shutdown", skip(self), fields(destinations = self.handles.len()))]
    pub async fn shutdown(self) {
        for (name, handle) in self.handles {
            debug!(destination = %name, "Shutting down destination");
            handle.shutdown().await;
        }
        info!("Router shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Batcher;
    use contracts::{Batch, BatchAck, BatchFate, BatchPolicy, BatchSink, CursorTracker};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Flushed = Arc<Mutex<Vec<(String, usize)>>>;

    struct TaggingSink {
        name: String,
        flushed: Flushed,
    }

    impl BatchSink for TaggingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn flush(&mut self, batch: Batch, ack: BatchAck) {
            self.flushed
                .lock()
                .unwrap()
                .push((self.name.clone(), batch.len()));
            ack.resolve(BatchFate::Delivered);
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    /// Serves any name listed in `known`
    struct StaticFactory {
        known: Vec<&'static str>,
        flushed: Flushed,
        created: Arc<Mutex<Vec<String>>>,
    }

    impl DestinationFactory for StaticFactory {
        async fn create(&self, name: &str) -> Result<Option<BatcherHandle>, ContractError> {
            if !self.known.iter().any(|known| *known == name) {
                return Ok(None);
            }
            self.created.lock().unwrap().push(name.to_string());
            let sink = TaggingSink {
                name: name.to_string(),
                flushed: Arc::clone(&self.flushed),
            };
            let policy = BatchPolicy::new(100, 1024, Duration::from_secs(1));
            let batcher = Batcher::new(name, policy, sink, CursorTracker::detached(name))?;
            Ok(Some(batcher.spawn(10)))
        }
    }

    fn factory(known: Vec<&'static str>) -> (StaticFactory, Flushed, Arc<Mutex<Vec<String>>>) {
        let flushed = Flushed::default();
        let created = Arc::new(Mutex::new(Vec::new()));
        let factory = StaticFactory {
            known,
            flushed: Arc::clone(&flushed),
            created: Arc::clone(&created),
        };
        (factory, flushed, created)
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_split_by_routing_key() {
        let (factory, flushed, created) = factory(vec!["clicks", "views"]);
        let mut router = Router::new(factory);

        router.send(Record::routed("a", 1u64, "clicks")).await.unwrap();
        router.send(Record::routed("b", 2u64, "views")).await.unwrap();
        router.send(Record::routed("c", 3u64, "clicks")).await.unwrap();

        assert_eq!(router.destinations(), vec!["clicks", "views"]);
        assert_eq!(created.lock().unwrap().len(), 2);

        router.flush_all().await.unwrap();
        let mut seen = flushed.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![("clicks".to_string(), 2), ("views".to_string(), 1)]
        );

        router.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrouted_records_use_default() {
        let (factory, flushed, _) = factory(vec!["events"]);
        let mut router = Router::new(factory).with_default_destination("events");

        router.send(Record::new("a", 1u64)).await.unwrap();
        router.shutdown().await;

        assert_eq!(
            *flushed.lock().unwrap(),
            vec![("events".to_string(), 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_destination_rejected() {
        let (factory, _, _) = factory(vec!["events"]);
        let mut router = Router::new(factory);

        let err = router
            .send(Record::routed("a", 1u64, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::UnknownDestination { ref key } if key == "nope"));

        let err = router.send(Record::new("a", 2u64)).await.unwrap_err();
        assert!(matches!(err, ContractError::UnknownDestination { .. }));
        assert!(router.destinations().is_empty());

        router.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_record_rejected_before_routing() {
        let (factory, _, created) = factory(vec!["events"]);
        let mut router = Router::new(factory);

        let err = router
            .send(Record::routed("", 1u64, "events"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::EmptyRecord));

        let err = router
            .send(Record::routed("", 2u64, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::EmptyRecord));

        assert!(created.lock().unwrap().is_empty());
        assert!(router.destinations().is_empty());

        router.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_creates_destination_once() {
        let (factory, _, created) = factory(vec!["events"]);
        let mut router = Router::new(factory);

        router.open("events").await.unwrap();
        router.send(Record::routed("a", 1u64, "events")).await.unwrap();
        assert_eq!(*created.lock().unwrap(), vec!["events"]);
        assert!(router.handle("events").is_some());

        router.shutdown().await;
    }
}
