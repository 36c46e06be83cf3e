//! Operation executor over an [`Engine`].
//!
//! `KvClient` issues raw byte operations with quorum, retry, timeout and
//! backoff taken from an [`OperationConfig`]. Typed access with conflict
//! resolution goes through [`Bucket`].

use crate::bucket::Bucket;
use crate::convert::Converter;
use crate::engine::{Engine, EngineOp, FetchReply, PutReply, PutRequest};
use crate::error::{KvError, Target};
use crate::operation::OperationConfig;
use crate::pool::ConnectionPool;
use crate::resolver::ConflictResolver;
use crate::retry::with_retries;
use siblingkv_common::{ClientId, ClientIdError, Location};
use siblingkv_config::ClientConfig;
use std::sync::Arc;

pub struct KvClient<E: Engine> {
    engine: Arc<E>,
    client_id: ClientId,
    pool: ConnectionPool,
    defaults: OperationConfig,
}

impl<E: Engine> Clone for KvClient<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            client_id: self.client_id,
            pool: self.pool.clone(),
            defaults: self.defaults.clone(),
        }
    }
}

impl<E: Engine> std::fmt::Debug for KvClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvClient")
            .field("client_id", &self.client_id)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<E: Engine> KvClient<E> {
    /// Client with a random writer id and default settings.
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            client_id: ClientId::random(),
            pool: ConnectionPool::default(),
            defaults: OperationConfig::default(),
        }
    }

    pub fn from_config(engine: Arc<E>, config: &ClientConfig) -> Result<Self, ClientIdError> {
        let client_id = match &config.client_id {
            Some(hex) => ClientId::from_hex(hex)?,
            None => ClientId::random(),
        };
        Ok(Self {
            engine,
            client_id,
            pool: ConnectionPool::new(config.pool_size),
            defaults: OperationConfig::from_settings(&config.operation),
        })
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool = ConnectionPool::new(size);
        self
    }

    pub fn with_defaults(mut self, defaults: OperationConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Settings a caller can start from and tune per call.
    pub fn defaults(&self) -> &OperationConfig {
        &self.defaults
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Stop accepting operations. Attempts already holding a connection
    /// finish; everything else fails with [`KvError::ClientClosed`].
    pub fn close(&self) {
        tracing::debug!("client {} closed", self.client_id);
        self.pool.close();
    }

    /// Typed view of a bucket.
    pub fn bucket<T, C, R>(
        &self,
        name: impl Into<String>,
        converter: C,
        resolver: R,
    ) -> Bucket<E, T, C, R>
    where
        C: Converter<T>,
        R: ConflictResolver<T>,
    {
        Bucket::new(self.clone(), name.into(), converter, resolver)
    }

    /// Every current version of a key, undecoded.
    pub async fn fetch_raw(
        &self,
        location: &Location,
        config: &OperationConfig,
    ) -> Result<FetchReply, KvError> {
        let m = siblingkv_metrics::metrics();
        m.fetches.inc();
        let _timer = siblingkv_metrics::start_op_timer(EngineOp::Get.as_str());

        let engine = &self.engine;
        let quorum = config.rw;
        with_retries(
            &self.pool,
            EngineOp::Get,
            Target::Key(location.clone()),
            config,
            move || engine.get(location, quorum),
        )
        .await
    }

    /// Write encoded bytes.
    ///
    /// Without `config.context` the current context is read inside the same
    /// attempt, so the write supersedes whatever the engine held at that
    /// moment and only truly concurrent writers produce siblings.
    pub async fn store_raw(
        &self,
        location: &Location,
        value: Vec<u8>,
        config: &OperationConfig,
    ) -> Result<PutReply, KvError> {
        let m = siblingkv_metrics::metrics();
        m.stores.inc();
        let _timer = siblingkv_metrics::start_op_timer(EngineOp::Put.as_str());

        let engine = &self.engine;
        let writer = self.client_id;
        let quorum = config.rw;
        let return_body = config.return_body;
        let context = config.context.as_ref();

        with_retries(
            &self.pool,
            EngineOp::Put,
            Target::Key(location.clone()),
            config,
            move || {
                let value = value.clone();
                async move {
                    let context = match context {
                        Some(context) => context.clone(),
                        None => engine.get(location, quorum).await?.context,
                    };
                    engine
                        .put(PutRequest {
                            location: location.clone(),
                            value,
                            context,
                            writer,
                            quorum,
                            return_body,
                        })
                        .await
                }
            },
        )
        .await
    }

    /// Remove every version of a key. Deleting an absent key succeeds.
    pub async fn delete_raw(
        &self,
        location: &Location,
        config: &OperationConfig,
    ) -> Result<(), KvError> {
        let m = siblingkv_metrics::metrics();
        m.deletes.inc();
        let _timer = siblingkv_metrics::start_op_timer(EngineOp::Delete.as_str());

        let engine = &self.engine;
        let quorum = config.rw;
        with_retries(
            &self.pool,
            EngineOp::Delete,
            Target::Key(location.clone()),
            config,
            move || engine.delete(location, quorum),
        )
        .await
    }

    /// Keys in a bucket, in no particular order.
    pub async fn list_keys(
        &self,
        bucket: &str,
        config: &OperationConfig,
    ) -> Result<Vec<String>, KvError> {
        let m = siblingkv_metrics::metrics();
        m.key_listings.inc();
        let _timer = siblingkv_metrics::start_op_timer(EngineOp::ListKeys.as_str());

        let engine = &self.engine;
        with_retries(
            &self.pool,
            EngineOp::ListKeys,
            Target::Bucket(bucket.to_string()),
            config,
            move || engine.list_keys(bucket),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::ChaosEngine;
    use crate::cluster::{ClusterConfig, LocalCluster};
    use crate::engine::{EngineError, PutStatus};
    use crate::operation::Backoff;
    use siblingkv_storage::FsyncPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (KvClient<ChaosEngine<LocalCluster>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let cluster =
            LocalCluster::open(dir.path(), FsyncPolicy::None, ClusterConfig::default()).unwrap();
        let engine = Arc::new(ChaosEngine::passthrough(Arc::new(cluster)));
        let client = KvClient::new(engine).with_defaults(
            OperationConfig::new()
                .backoff(Backoff::None)
                .attempt_timeout(Duration::from_secs(1)),
        );
        (client, dir)
    }

    #[tokio::test]
    async fn test_store_reads_context_first() {
        let (client, _dir) = setup();
        let loc = Location::new("b", "k");

        client.store_raw(&loc, b"v1".to_vec(), client.defaults()).await.unwrap();
        let reply = client
            .store_raw(&loc, b"v2".to_vec(), client.defaults())
            .await
            .unwrap();
        assert_eq!(reply.status, PutStatus::Stored);
        assert_eq!(client.engine().calls(EngineOp::Get), 2);
        assert_eq!(client.engine().calls(EngineOp::Put), 2);

        let got = client.fetch_raw(&loc, client.defaults()).await.unwrap();
        assert_eq!(got.versions.len(), 1);
        assert_eq!(got.versions[0].value, b"v2");
    }

    #[tokio::test]
    async fn test_store_with_explicit_context_skips_read() {
        let (client, _dir) = setup();
        let loc = Location::new("b", "k");
        let config = client.defaults().clone().context(Default::default());

        client.store_raw(&loc, b"v".to_vec(), &config).await.unwrap();
        assert_eq!(client.engine().calls(EngineOp::Get), 0);
    }

    #[tokio::test]
    async fn test_delete_and_list_keys() {
        let (client, _dir) = setup();
        let d = client.defaults();
        client.store_raw(&Location::new("b", "x"), b"1".to_vec(), d).await.unwrap();
        client.store_raw(&Location::new("b", "y"), b"2".to_vec(), d).await.unwrap();

        let mut keys = client.list_keys("b", d).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["x", "y"]);

        client.delete_raw(&Location::new("b", "x"), d).await.unwrap();
        assert_eq!(client.list_keys("b", d).await.unwrap(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_operations() {
        let (client, _dir) = setup();
        let other = client.clone();
        client.close();
        let err = other
            .fetch_raw(&Location::new("b", "k"), other.defaults())
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::ClientClosed));
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let cluster =
            LocalCluster::open(dir.path(), FsyncPolicy::None, ClusterConfig::default()).unwrap();
        let mut config = ClientConfig::default();
        config.client_id = Some("0a0b0c0d".into());
        config.operation.retry = 7;

        let client = KvClient::from_config(Arc::new(cluster), &config).unwrap();
        assert_eq!(client.client_id().to_hex(), "0a0b0c0d");
        assert_eq!(client.defaults().retry, 7);

        config.client_id = Some("zz".into());
        let dir = TempDir::new().unwrap();
        let cluster =
            LocalCluster::open(dir.path(), FsyncPolicy::None, ClusterConfig::default()).unwrap();
        assert!(KvClient::from_config(Arc::new(cluster), &config).is_err());
    }

    #[tokio::test]
    async fn test_transient_read_before_write_is_retried() {
        let (client, _dir) = setup();
        client
            .engine()
            .inject(EngineOp::Get, EngineError::Unavailable("blip".into()));
        client
            .store_raw(&Location::new("b", "k"), b"v".to_vec(), client.defaults())
            .await
            .unwrap();
        assert_eq!(client.engine().calls(EngineOp::Get), 2);
        assert_eq!(client.engine().calls(EngineOp::Put), 1);
    }
}
