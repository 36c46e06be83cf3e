//! Typed access to one bucket, with conflict resolution on fetch.

use crate::client::KvClient;
use crate::convert::{Converter, KeyedObject};
use crate::engine::{Engine, FetchReply};
use crate::error::KvError;
use crate::operation::OperationConfig;
use crate::resolver::ConflictResolver;
use crate::value::{Fetched, Sibling, SiblingSet};
use siblingkv_common::Location;
use std::marker::PhantomData;

pub struct Bucket<E: Engine, T, C, R> {
    client: KvClient<E>,
    name: String,
    converter: C,
    resolver: R,
    _marker: PhantomData<fn() -> T>,
}

impl<E: Engine, T, C, R> std::fmt::Debug for Bucket<E, T, C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<E, T, C, R> Bucket<E, T, C, R>
where
    E: Engine,
    C: Converter<T>,
    R: ConflictResolver<T>,
{
    pub(crate) fn new(client: KvClient<E>, name: String, converter: C, resolver: R) -> Self {
        Self {
            client,
            name,
            converter,
            resolver,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &KvClient<E> {
        &self.client
    }

    pub fn location(&self, key: &str) -> Location {
        Location::new(self.name.as_str(), key)
    }

    /// Fetch and decode a key.
    ///
    /// `None` when the key is absent. Siblings are resolved unless
    /// `config.allow_siblings` is set, in which case they are returned as is.
    pub async fn fetch(
        &self,
        key: &str,
        config: &OperationConfig,
    ) -> Result<Option<Fetched<T>>, KvError> {
        let location = self.location(key);
        let reply = self.client.fetch_raw(&location, config).await?;
        self.decode(location, reply, !config.allow_siblings)
    }

    /// Fetch a single logical value, resolving siblings regardless of
    /// `config.allow_siblings`.
    pub async fn fetch_value(
        &self,
        key: &str,
        config: &OperationConfig,
    ) -> Result<Option<T>, KvError> {
        let config = config.clone().allow_siblings(false);
        Ok(self.fetch(key, &config).await?.and_then(Fetched::into_value))
    }

    /// Encode and write a value. Returns the post-write state only when
    /// `config.return_body` is set; it is never resolved.
    pub async fn store(
        &self,
        key: &str,
        value: &T,
        config: &OperationConfig,
    ) -> Result<Option<Fetched<T>>, KvError> {
        let location = self.location(key);
        let bytes = self
            .converter
            .encode(value)
            .map_err(|source| KvError::Conversion {
                target: location.clone(),
                source,
            })?;

        let reply = self.client.store_raw(&location, bytes, config).await?;
        match reply.body {
            Some(body) if config.return_body => self.decode(location, body, false),
            _ => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str, config: &OperationConfig) -> Result<(), KvError> {
        self.client.delete_raw(&self.location(key), config).await
    }

    pub async fn keys(&self, config: &OperationConfig) -> Result<Vec<String>, KvError> {
        self.client.list_keys(&self.name, config).await
    }

    fn decode(
        &self,
        location: Location,
        reply: FetchReply,
        resolve: bool,
    ) -> Result<Option<Fetched<T>>, KvError> {
        let mut members = Vec::with_capacity(reply.versions.len());
        for raw in reply.versions {
            let value = self
                .converter
                .decode(&raw.value)
                .map_err(|source| KvError::Conversion {
                    target: location.clone(),
                    source,
                })?;
            members.push(Sibling::new(value, raw.last_modified_ms, raw.vtag));
        }

        let Some(set) = SiblingSet::new(location, reply.context, members) else {
            return Ok(None);
        };

        if !set.is_conflict() {
            let (_, context, mut members) = set.into_parts();
            return Ok(members.pop().map(|s| Fetched::Value {
                value: s.value,
                context,
            }));
        }

        let m = siblingkv_metrics::metrics();
        m.siblings_observed.inc();
        if !resolve {
            return Ok(Some(Fetched::Siblings(set)));
        }

        let context = set.context().clone();
        let count = set.len();
        match self.resolver.resolve(set) {
            Ok(value) => {
                m.conflicts_resolved.inc();
                tracing::debug!("resolved {} siblings in bucket {}", count, self.name);
                Ok(Some(Fetched::Value { value, context }))
            }
            Err(conflict) => {
                m.conflicts_unresolved.inc();
                Err(conflict.into())
            }
        }
    }
}

impl<E, T, C, R> Bucket<E, T, C, R>
where
    E: Engine,
    T: KeyedObject,
    C: Converter<T>,
    R: ConflictResolver<T>,
{
    fn object_key<'a>(&self, object: &'a T) -> Result<&'a str, KvError> {
        match object.object_key() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(KvError::NoKeySpecified {
                bucket: self.name.clone(),
                type_name: short_type_name::<T>(),
            }),
        }
    }

    /// Store an object under its own key.
    pub async fn store_object(
        &self,
        object: &T,
        config: &OperationConfig,
    ) -> Result<Option<Fetched<T>>, KvError> {
        let key = self.object_key(object)?;
        self.store(key, object, config).await
    }

    /// Fetch the stored state of the key `object` carries.
    pub async fn fetch_object(
        &self,
        object: &T,
        config: &OperationConfig,
    ) -> Result<Option<Fetched<T>>, KvError> {
        let key = self.object_key(object)?;
        self.fetch(key, config).await
    }

    pub async fn delete_object(&self, object: &T, config: &OperationConfig) -> Result<(), KvError> {
        let key = self.object_key(object)?;
        self.delete(key, config).await
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
