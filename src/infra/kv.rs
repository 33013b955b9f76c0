//! Key-value cache deleter backed by Redis.
//!
//! The connection is opened lazily on first use and shared by concurrent
//! calls. I/O failures drop it so the next attempt reconnects, and so does a
//! delete that is cut off mid-flight by a timeout or cancellation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{InvalidationOutcome, InvalidationTarget};
use crate::invalidation::BackendAdapter;

pub const KV_BACKEND_NAME: &str = "kv";

/// Maps an invalidation target's cache key to the key stored in the cache.
#[derive(Clone, Default)]
pub enum KeyTransform {
    /// Use the cache key unchanged.
    #[default]
    Verbatim,
    /// Prepend a fixed namespace.
    Prefix(String),
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl KeyTransform {
    pub fn from_prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            Self::Verbatim
        } else {
            Self::Prefix(prefix.to_string())
        }
    }

    pub fn apply(&self, cache_key: &str) -> String {
        match self {
            Self::Verbatim => cache_key.to_string(),
            Self::Prefix(prefix) => format!("{prefix}{cache_key}"),
            Self::Custom(transform) => transform(cache_key),
        }
    }
}

impl fmt::Debug for KeyTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verbatim => f.write_str("Verbatim"),
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Construction options for [`KeyValueCacheDeleter`].
#[derive(Debug, Clone)]
pub struct KvOptions {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    pub key_transform: KeyTransform,
}

impl KvOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_transform: KeyTransform::Verbatim,
        }
    }
}

impl From<&crate::config::KvSettings> for KvOptions {
    fn from(settings: &crate::config::KvSettings) -> Self {
        Self {
            url: settings.connection_url(),
            key_transform: KeyTransform::from_prefix(&settings.key_prefix),
        }
    }
}

enum ClientState {
    Ready(Client),
    Unavailable(String),
}

/// Marks the cached connection stale unless the delete ran to completion.
struct InFlight<'a> {
    stale: &'a AtomicBool,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(stale: &'a AtomicBool) -> Self {
        Self { stale, armed: true }
    }

    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stale.store(true, Ordering::Release);
        }
    }
}

/// Deletes the cache entry whose key is derived from the target URL.
pub struct KeyValueCacheDeleter {
    client: ClientState,
    connection: Mutex<Option<MultiplexedConnection>>,
    stale: AtomicBool,
    key_transform: KeyTransform,
}

impl KeyValueCacheDeleter {
    /// Build the deleter. An unusable connection URL does not fail
    /// construction: the adapter reports every call as a permanent failure.
    pub fn new(options: KvOptions) -> Self {
        let client = match Client::open(options.url.as_str()) {
            Ok(client) => ClientState::Ready(client),
            Err(err) => {
                warn!(
                    target = "evictor::kv",
                    error = %err,
                    "Key-value backend unavailable"
                );
                ClientState::Unavailable(err.to_string())
            }
        };

        Self {
            client,
            connection: Mutex::new(None),
            stale: AtomicBool::new(false),
            key_transform: options.key_transform,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.client, ClientState::Ready(_))
    }

    /// Key deleted for `target`.
    pub fn key_for(&self, target: &InvalidationTarget) -> String {
        self.key_transform.apply(target.cache_key())
    }

    async fn connection(&self, client: &Client) -> Result<MultiplexedConnection, RedisError> {
        let mut slot = self.connection.lock().await;
        if self.stale.swap(false, Ordering::AcqRel) && slot.take().is_some() {
            debug!(
                target = "evictor::kv",
                "Dropping connection after an interrupted delete"
            );
        }
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let connection = client.get_multiplexed_async_connection().await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn reset_connection(&self) {
        self.connection.lock().await.take();
    }

    async fn delete(&self, client: &Client, key: &str) -> Result<u64, RedisError> {
        let mut connection = self.connection(client).await?;
        connection.del(key).await
    }
}

fn is_permanent(err: &RedisError) -> bool {
    matches!(err.kind(), ErrorKind::InvalidClientConfig | ErrorKind::TypeError)
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

#[async_trait]
impl BackendAdapter for KeyValueCacheDeleter {
    fn name(&self) -> &str {
        KV_BACKEND_NAME
    }

    async fn invalidate(&self, target: &InvalidationTarget) -> InvalidationOutcome {
        let client = match &self.client {
            ClientState::Ready(client) => client,
            ClientState::Unavailable(reason) => {
                return InvalidationOutcome::permanent(
                    target,
                    KV_BACKEND_NAME,
                    format!("key-value backend unavailable: {reason}"),
                );
            }
        };

        let key = self.key_for(target);
        let in_flight = InFlight::new(&self.stale);
        let deleted = self.delete(client, &key).await;
        in_flight.complete();

        match deleted {
            Ok(removed) => {
                debug!(
                    target = "evictor::kv",
                    key = %key,
                    removed,
                    "Cache key deleted"
                );
                InvalidationOutcome::success(target, KV_BACKEND_NAME)
            }
            Err(err) => {
                if is_connection_error(&err) {
                    self.reset_connection().await;
                }
                let message = format!("delete of `{key}` failed: {err}");
                if is_permanent(&err) {
                    InvalidationOutcome::permanent(target, KV_BACKEND_NAME, message)
                } else {
                    InvalidationOutcome::transient(target, KV_BACKEND_NAME, message)
                }
            }
        }
    }
}
