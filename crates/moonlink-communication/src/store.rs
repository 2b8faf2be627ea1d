//! Namespaced database store
//!
//! Maps "value under (namespace, key)" onto the backend's database item
//! calls. Writes are strict and propagate every error; reads are best
//! effort and turn any failure into `None` after logging it.

use crate::rpc::client::RpcClient;
use moonlink_core::RpcError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use tracing::warn;

/// Remote method that stores an item
pub const POST_ITEM_METHOD: &str = "server.database.post_item";

/// Remote method that fetches an item
pub const GET_ITEM_METHOD: &str = "server.database.get_item";

/// An item as returned by the database calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbItem<V> {
    /// Namespace holding the item
    #[serde(default)]
    pub namespace: String,
    /// Item key
    #[serde(default)]
    pub key: String,
    /// Stored value
    pub value: V,
}

#[derive(Serialize)]
struct ItemRef<'a> {
    namespace: &'a str,
    key: &'a str,
}

#[derive(Serialize)]
struct ItemWrite<'a, V: ?Sized> {
    namespace: &'a str,
    key: &'a str,
    value: &'a V,
}

/// Key/value access to the backend database
#[derive(Debug, Clone)]
pub struct NamespacedStore {
    client: RpcClient,
}

impl NamespacedStore {
    /// Create a store on top of `client`
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    /// Store `value` under (`namespace`, `key`)
    ///
    /// Returns the backend's reply untouched, whatever its shape; every
    /// failure propagates.
    pub async fn set_value<V>(
        &self,
        namespace: &str,
        key: &str,
        value: &V,
    ) -> Result<Value, RpcError>
    where
        V: Serialize + ?Sized,
    {
        self.client
            .call::<_, Value>(
                POST_ITEM_METHOD,
                ItemWrite {
                    namespace,
                    key,
                    value,
                },
            )
            .await
    }

    /// Fetch the value under (`namespace`, `key`)
    ///
    /// Never fails: timeouts, protocol errors, transport errors and values
    /// of the wrong shape are logged and yield `None`.
    pub async fn get_value<V>(&self, namespace: &str, key: &str) -> Option<V>
    where
        V: DeserializeOwned,
    {
        match self
            .client
            .call::<_, DbItem<V>>(GET_ITEM_METHOD, ItemRef { namespace, key })
            .await
        {
            Ok(item) => Some(item.value),
            Err(e) => {
                warn!(namespace, key, error = %e, "Failed to read database item");
                None
            }
        }
    }

    /// Typed handle bound to one (`namespace`, `key`)
    pub fn entry<V>(&self, namespace: impl Into<String>, key: impl Into<String>) -> StoreEntry<V> {
        StoreEntry {
            store: self.clone(),
            namespace: namespace.into(),
            key: key.into(),
            _value: PhantomData,
        }
    }
}

/// A single database item with a fixed value type
pub struct StoreEntry<V> {
    store: NamespacedStore,
    namespace: String,
    key: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> StoreEntry<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Namespace of the entry
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the entry
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Best-effort read
    pub async fn get(&self) -> Option<V> {
        self.store.get_value(&self.namespace, &self.key).await
    }

    /// Strict write
    pub async fn set(&self, value: &V) -> Result<Value, RpcError> {
        self.store.set_value(&self.namespace, &self.key, value).await
    }
}

impl<V> Clone for StoreEntry<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            key: self.key.clone(),
            _value: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for StoreEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEntry")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .finish()
    }
}
