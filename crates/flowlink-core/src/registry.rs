//! Concurrent serializer/deserializer registries.
//!
//! Registration and lookup run concurrently from any thread; registering
//! under an occupied key replaces the previous entry (last write wins) and
//! never blocks or invalidates concurrent lookups.

use std::sync::Arc;

use dashmap::DashMap;

use flowlink_api::extensibility::{OfDeserializer, OfSerializer};
use flowlink_api::keys::{DeserializerKey, SerializerKey};

/// Lookup table from deserializer keys to codec implementations.
#[derive(Default)]
pub struct DeserializerRegistry {
    entries: DashMap<DeserializerKey, Arc<dyn OfDeserializer>>,
}

impl DeserializerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `deserializer` under `key`, replacing any previous entry.
    pub fn register(&self, key: DeserializerKey, deserializer: Arc<dyn OfDeserializer>) {
        self.entries.insert(key, deserializer);
    }

    /// Removes the entry under `key`; returns whether one existed.
    pub fn unregister(&self, key: &DeserializerKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Looks up the deserializer registered under `key`.
    pub fn get(&self, key: &DeserializerKey) -> Option<Arc<dyn OfDeserializer>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}

/// Lookup table from serializer keys to codec implementations.
#[derive(Default)]
pub struct SerializerRegistry {
    entries: DashMap<SerializerKey, Arc<dyn OfSerializer>>,
}

impl SerializerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `serializer` under `key`, replacing any previous entry.
    pub fn register(&self, key: SerializerKey, serializer: Arc<dyn OfSerializer>) {
        self.entries.insert(key, serializer);
    }

    /// Removes the entry under `key`; returns whether one existed.
    pub fn unregister(&self, key: &SerializerKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Looks up the serializer registered under `key`.
    pub fn get(&self, key: &SerializerKey) -> Option<Arc<dyn OfSerializer>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }
}
