use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::{PeerError, Result};

/// Concurrent map from channel id to channel.
///
/// The map is allocated on first registration. At most one channel exists per
/// id: a second registration fails and leaves the first in place.
#[derive(Debug)]
pub struct ChannelRegistry<C> {
    channels: RwLock<Option<HashMap<String, C>>>,
}

impl<C> Default for ChannelRegistry<C> {
    fn default() -> Self {
        Self {
            channels: RwLock::new(None),
        }
    }
}

impl<C: Clone> ChannelRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` under `id`.
    pub fn register(&self, id: impl Into<String>, channel: C) -> Result<()> {
        let id = id.into();
        let mut guard = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let channels = guard.get_or_insert_with(HashMap::new);
        if channels.contains_key(&id) {
            return Err(PeerError::DuplicateChannel(id));
        }
        debug!(channel_id = %id, "registered channel");
        channels.insert(id, channel);
        Ok(())
    }

    /// Remove and return the channel registered under `id`.
    pub fn deregister(&self, id: &str) -> Result<C> {
        let mut guard = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let removed = guard.as_mut().and_then(|channels| channels.remove(id));
        match removed {
            Some(channel) => {
                debug!(channel_id = %id, "deregistered channel");
                Ok(channel)
            }
            None => Err(PeerError::MissingChannel(id.to_string())),
        }
    }

    /// Look up the channel registered under `id`.
    pub fn get(&self, id: &str) -> Result<C> {
        let guard = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .and_then(|channels| channels.get(id))
            .cloned()
            .ok_or_else(|| PeerError::MissingChannel(id.to_string()))
    }

    /// Returns true if a channel is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        let guard = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .is_some_and(|channels| channels.contains_key(id))
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        let guard = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let guard = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = guard
            .as_ref()
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Remove every channel for which `predicate` returns true.
    pub fn deregister_where<F>(&self, mut predicate: F) -> Vec<(String, C)>
    where
        F: FnMut(&str, &C) -> bool,
    {
        let mut guard = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(channels) = guard.as_mut() else {
            return Vec::new();
        };
        let ids: Vec<String> = channels
            .iter()
            .filter(|(id, channel)| predicate(id, channel))
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(channel) = channels.remove(&id) {
                debug!(channel_id = %id, "deregistered channel");
                removed.push((id, channel));
            }
        }
        removed
    }

    /// Remove every channel.
    pub fn drain(&self) -> Vec<(String, C)> {
        let mut guard = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<(String, C)> = guard
            .take()
            .map(|channels| channels.into_iter().collect())
            .unwrap_or_default();
        if !removed.is_empty() {
            debug!(count = removed.len(), "drained channel registry");
        }
        removed
    }
}
