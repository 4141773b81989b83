//! Subscriber bookkeeping.
//!
//! Subscribers live in an arena keyed by id; the socket and topic indices
//! hold ids, never references. An id survives disconnection with its
//! subscriptions intact and is revived by the next CONNECT carrying it.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::pattern::TokenPattern;

/// Raw descriptor of a subscriber connection; doubles as the poll token.
pub type SocketId = i32;

#[derive(Debug)]
struct SubscriberInfo {
    socket: Option<SocketId>,
    topics: HashSet<TokenPattern>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("subscriber id {0:?} is already connected")]
    AlreadyConnected(String),

    #[error("no subscriber connected on socket {0}")]
    NotConnected(SocketId),
}

#[derive(Default)]
pub struct SubscribersRegistry {
    subscribers: HashMap<String, SubscriberInfo>,
    by_socket: HashMap<SocketId, String>,
    by_topic: HashMap<TokenPattern, HashSet<String>>,
}

impl SubscribersRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A known but disconnected id is revived with
    /// its retained subscriptions; a connected one is rejected.
    pub fn connect(&mut self, socket: SocketId, id: &str) -> Result<(), RegistryError> {
        match self.subscribers.get_mut(id) {
            Some(info) if info.socket.is_some() => {
                return Err(RegistryError::AlreadyConnected(id.to_string()));
            }
            Some(info) => info.socket = Some(socket),
            None => {
                self.subscribers.insert(
                    id.to_string(),
                    SubscriberInfo {
                        socket: Some(socket),
                        topics: HashSet::new(),
                    },
                );
            }
        }
        self.by_socket.insert(socket, id.to_string());
        Ok(())
    }

    /// Clear the socket of whoever is connected on it; id and topics stay.
    /// A no-op for unknown sockets.
    pub fn disconnect(&mut self, socket: SocketId) {
        let Some(id) = self.by_socket.remove(&socket) else {
            return;
        };
        if let Some(info) = self.subscribers.get_mut(&id) {
            info.socket = None;
        }
    }

    pub fn is_connected(&self, socket: SocketId) -> bool {
        self.by_socket.contains_key(&socket)
    }

    pub fn id_for(&self, socket: SocketId) -> Option<&str> {
        self.by_socket.get(&socket).map(String::as_str)
    }

    pub fn subscribe(
        &mut self,
        socket: SocketId,
        topic: TokenPattern,
    ) -> Result<(), RegistryError> {
        let id = self
            .by_socket
            .get(&socket)
            .ok_or(RegistryError::NotConnected(socket))?
            .clone();
        if let Some(info) = self.subscribers.get_mut(&id) {
            info.topics.insert(topic.clone());
        }
        self.by_topic.entry(topic).or_default().insert(id);
        Ok(())
    }

    pub fn unsubscribe(
        &mut self,
        socket: SocketId,
        topic: &TokenPattern,
    ) -> Result<(), RegistryError> {
        let id = self
            .by_socket
            .get(&socket)
            .ok_or(RegistryError::NotConnected(socket))?
            .clone();
        if let Some(info) = self.subscribers.get_mut(&id) {
            info.topics.remove(topic);
        }
        if let Some(ids) = self.by_topic.get_mut(topic) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_topic.remove(topic);
            }
        }
        Ok(())
    }

    /// Sockets of every connected subscriber holding a pattern that
    /// matches the (wildcard-free) incoming topic.
    pub fn matching_sockets(&self, topic: &TokenPattern) -> HashSet<SocketId> {
        let mut sockets = HashSet::new();
        for (pattern, ids) in &self.by_topic {
            if !pattern.matches(topic) {
                continue;
            }
            for id in ids {
                if let Some(info) = self.subscribers.get(id) {
                    if let Some(socket) = info.socket {
                        sockets.insert(socket);
                    }
                }
            }
        }
        sockets
    }

    /// Patterns held by an id, connected or not.
    pub fn topics_of(&self, id: &str) -> Option<&HashSet<TokenPattern>> {
        self.subscribers.get(id).map(|info| &info.topics)
    }

    #[cfg(test)]
    fn tracked_patterns(&self) -> usize {
        self.by_topic.len()
    }
}
