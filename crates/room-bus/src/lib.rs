use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub from: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room channel closed")]
    Closed,
    #[error("not connected to a room")]
    NotConnected,
    #[error("no peer '{0}' in the room")]
    UnknownPeer(String),
}

pub type RoomResult<T> = Result<T, RoomError>;

/// A peer-to-peer messaging room as seen by one member. `user_id` is the
/// identity the transport assigned on join; it is `None` until the room is
/// actually connected.
pub trait RoomChannel: Send + Sync {
    fn user_id(&self) -> Option<String>;
    fn is_connected(&self) -> bool;
    fn send(&self, peer: &str, payload: Bytes) -> RoomResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<RoomMessage>;
}

/// In-memory room for tests and loopback wiring.
#[derive(Debug, Default)]
pub struct LocalRoomHub {
    members: RwLock<HashMap<String, broadcast::Sender<RoomMessage>>>,
}

impl LocalRoomHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(self: &Arc<Self>, user_id: impl Into<String>) -> LocalRoom {
        let user_id = user_id.into();
        self.sender_entry(&user_id);
        LocalRoom {
            hub: Arc::clone(self),
            user_id,
        }
    }

    fn sender_entry(&self, member: &str) -> broadcast::Sender<RoomMessage> {
        let mut guard = self.members.write();
        guard
            .entry(member.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn sender_for(&self, member: &str) -> Option<broadcast::Sender<RoomMessage>> {
        self.members.read().get(member).cloned()
    }
}

/// One member's handle onto a [`LocalRoomHub`].
#[derive(Debug, Clone)]
pub struct LocalRoom {
    hub: Arc<LocalRoomHub>,
    user_id: String,
}

impl RoomChannel for LocalRoom {
    fn user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn send(&self, peer: &str, payload: Bytes) -> RoomResult<()> {
        let sender = self
            .hub
            .sender_for(peer)
            .ok_or_else(|| RoomError::UnknownPeer(peer.to_string()))?;
        sender
            .send(RoomMessage {
                from: self.user_id.clone(),
                payload,
            })
            .map(|_| ())
            .map_err(|_| RoomError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomMessage> {
        self.hub.sender_entry(&self.user_id).subscribe()
    }
}
