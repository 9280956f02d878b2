//! # Session Module
//!
//! Per-user ephemeral navigation state: the sorted result set of the last
//! location query, the anchor coordinate, and the last card shown during a
//! live share. Sessions live in process memory only; losing them on restart
//! is fine, callbacks then ask the user to resend a location.

use std::collections::HashMap;

use teloxide::types::{MessageId, UserId};
use tokio::sync::RwLock;

use crate::db::BuildingRecord;
use crate::geo::Coordinate;

/// One building in a user's current result set, annotated with the distance
/// from the query anchor.
#[derive(Debug, Clone)]
pub struct ResultEntry {
    pub building: BuildingRecord,
    pub distance_km: f64,
    /// Coordinate the distance was computed from
    pub anchor: Coordinate,
    /// Message the card replies to
    pub reply_to: MessageId,
}

/// A user's navigation state. Always replaced as a whole so the result set
/// and the anchor coordinate can never drift apart.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Result entries sorted ascending by distance
    pub entries: Vec<ResultEntry>,
    /// Link of the card last rendered during a live share, for deduplication
    pub last_shown_link: Option<String>,
    pub anchor: Option<Coordinate>,
    /// Message id replies should be threaded to
    pub reply_to: Option<MessageId>,
}

impl Session {
    /// Position of the entry whose building link equals `link`.
    pub fn position_of_link(&self, link: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.building.link == link)
    }
}

/// Keyed in-memory session store.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<UserId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user: UserId) -> Option<Session> {
        self.inner.read().await.get(&user).cloned()
    }

    pub async fn put(&self, user: UserId, session: Session) {
        self.inner.write().await.insert(user, session);
    }

    pub async fn delete(&self, user: UserId) {
        self.inner.write().await.remove(&user);
    }
}
