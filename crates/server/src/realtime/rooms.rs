// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket registry and room membership.
//!
//! Rooms are logical broadcast groups: `user:<id>`, `type:rider|driver`, and
//! `ride:<id>`. Emission to a room is stateless; sockets not currently in
//! the room are silently skipped and clients reconcile over REST after a
//! reconnect.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use hail_core::model::UserType;

pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn type_room(user_type: UserType) -> String {
    format!("type:{}", user_type.as_str())
}

pub fn ride_room(ride_id: Uuid) -> String {
    format!("ride:{ride_id}")
}

/// One connected socket's send half; frames are serialized `{event, data}`.
type SocketSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct RoomState {
    sockets: HashMap<Uuid, SocketSender>,
    rooms: HashMap<String, HashSet<Uuid>>,
    memberships: HashMap<Uuid, HashSet<String>>,
    user_sockets: HashMap<Uuid, HashSet<Uuid>>,
    socket_user: HashMap<Uuid, Uuid>,
}

/// Shared room registry for the realtime fabric.
pub struct Rooms {
    state: RwLock<RoomState>,
}

impl Rooms {
    pub fn new() -> Self {
        Self { state: RwLock::new(RoomState::default()) }
    }

    /// Attach a socket; returns its id.
    pub async fn connect(&self, sender: SocketSender) -> Uuid {
        let socket_id = Uuid::new_v4();
        self.state.write().await.sockets.insert(socket_id, sender);
        socket_id
    }

    /// Register the socket for a user: joins `user:<id>` and `type:<kind>`.
    pub async fn register(&self, socket_id: Uuid, user_id: Uuid, user_type: UserType) {
        {
            let mut state = self.state.write().await;
            state.user_sockets.entry(user_id).or_default().insert(socket_id);
            state.socket_user.insert(socket_id, user_id);
        }
        self.join(socket_id, &user_room(user_id)).await;
        self.join(socket_id, &type_room(user_type)).await;
    }

    /// Whether the socket has registered a user yet.
    pub async fn is_registered(&self, socket_id: Uuid) -> bool {
        self.state.read().await.socket_user.contains_key(&socket_id)
    }

    /// The user a socket registered as.
    pub async fn user_of(&self, socket_id: Uuid) -> Option<Uuid> {
        self.state.read().await.socket_user.get(&socket_id).copied()
    }

    pub async fn join(&self, socket_id: Uuid, room: &str) {
        let mut state = self.state.write().await;
        if !state.sockets.contains_key(&socket_id) {
            return;
        }
        state.rooms.entry(room.to_owned()).or_default().insert(socket_id);
        state.memberships.entry(socket_id).or_default().insert(room.to_owned());
    }

    pub async fn leave(&self, socket_id: Uuid, room: &str) {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&socket_id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
        if let Some(rooms) = state.memberships.get_mut(&socket_id) {
            rooms.remove(room);
        }
    }

    /// Tear down every room joined by the socket. In-flight operations the
    /// socket started are unaffected.
    pub async fn disconnect(&self, socket_id: Uuid) {
        let mut state = self.state.write().await;
        state.sockets.remove(&socket_id);
        if let Some(rooms) = state.memberships.remove(&socket_id) {
            for room in rooms {
                if let Some(members) = state.rooms.get_mut(&room) {
                    members.remove(&socket_id);
                    if members.is_empty() {
                        state.rooms.remove(&room);
                    }
                }
            }
        }
        if let Some(user_id) = state.socket_user.remove(&socket_id) {
            if let Some(sockets) = state.user_sockets.get_mut(&user_id) {
                sockets.remove(&socket_id);
                if sockets.is_empty() {
                    state.user_sockets.remove(&user_id);
                }
            }
        }
    }

    /// Emit one event into a set of rooms, serializing once. A socket joined
    /// to several target rooms still receives a single copy.
    pub async fn emit(&self, rooms: &[String], event: &str, data: serde_json::Value) -> usize {
        let frame = json!({ "event": event, "data": data }).to_string();
        let state = self.state.read().await;
        let mut targets: HashSet<Uuid> = HashSet::new();
        for room in rooms {
            if let Some(members) = state.rooms.get(room) {
                targets.extend(members.iter().copied());
            }
        }
        let mut delivered = 0;
        for socket_id in targets {
            if let Some(sender) = state.sockets.get(&socket_id) {
                if sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub async fn socket_count(&self) -> usize {
        self.state.read().await.sockets.len()
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "rooms_tests.rs"]
mod tests;
