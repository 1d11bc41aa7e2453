//! In-memory room registry and the per-room state machine.
//!
//! All room mutation goes through registry methods that hold the DashMap
//! entry guard for the duration of the operation, so events applied to one
//! room are strictly ordered while distinct rooms proceed concurrently.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::room::model::{
    generate_room_code, ChatMessage, MediaKind, MediaState, Member, Room, RoomSnapshot,
    ROOM_CODE_LEN,
};

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("{0}")]
    Validation(String),
    #[error("room {0} not found")]
    NotFound(String),
    #[error("room {0} is full")]
    RoomFull(String),
    #[error("not in a room")]
    NotInRoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek,
}

#[derive(Debug, Clone, Copy)]
pub enum MemberFlag {
    Video,
    Audio,
}

/// Result of a successful join, captured under the room lock.
#[derive(Debug)]
pub struct JoinOutcome {
    pub member: Member,
    pub snapshot: RoomSnapshot,
}

/// Result of a leave, captured under the room lock.
pub struct LeaveOutcome {
    pub user_name: String,
    pub new_host: Option<Member>,
    pub users: Vec<Member>,
    pub host: Option<Uuid>,
    pub room_destroyed: bool,
}

/// Playback control applied; carries what the broadcast needs.
pub struct PlaybackOutcome {
    pub user_name: String,
    pub position: f64,
}

/// Membership list refresh for `users_updated` broadcasts.
#[derive(Serialize)]
pub struct UsersUpdate {
    pub users: Vec<Member>,
    pub host: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RegistryStats {
    pub total_rooms: usize,
    pub total_users: usize,
    pub rooms: HashMap<String, usize>,
}

/// Registry of live rooms keyed by room code.
///
/// Injected as `Arc<RoomRegistry>` through `AppState` so tests can run
/// isolated instances.
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
    max_members: usize,
}

impl RoomRegistry {
    pub fn new(max_members: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_members,
        }
    }

    /// Uppercase and validate a client-supplied room code.
    pub fn normalize_code(code: &str) -> Result<String, RoomError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != ROOM_CODE_LEN
            || !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(RoomError::Validation(format!(
                "room code must be {ROOM_CODE_LEN} letters or digits"
            )));
        }
        Ok(code)
    }

    /// Create an empty room under a freshly generated unique code.
    /// Uniqueness is guaranteed by retrying on collision, not assumed.
    pub fn create(&self) -> String {
        loop {
            let code = generate_room_code();
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Room::new(code.clone()));
                    tracing::info!(room = %code, "room created");
                    return code;
                }
            }
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        Self::normalize_code(code)
            .map(|c| self.rooms.contains_key(&c))
            .unwrap_or(false)
    }

    pub fn snapshot(&self, code: &str) -> Result<RoomSnapshot, RoomError> {
        let code = Self::normalize_code(code)?;
        self.rooms
            .get(&code)
            .map(|room| room.snapshot())
            .ok_or(RoomError::NotFound(code))
    }

    /// Add a member to a room. A missing room is auto-created when
    /// `auto_create` is set (lenient mode); otherwise the join fails with
    /// `NotFound`. The first member of a fresh room becomes host.
    pub fn join(
        &self,
        code: &str,
        user_id: Uuid,
        user_name: &str,
        auto_create: bool,
    ) -> Result<JoinOutcome, RoomError> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(RoomError::Validation("name is required".into()));
        }
        let code = Self::normalize_code(code)?;

        let mut room = match self.rooms.entry(code.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(slot) => {
                if !auto_create {
                    return Err(RoomError::NotFound(code));
                }
                tracing::info!(room = %code, "room auto-created on join");
                slot.insert(Room::new(code.clone()))
            }
        };
        let room = room.value_mut();

        if room.members.len() >= self.max_members {
            return Err(RoomError::RoomFull(code));
        }

        let member = room.add_member(user_id, user_name.to_string());
        tracing::info!(
            room = %code,
            user = %member.user_name,
            user_id = %user_id,
            is_host = member.is_host,
            "member joined"
        );
        Ok(JoinOutcome {
            snapshot: room.snapshot(),
            member,
        })
    }

    /// Remove a member, transferring host to the earliest-joined remaining
    /// member when the host departs and destroying the room when it empties.
    /// Returns `None` if the room or member is already gone (idempotent).
    pub fn leave(&self, code: &str, user_id: Uuid) -> Option<LeaveOutcome> {
        let code = Self::normalize_code(code).ok()?;
        let outcome = {
            let mut room = self.rooms.get_mut(&code)?;
            let room = room.value_mut();
            let (user_name, new_host) = room.remove_member(user_id)?;
            LeaveOutcome {
                user_name,
                new_host,
                users: room.members.clone(),
                host: room.host_id(),
                room_destroyed: room.is_empty(),
            }
        };

        if outcome.room_destroyed {
            self.rooms.remove(&code);
            tracing::info!(room = %code, "room destroyed (last member left)");
        } else if let Some(host) = &outcome.new_host {
            tracing::info!(room = %code, new_host = %host.user_name, "host transferred");
        }
        Some(outcome)
    }

    /// Append a chat message. Text must be non-empty after trimming.
    pub fn append_chat(
        &self,
        code: &str,
        user_id: Uuid,
        message: &str,
    ) -> Result<ChatMessage, RoomError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RoomError::Validation("message is empty".into()));
        }
        let code = Self::normalize_code(code)?;
        let mut room = self
            .rooms
            .get_mut(&code)
            .ok_or(RoomError::NotFound(code))?;
        room.value_mut()
            .add_message(user_id, message.to_string())
            .ok_or(RoomError::NotInRoom)
    }

    /// Replace the room's media. Any member may change media; playback
    /// restarts paused at the given position.
    pub fn change_media(
        &self,
        code: &str,
        user_id: Uuid,
        url: &str,
        kind: MediaKind,
        title: &str,
        position: f64,
    ) -> Result<(MediaState, String), RoomError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RoomError::Validation("media url is required".into()));
        }
        let code = Self::normalize_code(code)?;
        let mut room = self
            .rooms
            .get_mut(&code)
            .ok_or(RoomError::NotFound(code.clone()))?;
        let room = room.value_mut();
        let user_name = room
            .member(user_id)
            .ok_or(RoomError::NotInRoom)?
            .user_name
            .clone();
        let media = room.set_media(url.to_string(), kind, title.to_string(), position);
        tracing::info!(room = %code, by = %user_name, url = %url, "media changed");
        Ok((media, user_name))
    }

    /// Apply play/pause/seek. The stored position is always updated to the
    /// resolved value; a missing position falls back to the last-known one.
    /// Seek leaves playback status untouched.
    pub fn control_playback(
        &self,
        code: &str,
        user_id: Uuid,
        action: PlaybackAction,
        position: Option<f64>,
    ) -> Result<PlaybackOutcome, RoomError> {
        let code = Self::normalize_code(code)?;
        let mut room = self
            .rooms
            .get_mut(&code)
            .ok_or(RoomError::NotFound(code))?;
        let room = room.value_mut();
        let user_name = room
            .member(user_id)
            .ok_or(RoomError::NotInRoom)?
            .user_name
            .clone();
        let media = room
            .media
            .as_mut()
            .ok_or_else(|| RoomError::Validation("no media selected".into()))?;

        let position = position.unwrap_or(media.position_seconds);
        match action {
            PlaybackAction::Play => media.status = crate::room::model::PlaybackStatus::Playing,
            PlaybackAction::Pause => media.status = crate::room::model::PlaybackStatus::Paused,
            PlaybackAction::Seek => {}
        }
        media.position_seconds = position;
        media.last_update = chrono::Utc::now();
        room.last_activity = chrono::Utc::now();

        Ok(PlaybackOutcome {
            user_name,
            position,
        })
    }

    /// Flip a member's video/audio flag and return the refreshed list.
    pub fn set_member_flag(
        &self,
        code: &str,
        user_id: Uuid,
        flag: MemberFlag,
        enabled: bool,
    ) -> Result<UsersUpdate, RoomError> {
        let code = Self::normalize_code(code)?;
        let mut room = self
            .rooms
            .get_mut(&code)
            .ok_or(RoomError::NotFound(code))?;
        let room = room.value_mut();
        let member = room.member_mut(user_id).ok_or(RoomError::NotInRoom)?;
        match flag {
            MemberFlag::Video => member.video_enabled = enabled,
            MemberFlag::Audio => member.audio_enabled = enabled,
        }
        Ok(UsersUpdate {
            users: room.members.clone(),
            host: room.host_id(),
        })
    }

    /// Look up a member's display name, for relay tagging.
    pub fn member_name(&self, code: &str, user_id: Uuid) -> Option<String> {
        let code = Self::normalize_code(code).ok()?;
        self.rooms
            .get(&code)?
            .member(user_id)
            .map(|m| m.user_name.clone())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut rooms = HashMap::new();
        let mut total_users = 0;
        for entry in self.rooms.iter() {
            let count = entry.value().members.len();
            total_users += count;
            rooms.insert(entry.key().clone(), count);
        }
        RegistryStats {
            total_rooms: rooms.len(),
            total_users,
            rooms,
        }
    }

    /// Drop rooms with no members. Empty rooms are normally removed on the
    /// last leave; the sweep catches anything that slipped through.
    pub fn sweep_empty(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, room| !room.is_empty());
        before - self.rooms.len()
    }
}
