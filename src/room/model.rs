use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room codes are exactly this many characters, drawn from `A-Z0-9`.
pub const ROOM_CODE_LEN: usize = 6;

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a candidate room code. Uniqueness is the registry's job.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARSET[rng.random_range(0..ROOM_CODE_CHARSET.len())] as char)
        .collect()
}

/// Kind of playable resource a room can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Youtube,
    Torrent,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Playing,
    Paused,
}

/// The room's currently selected media and its last-known playback point.
///
/// `position_seconds` is authoritative only at the instant of `last_update`;
/// the server never advances it between control events.
#[derive(Debug, Clone, Serialize)]
pub struct MediaState {
    pub url: String,
    pub kind: MediaKind,
    pub status: PlaybackStatus,
    pub position_seconds: f64,
    pub title: String,
    pub last_update: DateTime<Utc>,
}

/// A chat line in a room's append-only log.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub user_id: Uuid,
    pub user_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_server: bool,
}

/// A participant's presence in a room, tied to one live connection.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user_id: Uuid,
    pub user_name: String,
    pub is_host: bool,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub joined_at: DateTime<Utc>,
}

/// Full room view sent to a joining connection and exposed over REST.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_code: String,
    pub users: Vec<Member>,
    pub host: Option<Uuid>,
    pub media: Option<MediaState>,
    pub chat: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

/// Per-room state. Owned exclusively by the registry; every mutation happens
/// under the registry's entry lock, which is the room's serialization point.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    /// Members in join order. The head of the list after a host departure is
    /// the earliest-joined remaining member, which is who inherits host.
    pub members: Vec<Member>,
    pub chat: Vec<ChatMessage>,
    pub media: Option<MediaState>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Room {
    pub fn new(code: String) -> Self {
        let now = Utc::now();
        Self {
            code,
            members: Vec::new(),
            chat: Vec::new(),
            media: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, user_id: Uuid) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn member_mut(&mut self, user_id: Uuid) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.user_id == user_id)
    }

    pub fn host_id(&self) -> Option<Uuid> {
        self.members.iter().find(|m| m.is_host).map(|m| m.user_id)
    }

    /// Add a member. The first member of a fresh room becomes host.
    /// Duplicate names are allowed; identity is the connection id.
    pub fn add_member(&mut self, user_id: Uuid, user_name: String) -> Member {
        let member = Member {
            user_id,
            user_name,
            is_host: self.members.is_empty(),
            video_enabled: false,
            audio_enabled: false,
            joined_at: Utc::now(),
        };
        self.members.push(member.clone());
        self.last_activity = Utc::now();
        member
    }

    /// Remove a member. Returns the departed member's name and, if host
    /// status moved, the new host. Idempotent for unknown ids.
    pub fn remove_member(&mut self, user_id: Uuid) -> Option<(String, Option<Member>)> {
        let idx = self.members.iter().position(|m| m.user_id == user_id)?;
        let departed = self.members.remove(idx);
        self.last_activity = Utc::now();

        let mut new_host = None;
        if departed.is_host {
            // Earliest-joined remaining member inherits host.
            if let Some(first) = self.members.first_mut() {
                first.is_host = true;
                new_host = Some(first.clone());
            }
        }
        Some((departed.user_name, new_host))
    }

    pub fn add_message(&mut self, user_id: Uuid, message: String) -> Option<ChatMessage> {
        let user_name = self.member(user_id)?.user_name.clone();
        let entry = ChatMessage {
            user_id,
            user_name,
            message,
            timestamp: Utc::now(),
            is_server: false,
        };
        self.chat.push(entry.clone());
        self.last_activity = Utc::now();
        Some(entry)
    }

    /// Replace the current media. Playback always restarts paused.
    pub fn set_media(&mut self, url: String, kind: MediaKind, title: String, position: f64) -> MediaState {
        let media = MediaState {
            url,
            kind,
            status: PlaybackStatus::Paused,
            position_seconds: position,
            title,
            last_update: Utc::now(),
        };
        self.media = Some(media.clone());
        self.last_activity = Utc::now();
        media
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_code: self.code.clone(),
            users: self.members.clone(),
            host: self.host_id(),
            media: self.media.clone(),
            chat: self.chat.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_shape() {
        for _ in 0..64 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn first_member_is_host_and_host_transfers_in_join_order() {
        let mut room = Room::new("AB12CD".into());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        room.add_member(a, "a".into());
        room.add_member(b, "b".into());
        room.add_member(c, "c".into());
        assert_eq!(room.host_id(), Some(a));

        let (_, new_host) = room.remove_member(a).unwrap();
        assert_eq!(new_host.unwrap().user_id, b);
        assert_eq!(room.host_id(), Some(b));

        // Non-host departure does not move host.
        let (_, new_host) = room.remove_member(c).unwrap();
        assert!(new_host.is_none());
        assert_eq!(room.host_id(), Some(b));
    }
}
