pub mod model;
pub mod registry;

pub use model::{ChatMessage, MediaKind, MediaState, Member, PlaybackStatus, Room, RoomSnapshot};
pub use registry::{PlaybackAction, RoomError, RoomRegistry};
