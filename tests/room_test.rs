//! Unit-level tests for the room registry and state machine.

use uuid::Uuid;
use watchroom_server::room::registry::{PlaybackAction, RoomError, RoomRegistry};
use watchroom_server::room::{MediaKind, PlaybackStatus};

fn registry() -> RoomRegistry {
    RoomRegistry::new(50)
}

#[test]
fn created_codes_are_well_formed_and_unique() {
    let rooms = registry();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        let code = rooms.create();
        assert_eq!(code.len(), 6);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(seen.insert(code), "registry produced a duplicate code");
    }
}

#[test]
fn join_auto_creates_and_first_member_is_host() {
    let rooms = registry();
    let user = Uuid::new_v4();
    let outcome = rooms.join("AB12CD", user, "mia", true).unwrap();
    assert!(outcome.member.is_host);
    assert_eq!(outcome.snapshot.room_code, "AB12CD");
    assert_eq!(outcome.snapshot.users.len(), 1);
    assert_eq!(outcome.snapshot.host, Some(user));
}

#[test]
fn strict_mode_rejects_unknown_rooms() {
    let rooms = registry();
    let err = rooms
        .join("ZZ99ZZ", Uuid::new_v4(), "mia", false)
        .unwrap_err();
    assert!(matches!(err, RoomError::NotFound(_)));
    assert!(!rooms.contains("ZZ99ZZ"));
}

#[test]
fn join_normalizes_lowercase_codes() {
    let rooms = registry();
    let code = rooms.create();
    let outcome = rooms
        .join(&code.to_ascii_lowercase(), Uuid::new_v4(), "bea", true)
        .unwrap();
    assert_eq!(outcome.snapshot.room_code, code);
}

#[test]
fn join_then_leave_restores_membership_and_destroys_empty_rooms() {
    let rooms = registry();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    rooms.join("AB12CD", a, "a", true).unwrap();
    rooms.join("AB12CD", b, "b", true).unwrap();
    assert_eq!(rooms.snapshot("AB12CD").unwrap().users.len(), 2);

    let outcome = rooms.leave("AB12CD", b).unwrap();
    assert!(!outcome.room_destroyed);
    assert_eq!(outcome.users.len(), 1);

    let outcome = rooms.leave("AB12CD", a).unwrap();
    assert!(outcome.room_destroyed);
    assert!(matches!(
        rooms.snapshot("AB12CD"),
        Err(RoomError::NotFound(_))
    ));

    // Leaving again is a no-op, not an error.
    assert!(rooms.leave("AB12CD", a).is_none());
}

#[test]
fn exactly_one_host_regardless_of_departure_order() {
    // Remove members in several different orders; after every step the
    // remaining membership must contain exactly one host.
    let orders: &[&[usize]] = &[
        &[0, 1, 2, 3, 4],
        &[4, 3, 2, 1, 0],
        &[2, 0, 4, 1, 3],
        &[1, 3, 0, 4, 2],
    ];
    for order in orders {
        let rooms = registry();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            rooms.join("AB12CD", *id, &format!("user{i}"), true).unwrap();
        }
        for (step, idx) in order.iter().enumerate() {
            rooms.leave("AB12CD", ids[*idx]).unwrap();
            if step < order.len() - 1 {
                let snapshot = rooms.snapshot("AB12CD").unwrap();
                let hosts = snapshot.users.iter().filter(|m| m.is_host).count();
                assert_eq!(hosts, 1, "order {order:?} step {step}");
            }
        }
        assert!(!rooms.contains("AB12CD"));
    }
}

#[test]
fn host_passes_to_earliest_joined_remaining_member() {
    let rooms = registry();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    rooms.join("AB12CD", a, "a", true).unwrap();
    rooms.join("AB12CD", b, "b", true).unwrap();
    rooms.join("AB12CD", c, "c", true).unwrap();

    let outcome = rooms.leave("AB12CD", a).unwrap();
    assert_eq!(outcome.new_host.unwrap().user_id, b);
    assert_eq!(rooms.snapshot("AB12CD").unwrap().host, Some(b));
}

#[test]
fn duplicate_names_are_allowed() {
    let rooms = registry();
    rooms.join("AB12CD", Uuid::new_v4(), "mia", true).unwrap();
    let outcome = rooms.join("AB12CD", Uuid::new_v4(), "mia", true).unwrap();
    assert_eq!(outcome.snapshot.users.len(), 2);
}

#[test]
fn validation_errors_leave_state_unchanged() {
    let rooms = registry();
    assert!(matches!(
        rooms.join("AB12CD", Uuid::new_v4(), "   ", true),
        Err(RoomError::Validation(_))
    ));
    assert!(matches!(
        rooms.join("TOOLONGCODE", Uuid::new_v4(), "mia", true),
        Err(RoomError::Validation(_))
    ));
    assert!(!rooms.contains("AB12CD"));
}

#[test]
fn room_full_is_rejected() {
    let rooms = RoomRegistry::new(2);
    rooms.join("AB12CD", Uuid::new_v4(), "a", true).unwrap();
    rooms.join("AB12CD", Uuid::new_v4(), "b", true).unwrap();
    assert!(matches!(
        rooms.join("AB12CD", Uuid::new_v4(), "c", true),
        Err(RoomError::RoomFull(_))
    ));
}

#[test]
fn chat_requires_membership_and_non_empty_text() {
    let rooms = registry();
    let a = Uuid::new_v4();
    rooms.join("AB12CD", a, "mia", true).unwrap();

    assert!(matches!(
        rooms.append_chat("AB12CD", a, "   "),
        Err(RoomError::Validation(_))
    ));
    assert!(matches!(
        rooms.append_chat("AB12CD", Uuid::new_v4(), "hello"),
        Err(RoomError::NotInRoom)
    ));

    let entry = rooms.append_chat("AB12CD", a, "  hello  ").unwrap();
    assert_eq!(entry.user_name, "mia");
    assert_eq!(entry.message, "hello");
    assert!(!entry.is_server);
    assert_eq!(rooms.snapshot("AB12CD").unwrap().chat.len(), 1);
}

#[test]
fn seek_updates_position_without_touching_status() {
    let rooms = registry();
    let a = Uuid::new_v4();
    rooms.join("AB12CD", a, "mia", true).unwrap();
    rooms
        .change_media("AB12CD", a, "http://cdn/video.mp4", MediaKind::Direct, "movie", 0.0)
        .unwrap();

    let outcome = rooms
        .control_playback("AB12CD", a, PlaybackAction::Seek, Some(42.5))
        .unwrap();
    assert_eq!(outcome.position, 42.5);

    let media = rooms.snapshot("AB12CD").unwrap().media.unwrap();
    assert_eq!(media.position_seconds, 42.5);
    assert_eq!(media.status, PlaybackStatus::Paused);

    rooms
        .control_playback("AB12CD", a, PlaybackAction::Play, None)
        .unwrap();
    let media = rooms.snapshot("AB12CD").unwrap().media.unwrap();
    assert_eq!(media.status, PlaybackStatus::Playing);
    // Play without an explicit position keeps the last-known one.
    assert_eq!(media.position_seconds, 42.5);
}

#[test]
fn playback_control_requires_media() {
    let rooms = registry();
    let a = Uuid::new_v4();
    rooms.join("AB12CD", a, "mia", true).unwrap();
    assert!(matches!(
        rooms.control_playback("AB12CD", a, PlaybackAction::Play, None),
        Err(RoomError::Validation(_))
    ));
}

#[test]
fn change_media_resets_to_paused_at_position() {
    let rooms = registry();
    let a = Uuid::new_v4();
    rooms.join("AB12CD", a, "mia", true).unwrap();
    rooms
        .change_media("AB12CD", a, "http://cdn/a.mp4", MediaKind::Direct, "a", 0.0)
        .unwrap();
    rooms
        .control_playback("AB12CD", a, PlaybackAction::Play, Some(100.0))
        .unwrap();

    let (media, by) = rooms
        .change_media("AB12CD", a, "dQw4w9WgXcQ", MediaKind::Youtube, "b", 0.0)
        .unwrap();
    assert_eq!(by, "mia");
    assert_eq!(media.status, PlaybackStatus::Paused);
    assert_eq!(media.position_seconds, 0.0);

    assert!(matches!(
        rooms.change_media("AB12CD", a, "   ", MediaKind::Direct, "", 0.0),
        Err(RoomError::Validation(_))
    ));
}

#[test]
fn stats_count_rooms_and_members() {
    let rooms = registry();
    rooms.join("AB12CD", Uuid::new_v4(), "a", true).unwrap();
    rooms.join("AB12CD", Uuid::new_v4(), "b", true).unwrap();
    rooms.join("XY34ZW", Uuid::new_v4(), "c", true).unwrap();

    let stats = rooms.stats();
    assert_eq!(stats.total_rooms, 2);
    assert_eq!(stats.total_users, 3);
    assert_eq!(stats.rooms["AB12CD"], 2);
}
