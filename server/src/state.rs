use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::protocol::{ConnectionId, PlaybackAction, PlaybackSnapshot, RoomId};

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_RADIX: u32 = 36;

/// Authoritative playback state of a single room
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    members: HashSet<ConnectionId>,
    creator_id: Option<ConnectionId>,
    playback_time: f64,
    is_playing: bool,
    media_ref: String,
}

/// Result of adding a connection to a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberAdded {
    pub newly_added: bool,
    pub became_creator: bool,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashSet::new(),
            creator_id: None,
            playback_time: 0.0,
            is_playing: false,
            media_ref: String::new(),
        }
    }

    pub fn creator_id(&self) -> Option<ConnectionId> {
        self.creator_id
    }

    pub fn playback_time(&self) -> f64 {
        self.playback_time
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn media_ref(&self) -> &str {
        &self.media_ref
    }

    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    #[cfg(test)]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, connection: ConnectionId) -> bool {
        self.members.contains(&connection)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The creator claim is honoured only when the room has no members yet.
    pub fn add_member(&mut self, connection: ConnectionId, claims_creator: bool) -> MemberAdded {
        let became_creator = claims_creator && self.members.is_empty() && self.creator_id.is_none();
        if became_creator {
            self.creator_id = Some(connection);
        }
        let newly_added = self.members.insert(connection);
        MemberAdded {
            newly_added,
            became_creator,
        }
    }

    /// Returns false if the connection was not a member.
    pub fn remove_member(&mut self, connection: ConnectionId) -> bool {
        let removed = self.members.remove(&connection);
        if removed && self.creator_id == Some(connection) {
            self.creator_id = None;
        }
        removed
    }

    /// Pauses the room; returns whether it was playing.
    pub fn freeze(&mut self) -> bool {
        std::mem::replace(&mut self.is_playing, false)
    }

    pub fn apply_playback(&mut self, action: PlaybackAction, time: f64) {
        self.playback_time = time;
        match action {
            PlaybackAction::Play => self.is_playing = true,
            PlaybackAction::Pause => self.is_playing = false,
            PlaybackAction::Seek => {}
        }
    }

    pub fn complete_sync(&mut self, time: f64, is_playing: bool) {
        self.playback_time = time;
        self.is_playing = is_playing;
    }

    pub fn set_media(&mut self, media_ref: String) {
        self.media_ref = media_ref;
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            playback_time: self.playback_time,
            is_playing: self.is_playing,
            media_ref: self.media_ref.clone(),
        }
    }
}

/// All live rooms, owned by one coordinator instance
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> RoomId {
        let room_id = self.generate_room_code();
        self.rooms.insert(room_id.clone(), Room::new(room_id.clone()));
        room_id
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    #[cfg(test)]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    /// Rooms the connection currently belongs to
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|room| room.is_member(connection))
            .map(|room| room.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn generate_room_code(&self) -> RoomId {
        loop {
            let mut raw = Uuid::new_v4().as_u128();
            let mut code = String::with_capacity(ROOM_CODE_LEN);
            for _ in 0..ROOM_CODE_LEN {
                let digit = (raw % ROOM_CODE_RADIX as u128) as u32;
                raw /= ROOM_CODE_RADIX as u128;
                code.push(char::from_digit(digit, ROOM_CODE_RADIX).unwrap_or('0'));
            }
            if !self.rooms.contains_key(&code) {
                break code;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_codes_are_short_lowercase_base36() {
        let mut registry = RoomRegistry::new();
        for _ in 0..64 {
            let id = registry.create();
            assert_eq!(id.len(), ROOM_CODE_LEN);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
        assert_eq!(registry.len(), 64);
    }

    #[test]
    fn new_room_starts_paused_at_zero_without_media() {
        let mut registry = RoomRegistry::new();
        let id = registry.create();
        let room = registry.get(&id).unwrap();
        assert_eq!(room.playback_time(), 0.0);
        assert!(!room.is_playing());
        assert!(room.media_ref().is_empty());
        assert!(room.is_empty());
        assert_eq!(room.creator_id(), None);
    }

    #[test]
    fn creator_claim_only_honoured_on_empty_room() {
        let mut room = Room::new("abc123".into());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(room.add_member(first, true).became_creator);
        let again = room.add_member(first, true);
        assert!(!again.newly_added);
        assert!(!again.became_creator);

        assert!(!room.add_member(second, true).became_creator);
        assert_eq!(room.creator_id(), Some(first));
    }

    #[test]
    fn creator_leaving_clears_creator() {
        let mut room = Room::new("abc123".into());
        let creator = Uuid::new_v4();
        let guest = Uuid::new_v4();
        room.add_member(creator, true);
        room.add_member(guest, false);

        assert!(room.remove_member(creator));
        assert_eq!(room.creator_id(), None);
        assert!(!room.remove_member(creator));

        room.add_member(creator, true);
        assert_eq!(room.creator_id(), None);
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut room = Room::new("abc123".into());
        room.set_media("/uploads/a.mp4".into());
        room.apply_playback(PlaybackAction::Play, 4.0);
        let snapshot = room.snapshot();

        room.apply_playback(PlaybackAction::Seek, 90.0);
        room.set_media("/uploads/b.mp4".into());

        assert_eq!(snapshot.playback_time, 4.0);
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.media_ref, "/uploads/a.mp4");
    }

    #[test]
    fn seek_keeps_play_state() {
        let mut room = Room::new("abc123".into());
        room.apply_playback(PlaybackAction::Play, 1.0);
        room.apply_playback(PlaybackAction::Seek, 30.0);
        assert!(room.is_playing());
        assert_eq!(room.playback_time(), 30.0);
        assert!(room.freeze());
        assert!(!room.freeze());
    }

    #[test]
    fn rooms_of_lists_every_membership() {
        let mut registry = RoomRegistry::new();
        let a = registry.create();
        let b = registry.create();
        let _c = registry.create();
        let conn = Uuid::new_v4();
        registry.get_mut(&a).unwrap().add_member(conn, false);
        registry.get_mut(&b).unwrap().add_member(conn, false);

        let mut rooms = registry.rooms_of(conn);
        rooms.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(rooms, expected);
    }
}
