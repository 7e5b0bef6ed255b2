use tokio::sync::{mpsc, oneshot};

use crate::error::CoordinatorError;
use crate::protocol::{
    ClientEvent, ConnectionId, PlaybackAction, PlaybackSnapshot, RoomId, ServerEvent,
};
use crate::state::RoomRegistry;

const LOG_TAG: &str = "[Cowatch Server]";

/// Fire-and-forget delivery of an event to one connection
pub trait Outbound {
    fn deliver(&self, connection: ConnectionId, event: ServerEvent);
}

/// Everything the coordinator reacts to, consumed one at a time
#[derive(Debug)]
pub enum Command {
    CreateRoom {
        reply: oneshot::Sender<RoomId>,
    },
    Client {
        connection: ConnectionId,
        event: ClientEvent,
    },
    MediaUploaded {
        room_id: RoomId,
        media_ref: String,
    },
    Disconnect {
        connection: ConnectionId,
    },
    ExpireIfUnclaimed {
        room_id: RoomId,
    },
}

/// Owns every room and serializes all mutations to them
pub struct Coordinator<O> {
    registry: RoomRegistry,
    outbound: O,
    enforce_creator_sync: bool,
}

impl<O: Outbound> Coordinator<O> {
    pub fn new(outbound: O, enforce_creator_sync: bool) -> Self {
        Self {
            registry: RoomRegistry::new(),
            outbound,
            enforce_creator_sync,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Drain commands until every sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.dispatch(command);
        }
        if self.registry.is_empty() {
            tracing::info!("{LOG_TAG} Command channel closed; coordinator stopping");
        } else {
            tracing::warn!(
                "{LOG_TAG} Command channel closed; coordinator stopping with {} live rooms",
                self.registry.len()
            );
        }
    }

    pub fn dispatch(&mut self, command: Command) {
        match command {
            Command::CreateRoom { reply } => {
                let room_id = self.create_room();
                if reply.send(room_id).is_err() {
                    tracing::debug!("Room creator went away before receiving its id");
                }
            }
            Command::Client { connection, event } => {
                tracing::debug!("Dispatching {:?} from {}", event, connection);
                if let Err(err) = self.handle_client_event(connection, event) {
                    self.report(connection, err);
                }
            }
            Command::MediaUploaded { room_id, media_ref } => {
                if let Err(err) = self.apply_media_update(&room_id, media_ref) {
                    tracing::debug!("Upload not applied: {}", err);
                }
            }
            Command::Disconnect { connection } => self.disconnect(connection),
            Command::ExpireIfUnclaimed { room_id } => self.expire_if_unclaimed(&room_id),
        }
    }

    pub fn handle_client_event(
        &mut self,
        connection: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), CoordinatorError> {
        match event {
            ClientEvent::JoinRoom {
                room_id,
                is_room_creator,
            } => self
                .join(&room_id, connection, is_room_creator)
                .map(|_| ()),
            ClientEvent::Play {
                room_id,
                current_time,
            } => self.apply_playback(&room_id, connection, PlaybackAction::Play, current_time),
            ClientEvent::Pause {
                room_id,
                current_time,
            } => self.apply_playback(&room_id, connection, PlaybackAction::Pause, current_time),
            ClientEvent::Seek {
                room_id,
                current_time,
            } => self.apply_playback(&room_id, connection, PlaybackAction::Seek, current_time),
            ClientEvent::VideoUploaded { room_id, media_ref } => {
                self.apply_media_update(&room_id, media_ref)
            }
            ClientEvent::SyncComplete {
                room_id,
                current_time,
                is_playing,
            } => self.complete_sync(&room_id, connection, current_time, is_playing),
            ClientEvent::LeaveRoom { room_id } => self.leave(&room_id, connection),
        }
    }

    pub fn create_room(&mut self) -> RoomId {
        let room_id = self.registry.create();
        tracing::info!(
            "{LOG_TAG} Room {} created ({} live)",
            room_id,
            self.registry.len()
        );
        room_id
    }

    /// Adds the connection to the room and sends it a snapshot. A playing
    /// room is paused for everyone first.
    pub fn join(
        &mut self,
        room_id: &str,
        connection: ConnectionId,
        claims_creator: bool,
    ) -> Result<PlaybackSnapshot, CoordinatorError> {
        require_room_id(room_id)?;
        let room = self
            .registry
            .get_mut(room_id)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_id.to_string()))?;

        let added = room.add_member(connection, claims_creator);
        let was_playing = room.freeze();
        let snapshot = room.snapshot();
        let creator = room.creator_id();

        if added.became_creator {
            tracing::info!("{LOG_TAG} Client {} created room {}", connection, room_id);
        } else {
            tracing::info!("{LOG_TAG} Client {} joined room {}", connection, room_id);
        }

        self.outbound
            .deliver(connection, snapshot.clone().into_event());

        if was_playing {
            tracing::debug!("Room {} frozen at {} for join", room_id, snapshot.playback_time);
            self.broadcast(
                room_id,
                None,
                ServerEvent::Pause {
                    current_time: snapshot.playback_time,
                },
            );
        }

        if added.newly_added {
            self.broadcast(
                room_id,
                Some(connection),
                ServerEvent::NewUser {
                    connection_id: connection,
                },
            );
            if let Some(creator) = creator.filter(|creator| *creator != connection) {
                self.outbound.deliver(
                    creator,
                    ServerEvent::NewUserJoined {
                        is_room_creator: false,
                    },
                );
            }
        }

        Ok(snapshot)
    }

    pub fn apply_playback(
        &mut self,
        room_id: &str,
        connection: ConnectionId,
        action: PlaybackAction,
        time: f64,
    ) -> Result<(), CoordinatorError> {
        require_room_id(room_id)?;
        require_time(time)?;
        let room = self
            .registry
            .get_mut(room_id)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_id.to_string()))?;

        room.apply_playback(action, time);
        let delivered = self.broadcast(room_id, Some(connection), action.into_event(time));
        tracing::debug!(
            "Broadcast {:?} at {} from {} to {} members of room {}",
            action,
            time,
            connection,
            delivered,
            room_id
        );
        Ok(())
    }

    pub fn apply_media_update(
        &mut self,
        room_id: &str,
        media_ref: String,
    ) -> Result<(), CoordinatorError> {
        require_room_id(room_id)?;
        if media_ref.trim().is_empty() {
            return Err(CoordinatorError::Malformed("mediaRef is empty".into()));
        }
        let room = self
            .registry
            .get_mut(room_id)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_id.to_string()))?;

        room.set_media(media_ref.clone());
        tracing::info!("{LOG_TAG} Room {} now sharing {}", room_id, media_ref);
        self.broadcast(room_id, None, ServerEvent::VideoUpdated { media_ref });
        Ok(())
    }

    /// Releases gated joiners. When enforcement is on and the room has a
    /// creator, only that creator may complete a sync.
    pub fn complete_sync(
        &mut self,
        room_id: &str,
        connection: ConnectionId,
        time: f64,
        is_playing: bool,
    ) -> Result<(), CoordinatorError> {
        require_room_id(room_id)?;
        require_time(time)?;
        let room = self
            .registry
            .get_mut(room_id)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_id.to_string()))?;

        if self.enforce_creator_sync {
            if let Some(creator) = room.creator_id() {
                if creator != connection {
                    return Err(CoordinatorError::UnauthorizedSyncComplete {
                        room_id: room_id.to_string(),
                        connection,
                    });
                }
            }
        }

        room.complete_sync(time, is_playing);
        tracing::info!(
            "{LOG_TAG} Room {} synced at {} (playing: {})",
            room_id,
            time,
            is_playing
        );
        self.broadcast(room_id, None, ServerEvent::SyncComplete {});
        Ok(())
    }

    pub fn leave(&mut self, room_id: &str, connection: ConnectionId) -> Result<(), CoordinatorError> {
        require_room_id(room_id)?;
        let room = self
            .registry
            .get_mut(room_id)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_id.to_string()))?;

        if room.remove_member(connection) {
            tracing::info!("{LOG_TAG} Client {} left room {}", connection, room_id);
            self.after_departure(room_id, connection);
        }
        Ok(())
    }

    /// Removes the connection from every room it joined. Idempotent.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        for room_id in self.registry.rooms_of(connection) {
            if let Some(room) = self.registry.get_mut(&room_id) {
                room.remove_member(connection);
            }
            tracing::info!(
                "{LOG_TAG} Client {} dropped from room {} (disconnected)",
                connection,
                room_id
            );
            self.after_departure(&room_id, connection);
        }
    }

    pub fn expire_if_unclaimed(&mut self, room_id: &str) {
        let unclaimed = self
            .registry
            .get(room_id)
            .map(|room| room.is_empty())
            .unwrap_or(false);
        if unclaimed {
            self.registry.remove(room_id);
            tracing::info!("{LOG_TAG} Room {} expired (never joined)", room_id);
        }
    }

    fn after_departure(&mut self, room_id: &str, connection: ConnectionId) {
        let now_empty = self
            .registry
            .get(room_id)
            .map(|room| room.is_empty())
            .unwrap_or(false);
        if now_empty {
            self.registry.remove(room_id);
            tracing::info!("{LOG_TAG} Room {} deleted (empty)", room_id);
        } else {
            self.broadcast(
                room_id,
                None,
                ServerEvent::UserLeft {
                    connection_id: connection,
                },
            );
        }
    }

    /// Sends `event` to every member of the room except `exclude`; returns
    /// how many members it was handed to.
    fn broadcast(&self, room_id: &str, exclude: Option<ConnectionId>, event: ServerEvent) -> usize {
        let Some(room) = self.registry.get(room_id) else {
            return 0;
        };
        let mut delivered = 0;
        for member in room.members() {
            if Some(member) == exclude {
                continue;
            }
            self.outbound.deliver(member, event.clone());
            delivered += 1;
        }
        delivered
    }

    fn report(&self, connection: ConnectionId, err: CoordinatorError) {
        if err.is_reported() {
            tracing::warn!("Rejected event from {}: {}", connection, err);
            self.outbound.deliver(
                connection,
                ServerEvent::Error {
                    message: err.to_string(),
                },
            );
        } else {
            tracing::debug!("Ignoring event from {}: {}", connection, err);
        }
    }
}

fn require_room_id(room_id: &str) -> Result<(), CoordinatorError> {
    if room_id.trim().is_empty() {
        return Err(CoordinatorError::Malformed("roomId is empty".into()));
    }
    Ok(())
}

fn require_time(time: f64) -> Result<(), CoordinatorError> {
    if !time.is_finite() || time < 0.0 {
        return Err(CoordinatorError::Malformed(format!(
            "currentTime must be a non-negative number, got {time}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct Recorder {
        deliveries: Arc<Mutex<Vec<(ConnectionId, ServerEvent)>>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<(ConnectionId, ServerEvent)> {
            std::mem::take(&mut *self.deliveries.lock().unwrap())
        }

        fn received_by(events: &[(ConnectionId, ServerEvent)], who: ConnectionId) -> Vec<ServerEvent> {
            events
                .iter()
                .filter(|(to, _)| *to == who)
                .map(|(_, event)| event.clone())
                .collect()
        }
    }

    impl Outbound for Recorder {
        fn deliver(&self, connection: ConnectionId, event: ServerEvent) {
            self.deliveries.lock().unwrap().push((connection, event));
        }
    }

    fn coordinator() -> (Coordinator<Recorder>, Recorder) {
        let recorder = Recorder::default();
        (Coordinator::new(recorder.clone(), true), recorder)
    }

    fn room_with_creator(coordinator: &mut Coordinator<Recorder>) -> (RoomId, ConnectionId) {
        let room_id = coordinator.create_room();
        let creator = Uuid::new_v4();
        coordinator.join(&room_id, creator, true).unwrap();
        (room_id, creator)
    }

    #[test]
    fn join_sends_snapshot_to_joiner() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        coordinator
            .apply_media_update(&room_id, "/uploads/m.mp4".into())
            .unwrap();
        recorder.take();

        let guest = Uuid::new_v4();
        let snapshot = coordinator.join(&room_id, guest, false).unwrap();
        let events = recorder.take();

        assert_eq!(snapshot.media_ref, "/uploads/m.mp4");
        assert_eq!(
            Recorder::received_by(&events, guest),
            vec![ServerEvent::Sync {
                current_time: 0.0,
                is_playing: false,
                media_ref: "/uploads/m.mp4".into(),
            }]
        );
        assert_eq!(
            Recorder::received_by(&events, creator),
            vec![
                ServerEvent::NewUser {
                    connection_id: guest
                },
                ServerEvent::NewUserJoined {
                    is_room_creator: false
                },
            ]
        );
    }

    #[test]
    fn only_creator_gets_awaiting_sync_signal() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        let first = Uuid::new_v4();
        coordinator.join(&room_id, first, false).unwrap();
        recorder.take();

        let second = Uuid::new_v4();
        coordinator.join(&room_id, second, false).unwrap();
        let events = recorder.take();

        assert_eq!(
            Recorder::received_by(&events, first),
            vec![ServerEvent::NewUser {
                connection_id: second
            }]
        );
        assert!(Recorder::received_by(&events, creator).contains(&ServerEvent::NewUserJoined {
            is_room_creator: false
        }));
    }

    #[test]
    fn creator_assignment_is_idempotent_under_redelivery() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        coordinator.join(&room_id, creator, true).unwrap();
        let latecomer = Uuid::new_v4();
        coordinator.join(&room_id, latecomer, true).unwrap();

        let room = coordinator.registry().get(&room_id).unwrap();
        assert_eq!(room.creator_id(), Some(creator));
        assert_eq!(room.member_count(), 2);

        let events = recorder.take();
        let notices = events
            .iter()
            .filter(|(_, e)| matches!(e, ServerEvent::NewUser { connection_id } if *connection_id == creator))
            .count();
        assert_eq!(notices, 0);
    }

    #[test]
    fn joining_a_playing_room_freezes_it_for_everyone_once() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        let synced = Uuid::new_v4();
        coordinator.join(&room_id, synced, false).unwrap();
        coordinator
            .apply_playback(&room_id, creator, PlaybackAction::Play, 8.0)
            .unwrap();
        recorder.take();

        let joiner = Uuid::new_v4();
        let snapshot = coordinator.join(&room_id, joiner, false).unwrap();
        let events = recorder.take();

        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.playback_time, 8.0);
        assert!(!coordinator.registry().get(&room_id).unwrap().is_playing());
        for member in [creator, synced, joiner] {
            let pauses = Recorder::received_by(&events, member)
                .into_iter()
                .filter(|e| *e == ServerEvent::Pause { current_time: 8.0 })
                .count();
            assert_eq!(pauses, 1, "member {member} should see one pause");
        }
    }

    #[test]
    fn joining_a_paused_room_broadcasts_no_pause() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, _creator) = room_with_creator(&mut coordinator);
        recorder.take();
        coordinator.join(&room_id, Uuid::new_v4(), false).unwrap();
        assert!(!recorder
            .take()
            .iter()
            .any(|(_, e)| matches!(e, ServerEvent::Pause { .. })));
    }

    #[test]
    fn playback_is_not_echoed_to_originator() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        let guest = Uuid::new_v4();
        coordinator.join(&room_id, guest, false).unwrap();
        recorder.take();

        coordinator
            .apply_playback(&room_id, creator, PlaybackAction::Play, 5.0)
            .unwrap();
        let events = recorder.take();

        assert_eq!(events, vec![(guest, ServerEvent::Play { current_time: 5.0 })]);
        let room = coordinator.registry().get(&room_id).unwrap();
        assert_eq!(room.playback_time(), 5.0);
        assert!(room.is_playing());
    }

    #[test]
    fn unknown_room_is_a_silent_noop() {
        let (mut coordinator, recorder) = coordinator();
        let conn = Uuid::new_v4();
        coordinator.dispatch(Command::Client {
            connection: conn,
            event: ClientEvent::Play {
                room_id: "ghost1".into(),
                current_time: 3.0,
            },
        });
        coordinator.dispatch(Command::Client {
            connection: conn,
            event: ClientEvent::JoinRoom {
                room_id: "ghost1".into(),
                is_room_creator: true,
            },
        });
        assert!(recorder.take().is_empty());
        assert!(coordinator.registry().is_empty());
    }

    #[test]
    fn malformed_time_is_rejected_without_mutation() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        recorder.take();

        coordinator.dispatch(Command::Client {
            connection: creator,
            event: ClientEvent::Seek {
                room_id: room_id.clone(),
                current_time: f64::NAN,
            },
        });
        coordinator.dispatch(Command::Client {
            connection: creator,
            event: ClientEvent::Play {
                room_id: room_id.clone(),
                current_time: -1.0,
            },
        });

        let room = coordinator.registry().get(&room_id).unwrap();
        assert_eq!(room.playback_time(), 0.0);
        assert!(!room.is_playing());
        let events = recorder.take();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|(to, e)| *to == creator && matches!(e, ServerEvent::Error { .. })));
    }

    #[test]
    fn sync_complete_from_creator_releases_room() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        let guest = Uuid::new_v4();
        coordinator.join(&room_id, guest, false).unwrap();
        recorder.take();

        coordinator
            .complete_sync(&room_id, creator, 12.0, false)
            .unwrap();
        let events = recorder.take();

        let room = coordinator.registry().get(&room_id).unwrap();
        assert_eq!(room.playback_time(), 12.0);
        assert!(!room.is_playing());
        assert_eq!(
            Recorder::received_by(&events, guest),
            vec![ServerEvent::SyncComplete {}]
        );
        assert_eq!(
            Recorder::received_by(&events, creator),
            vec![ServerEvent::SyncComplete {}]
        );
    }

    #[test]
    fn sync_complete_from_non_creator_is_rejected() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, _creator) = room_with_creator(&mut coordinator);
        let guest = Uuid::new_v4();
        coordinator.join(&room_id, guest, false).unwrap();
        recorder.take();

        coordinator.dispatch(Command::Client {
            connection: guest,
            event: ClientEvent::SyncComplete {
                room_id: room_id.clone(),
                current_time: 40.0,
                is_playing: true,
            },
        });

        let room = coordinator.registry().get(&room_id).unwrap();
        assert_eq!(room.playback_time(), 0.0);
        let events = recorder.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], (to, ServerEvent::Error { .. }) if *to == guest));
    }

    #[test]
    fn sync_complete_allowed_from_anyone_once_creator_is_gone() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        let guest = Uuid::new_v4();
        coordinator.join(&room_id, guest, false).unwrap();
        coordinator.leave(&room_id, creator).unwrap();
        recorder.take();

        coordinator.complete_sync(&room_id, guest, 3.0, false).unwrap();
        assert_eq!(recorder.take(), vec![(guest, ServerEvent::SyncComplete {})]);
    }

    #[test]
    fn enforcement_can_be_disabled() {
        let recorder = Recorder::default();
        let mut coordinator = Coordinator::new(recorder.clone(), false);
        let (room_id, _creator) = room_with_creator(&mut coordinator);
        let guest = Uuid::new_v4();
        coordinator.join(&room_id, guest, false).unwrap();
        assert!(coordinator.complete_sync(&room_id, guest, 1.0, true).is_ok());
        assert!(coordinator.registry().get(&room_id).unwrap().is_playing());
    }

    #[test]
    fn last_member_leaving_deletes_room() {
        let (mut coordinator, recorder) = coordinator();
        let (room_id, creator) = room_with_creator(&mut coordinator);
        let guest = Uuid::new_v4();
        coordinator.join(&room_id, guest, false).unwrap();
        recorder.take();

        coordinator.leave(&room_id, guest).unwrap();
        assert_eq!(
            recorder.take(),
            vec![(creator, ServerEvent::UserLeft { connection_id: guest })]
        );
        assert!(coordinator.registry().contains(&room_id));

        coordinator.leave(&room_id, creator).unwrap();
        assert!(!coordinator.registry().contains(&room_id));
        assert!(recorder.take().is_empty());

        let late = Uuid::new_v4();
        assert_eq!(
            coordinator.join(&room_id, late, false),
            Err(CoordinatorError::UnknownRoom(room_id.clone()))
        );
    }

    #[test]
    fn disconnect_scans_every_room_and_is_idempotent() {
        let (mut coordinator, recorder) = coordinator();
        let (first, first_creator) = room_with_creator(&mut coordinator);
        let (second, second_creator) = room_with_creator(&mut coordinator);
        let roamer = Uuid::new_v4();
        coordinator.join(&first, roamer, false).unwrap();
        coordinator.join(&second, roamer, false).unwrap();
        coordinator.leave(&first, first_creator).unwrap();
        recorder.take();

        coordinator.disconnect(roamer);
        assert!(!coordinator.registry().contains(&first));
        assert!(coordinator.registry().contains(&second));
        assert_eq!(
            recorder.take(),
            vec![(second_creator, ServerEvent::UserLeft { connection_id: roamer })]
        );

        coordinator.disconnect(roamer);
        assert!(recorder.take().is_empty());
        assert_eq!(coordinator.registry().len(), 1);
    }

    #[test]
    fn unclaimed_rooms_expire_but_joined_rooms_do_not() {
        let (mut coordinator, _recorder) = coordinator();
        let idle = coordinator.create_room();
        let (busy, _) = room_with_creator(&mut coordinator);

        coordinator.dispatch(Command::ExpireIfUnclaimed { room_id: idle.clone() });
        coordinator.dispatch(Command::ExpireIfUnclaimed { room_id: busy.clone() });

        assert!(!coordinator.registry().contains(&idle));
        assert!(coordinator.registry().contains(&busy));
    }

    #[test]
    fn empty_media_ref_is_malformed() {
        let (mut coordinator, _recorder) = coordinator();
        let (room_id, _) = room_with_creator(&mut coordinator);
        assert!(matches!(
            coordinator.apply_media_update(&room_id, "  ".into()),
            Err(CoordinatorError::Malformed(_))
        ));
    }

    #[test]
    fn watch_party_scenario() {
        let (mut coordinator, recorder) = coordinator();
        let room_id = coordinator.create_room();
        let creator = Uuid::new_v4();
        coordinator.join(&room_id, creator, true).unwrap();
        coordinator.dispatch(Command::MediaUploaded {
            room_id: room_id.clone(),
            media_ref: "/uploads/movie.mp4".into(),
        });
        coordinator
            .apply_playback(&room_id, creator, PlaybackAction::Play, 2.0)
            .unwrap();
        recorder.take();

        let joiner = Uuid::new_v4();
        let snapshot = coordinator.join(&room_id, joiner, false).unwrap();
        assert_eq!(
            snapshot,
            PlaybackSnapshot {
                playback_time: 2.0,
                is_playing: false,
                media_ref: "/uploads/movie.mp4".into(),
            }
        );

        coordinator
            .apply_playback(&room_id, creator, PlaybackAction::Seek, 12.0)
            .unwrap();
        coordinator
            .complete_sync(&room_id, creator, 12.0, false)
            .unwrap();
        let room = coordinator.registry().get(&room_id).unwrap();
        assert_eq!((room.playback_time(), room.is_playing()), (12.0, false));
        assert!(Recorder::received_by(&recorder.take(), joiner)
            .contains(&ServerEvent::SyncComplete {}));
    }

    #[tokio::test]
    async fn run_loop_serializes_commands_in_arrival_order() {
        let recorder = Recorder::default();
        let coordinator = Coordinator::new(recorder.clone(), true);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(coordinator.run(rx));

        let (reply, room) = oneshot::channel();
        tx.send(Command::CreateRoom { reply }).unwrap();
        let room_id = room.await.unwrap();

        let creator = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let join = |is_room_creator| ClientEvent::JoinRoom {
            room_id: room_id.clone(),
            is_room_creator,
        };
        let events = [
            (creator, join(true)),
            (guest, join(false)),
            (
                creator,
                ClientEvent::Play {
                    room_id: room_id.clone(),
                    current_time: 1.0,
                },
            ),
            (
                creator,
                ClientEvent::Seek {
                    room_id: room_id.clone(),
                    current_time: 7.5,
                },
            ),
            (
                creator,
                ClientEvent::Pause {
                    room_id: room_id.clone(),
                    current_time: 9.0,
                },
            ),
        ];
        for (connection, event) in events {
            tx.send(Command::Client { connection, event }).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let received = Recorder::received_by(&recorder.take(), guest);
        assert_eq!(
            received,
            vec![
                ServerEvent::Sync {
                    current_time: 0.0,
                    is_playing: false,
                    media_ref: String::new(),
                },
                ServerEvent::Play { current_time: 1.0 },
                ServerEvent::Seek { current_time: 7.5 },
                ServerEvent::Pause { current_time: 9.0 },
            ]
        );
    }
}
