use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::constants::{LOCAL_ECHO_WINDOW, SEEK_TOLERANCE_SECS};
use crate::player::{MediaPlayer, PlayerEvent};
use crate::protocol::{ClientEvent, ServerEvent};

/// Where this client stands in the room's join handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotJoined,
    /// Room creator; always interactive and the only one who can press Sync
    CreatorActive,
    /// Joined as a guest, controls locked until the creator syncs the room
    AwaitingSync,
    Synced,
}

impl Phase {
    pub fn is_interactive(self) -> bool {
        matches!(self, Phase::CreatorActive | Phase::Synced)
    }
}

/// Who caused the most recent playback change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    None,
    /// A local action was sent at `at` and may still be in flight
    Local { at: Instant },
    /// A remote update moved the player; its callback is still pending
    Remote,
}

/// What handling an inbound event did
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    Snapshot,
    Playback,
    /// Applied over a local action that was still in flight
    Overridden,
    MediaChanged(String),
    SyncReleased,
    MemberAwaitingSync,
    MemberJoined(Uuid),
    MemberLeft(Uuid),
    Rejected(String),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// A front-end control; the player has not changed yet
    Control,
    /// A player callback; the player already changed
    Callback,
}

/// Mirrors one client's player into the room and the room into the player.
pub struct Synchronizer<P> {
    player: P,
    room_id: Option<String>,
    phase: Phase,
    origin: EventOrigin,
    local_time: f64,
    local_playing: bool,
    awaiting_members: usize,
    echo_window: Duration,
}

impl<P: MediaPlayer> Synchronizer<P> {
    pub fn new(player: P) -> Self {
        Self {
            player,
            room_id: None,
            phase: Phase::NotJoined,
            origin: EventOrigin::None,
            local_time: 0.0,
            local_playing: false,
            awaiting_members: 0,
            echo_window: LOCAL_ECHO_WINDOW,
        }
    }

    #[cfg(test)]
    pub fn with_echo_window(mut self, window: Duration) -> Self {
        self.echo_window = window;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    pub fn is_playing(&self) -> bool {
        self.local_playing
    }

    pub fn is_awaiting_sync(&self) -> bool {
        self.phase == Phase::AwaitingSync
    }

    /// Guests who joined since the creator last pressed Sync
    pub fn awaiting_members(&self) -> usize {
        self.awaiting_members
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    #[cfg(test)]
    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn join(&mut self, room_id: String, is_creator: bool) -> ClientEvent {
        self.phase = if is_creator {
            Phase::CreatorActive
        } else {
            Phase::AwaitingSync
        };
        self.room_id = Some(room_id.clone());
        self.origin = EventOrigin::None;
        self.awaiting_members = 0;
        ClientEvent::JoinRoom {
            room_id,
            is_room_creator: is_creator,
        }
    }

    pub fn leave(&mut self) -> Option<ClientEvent> {
        let room_id = self.room_id.clone()?;
        self.reset();
        Some(ClientEvent::LeaveRoom { room_id })
    }

    /// Drop all session state, e.g. after the transport went away.
    pub fn reset(&mut self) {
        self.room_id = None;
        self.phase = Phase::NotJoined;
        self.origin = EventOrigin::None;
        self.awaiting_members = 0;
    }

    pub fn play(&mut self) -> Option<ClientEvent> {
        self.local_play(Trigger::Control)
    }

    pub fn pause(&mut self) -> Option<ClientEvent> {
        self.local_pause(Trigger::Control)
    }

    pub fn seek(&mut self, time: f64) -> Option<ClientEvent> {
        self.local_seek(time, Trigger::Control)
    }

    /// Announce a media ref that is already reachable by the other members.
    pub fn share_media(&mut self, media_ref: String) -> Option<ClientEvent> {
        let room_id = self.controllable_room()?;
        Some(ClientEvent::VideoUploaded { room_id, media_ref })
    }

    /// Creator only: freeze playback and push the local position as the
    /// room's authoritative state, releasing gated guests. A playing room is
    /// paused for everyone first, since sync-complete carries no position.
    pub fn press_sync(&mut self) -> Vec<ClientEvent> {
        if self.phase != Phase::CreatorActive {
            tracing::debug!("Sync is only available to the room creator");
            return Vec::new();
        }
        let Some(room_id) = self.room_id.clone() else {
            return Vec::new();
        };
        let current_time = self.player.position();
        let mut events = Vec::with_capacity(2);
        if self.local_playing {
            if let Err(e) = self.player.pause() {
                tracing::warn!("Failed to freeze playback for sync: {}", e);
                return Vec::new();
            }
            self.local_playing = false;
            events.push(ClientEvent::Pause {
                room_id: room_id.clone(),
                current_time,
            });
        }
        self.local_time = current_time;
        self.awaiting_members = 0;
        events.push(self.emit_local(ClientEvent::SyncComplete {
            room_id,
            current_time,
            is_playing: false,
        }));
        events
    }

    /// Feed every callback the player fired since the last tick.
    pub fn tick(&mut self) -> Vec<ClientEvent> {
        let events = self.player.poll_events();
        events
            .into_iter()
            .filter_map(|event| self.on_player_event(event))
            .collect()
    }

    pub fn on_player_event(&mut self, event: PlayerEvent) -> Option<ClientEvent> {
        if let PlayerEvent::Progress(time) = event {
            self.local_time = time;
            return None;
        }

        if self.origin == EventOrigin::Remote {
            self.origin = EventOrigin::None;
            // Earlier callbacks may still be queued; resync to where the player is now.
            self.local_playing = self.player.is_playing();
            self.local_time = self.player.position();
            tracing::trace!("Swallowed {:?} caused by a remote update", event);
            return None;
        }

        match event {
            PlayerEvent::Played => self.local_play(Trigger::Callback),
            PlayerEvent::Paused => self.local_pause(Trigger::Callback),
            PlayerEvent::Seeked(time) => self.local_seek(time, Trigger::Callback),
            PlayerEvent::Progress(_) => None,
        }
    }

    /// Apply an inbound event. Never produces an outbound event.
    pub fn handle_server_event(&mut self, event: ServerEvent) -> Reaction {
        if self.phase == Phase::NotJoined {
            return Reaction::Ignored;
        }

        match event {
            ServerEvent::Sync {
                current_time,
                is_playing,
                media_ref,
            } => {
                self.apply_snapshot(current_time, is_playing, &media_ref);
                Reaction::Snapshot
            }
            ServerEvent::Play { current_time } => self.apply_remote(current_time, Some(true)),
            ServerEvent::Pause { current_time } => self.apply_remote(current_time, Some(false)),
            ServerEvent::Seek { current_time } => self.apply_remote(current_time, None),
            ServerEvent::VideoUpdated { media_ref } => self.apply_media(media_ref),
            ServerEvent::SyncComplete {} => {
                if self.phase == Phase::AwaitingSync {
                    self.phase = Phase::Synced;
                    tracing::info!("Room synced; playback controls unlocked");
                    Reaction::SyncReleased
                } else {
                    Reaction::Ignored
                }
            }
            ServerEvent::NewUserJoined { .. } => {
                if self.phase == Phase::CreatorActive {
                    self.awaiting_members += 1;
                    Reaction::MemberAwaitingSync
                } else {
                    Reaction::Ignored
                }
            }
            ServerEvent::NewUser { connection_id } => Reaction::MemberJoined(connection_id),
            ServerEvent::UserLeft { connection_id } => Reaction::MemberLeft(connection_id),
            ServerEvent::Error { message } => {
                tracing::warn!("Server rejected an event: {}", message);
                Reaction::Rejected(message)
            }
        }
    }

    fn local_play(&mut self, trigger: Trigger) -> Option<ClientEvent> {
        // A queued Played callback is stale once the player is paused again.
        if self.local_playing || (trigger == Trigger::Callback && !self.player.is_playing()) {
            return None;
        }
        let current_time = self.player.position();
        let Some(room_id) = self.controllable_room() else {
            if trigger == Trigger::Callback {
                self.revert_locked(|player| player.pause());
            }
            return None;
        };
        if trigger == Trigger::Control {
            if let Err(e) = self.player.play() {
                tracing::warn!("Playback error: {}", e);
                return None;
            }
        }
        self.local_playing = true;
        self.local_time = current_time;
        Some(self.emit_local(ClientEvent::Play {
            room_id,
            current_time,
        }))
    }

    fn local_pause(&mut self, trigger: Trigger) -> Option<ClientEvent> {
        if !self.local_playing || (trigger == Trigger::Callback && self.player.is_playing()) {
            return None;
        }
        let Some(room_id) = self.controllable_room() else {
            if trigger == Trigger::Callback {
                self.revert_locked(|player| player.play());
            }
            return None;
        };
        if trigger == Trigger::Control {
            if let Err(e) = self.player.pause() {
                tracing::warn!("Pause error: {}", e);
                return None;
            }
        }
        let current_time = self.player.position();
        self.local_playing = false;
        self.local_time = current_time;
        Some(self.emit_local(ClientEvent::Pause {
            room_id,
            current_time,
        }))
    }

    fn local_seek(&mut self, time: f64, trigger: Trigger) -> Option<ClientEvent> {
        if !time.is_finite() {
            return None;
        }
        let time = time.max(0.0);
        if (time - self.local_time).abs() < SEEK_TOLERANCE_SECS {
            return None;
        }
        let Some(room_id) = self.controllable_room() else {
            if trigger == Trigger::Callback {
                let back = self.local_time;
                self.revert_locked(|player| player.seek(back));
            }
            return None;
        };
        if trigger == Trigger::Control {
            if let Err(e) = self.player.seek(time) {
                tracing::warn!("Seek error: {}", e);
                return None;
            }
        }
        self.local_time = time;
        Some(self.emit_local(ClientEvent::Seek {
            room_id,
            current_time: time,
        }))
    }

    /// The room's order wins: an update that races a local action is still
    /// applied, and only its player callbacks are kept from going back out.
    fn apply_remote(&mut self, time: f64, playing: Option<bool>) -> Reaction {
        let raced_local = match self.origin {
            EventOrigin::Local { at } => at.elapsed() < self.echo_window,
            _ => false,
        };
        self.origin = EventOrigin::None;
        if self.converge(time, playing) {
            self.origin = EventOrigin::Remote;
        }
        if raced_local {
            tracing::debug!("Remote update at {} overrode a local action in flight", time);
            Reaction::Overridden
        } else {
            Reaction::Playback
        }
    }

    fn apply_snapshot(&mut self, time: f64, is_playing: bool, media_ref: &str) {
        self.origin = EventOrigin::None;
        if !media_ref.is_empty() && self.player.media() != Some(media_ref) {
            self.load_media(media_ref);
        }
        if self.converge(time, Some(is_playing)) {
            self.origin = EventOrigin::Remote;
        }
    }

    fn apply_media(&mut self, media_ref: String) -> Reaction {
        if self.player.media() == Some(media_ref.as_str()) {
            return Reaction::Ignored;
        }
        if !self.load_media(&media_ref) {
            return Reaction::Ignored;
        }
        self.origin = EventOrigin::None;
        Reaction::MediaChanged(media_ref)
    }

    fn load_media(&mut self, media_ref: &str) -> bool {
        match self.player.load(media_ref) {
            Ok(()) => {
                self.local_time = 0.0;
                self.local_playing = false;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", media_ref, e);
                false
            }
        }
    }

    /// Move the player to the remote state; returns whether anything changed.
    fn converge(&mut self, time: f64, playing: Option<bool>) -> bool {
        if !time.is_finite() || time < 0.0 {
            tracing::warn!("Ignoring remote position {}", time);
            return false;
        }
        if self.player.media().is_none() {
            self.local_time = time;
            return false;
        }

        let mut changed = false;
        if (time - self.local_time).abs() >= SEEK_TOLERANCE_SECS
            || (self.player.position() - time).abs() >= SEEK_TOLERANCE_SECS
        {
            match self.player.seek(time) {
                Ok(()) => changed = true,
                Err(e) => tracing::warn!("Remote seek failed: {}", e),
            }
        }
        self.local_time = time;

        match playing {
            Some(true) if !self.local_playing => match self.player.play() {
                Ok(()) => {
                    self.local_playing = true;
                    changed = true;
                }
                Err(e) => tracing::warn!("Remote play failed: {}", e),
            },
            Some(false) if self.local_playing => match self.player.pause() {
                Ok(()) => {
                    self.local_playing = false;
                    changed = true;
                }
                Err(e) => tracing::warn!("Remote pause failed: {}", e),
            },
            _ => {}
        }
        changed
    }

    fn controllable_room(&self) -> Option<String> {
        if !self.phase.is_interactive() {
            tracing::debug!("Playback controls locked ({:?})", self.phase);
            return None;
        }
        self.room_id.clone()
    }

    /// Undo a change the user made through the player itself while gated.
    fn revert_locked<F>(&mut self, undo: F)
    where
        F: FnOnce(&mut P) -> Result<(), String>,
    {
        if self.phase != Phase::AwaitingSync {
            return;
        }
        match undo(&mut self.player) {
            Ok(()) => tracing::debug!("Reverted local change while awaiting sync"),
            Err(e) => tracing::warn!("Failed to revert local change: {}", e),
        }
    }

    fn emit_local(&mut self, event: ClientEvent) -> ClientEvent {
        self.origin = EventOrigin::Local { at: Instant::now() };
        event
    }
}
