use std::{ops::ControlFlow, path::PathBuf, sync::Arc};

use crate::api::ServerApi;
use crate::invite::build_invite_url;
use crate::player::{ClockPlayer, MediaPlayer};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::sync::SyncClient;
use crate::synchronizer::{Phase, Reaction, Synchronizer};
use crate::utils::format_time;

const HELP: &str =
    "commands: play | pause | seek <seconds> | sync | upload <path> | media <ref> | status | invite | leave";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Play,
    Pause,
    Seek(f64),
    Sync,
    Upload(PathBuf),
    Media(String),
    Status,
    Invite,
    Leave,
    Help,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "play" => ConsoleCommand::Play,
        "pause" => ConsoleCommand::Pause,
        "seek" => {
            let seconds: f64 = arg
                .parse()
                .map_err(|_| format!("seek needs a number of seconds, got {arg:?}"))?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(format!("seek target must be a non-negative number, got {arg}"));
            }
            ConsoleCommand::Seek(seconds)
        }
        "sync" => ConsoleCommand::Sync,
        "upload" if !arg.is_empty() => ConsoleCommand::Upload(PathBuf::from(arg)),
        "upload" => return Err("upload needs a file path".into()),
        "media" if !arg.is_empty() => ConsoleCommand::Media(arg.to_string()),
        "media" => return Err("media needs a reference".into()),
        "status" => ConsoleCommand::Status,
        "invite" => ConsoleCommand::Invite,
        "leave" | "quit" | "exit" => ConsoleCommand::Leave,
        "help" | "?" => ConsoleCommand::Help,
        "" => return Err(HELP.into()),
        other => return Err(format!("unknown command {other:?}; {HELP}")),
    };
    Ok(command)
}

/// Headless front-end: one synchronizer, one socket, stdin controls
pub struct ConsoleApp {
    sync: Synchronizer<ClockPlayer>,
    transport: Arc<SyncClient>,
    api: ServerApi,
    server_url: String,
}

impl ConsoleApp {
    pub fn new(transport: Arc<SyncClient>, api: ServerApi, server_url: String) -> Self {
        Self {
            sync: Synchronizer::new(ClockPlayer::new()),
            transport,
            api,
            server_url,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer<ClockPlayer> {
        &self.sync
    }

    pub fn join(&mut self, room_id: String, is_creator: bool) {
        let event = self.sync.join(room_id.clone(), is_creator);
        self.dispatch(Some(event));
        if is_creator {
            println!("Created room {room_id}. Share it with: invite");
        } else {
            println!("Joined room {room_id}");
            println!("Waiting for the host to sync...");
        }
    }

    pub async fn handle_command(&mut self, command: ConsoleCommand) -> ControlFlow<()> {
        match command {
            ConsoleCommand::Play => {
                let event = self.sync.play();
                self.dispatch_or_explain(event);
            }
            ConsoleCommand::Pause => {
                let event = self.sync.pause();
                self.dispatch_or_explain(event);
            }
            ConsoleCommand::Seek(seconds) => {
                let event = self.sync.seek(seconds);
                self.dispatch_or_explain(event);
            }
            ConsoleCommand::Sync => {
                if self.sync.phase() != Phase::CreatorActive {
                    println!("Only the room creator can sync");
                } else {
                    let events = self.sync.press_sync();
                    if !events.is_empty() {
                        println!("Synced everyone at {}", format_time(self.sync.local_time()));
                    }
                    for event in events {
                        self.dispatch(Some(event));
                    }
                }
            }
            ConsoleCommand::Upload(path) => self.upload(path).await,
            ConsoleCommand::Media(media_ref) => {
                let event = self.sync.share_media(media_ref);
                self.dispatch_or_explain(event);
            }
            ConsoleCommand::Status => self.print_status(),
            ConsoleCommand::Invite => match self.sync.room_id() {
                Some(room_id) => println!("{}", build_invite_url(room_id, Some(&self.server_url))),
                None => println!("Not in a room"),
            },
            ConsoleCommand::Leave => {
                let event = self.sync.leave();
                self.dispatch(event);
                return ControlFlow::Break(());
            }
            ConsoleCommand::Help => println!("{HELP}"),
        }
        ControlFlow::Continue(())
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        match self.sync.handle_server_event(event) {
            Reaction::Snapshot => {
                let media = self.sync.player().media().unwrap_or("no media yet");
                println!(
                    "Room state: {} at {} ({})",
                    if self.sync.is_playing() { "playing" } else { "paused" },
                    format_time(self.sync.local_time()),
                    media
                );
                if self.sync.is_awaiting_sync() {
                    println!("Waiting for the host to sync...");
                }
            }
            Reaction::Playback => tracing::debug!(
                "Applied remote playback at {}",
                format_time(self.sync.local_time())
            ),
            Reaction::Overridden => println!(
                "Room moved on before your last action landed; now at {}",
                format_time(self.sync.local_time())
            ),
            Reaction::MediaChanged(media_ref) => match self.api.media_url(&media_ref) {
                Ok(url) => println!("Now sharing {url}"),
                Err(_) => println!("Now sharing {media_ref}"),
            },
            Reaction::SyncReleased => println!("Synced with the room; controls unlocked"),
            Reaction::MemberAwaitingSync => println!(
                "{} new viewer(s) waiting; type `sync` when ready",
                self.sync.awaiting_members()
            ),
            Reaction::MemberJoined(id) => println!("Viewer {id} joined"),
            Reaction::MemberLeft(id) => println!("Viewer {id} left"),
            Reaction::Rejected(message) => println!("Server: {message}"),
            Reaction::Ignored => {}
        }
    }

    /// Progress tick: feed player callbacks through the synchronizer.
    pub fn tick(&mut self) {
        for event in self.sync.tick() {
            self.dispatch(Some(event));
        }
    }

    async fn upload(&mut self, path: PathBuf) {
        // Gated viewers can upload but not switch the room's media.
        let room_id = self
            .sync
            .phase()
            .is_interactive()
            .then(|| self.sync.room_id().map(str::to_string))
            .flatten();
        println!("Uploading {}...", path.display());
        match self.api.upload(&path, room_id.as_deref()).await {
            Ok(media_ref) if room_id.is_some() => println!("Uploaded as {media_ref}"),
            Ok(media_ref) => println!("Uploaded as {media_ref}; not shared while awaiting sync"),
            Err(e) => println!("Upload failed: {e:#}"),
        }
    }

    fn print_status(&self) {
        let phase = match self.sync.phase() {
            Phase::NotJoined => "not in a room",
            Phase::CreatorActive => "host",
            Phase::AwaitingSync => "awaiting sync",
            Phase::Synced => "synced",
        };
        println!(
            "room {} | {} | {} {} | media {}",
            self.sync.room_id().unwrap_or("-"),
            phase,
            if self.sync.is_playing() { "playing" } else { "paused" },
            format_time(self.sync.player().position()),
            self.sync.player().media().unwrap_or("-"),
        );

        let stats = self.transport.stats_snapshot();
        let rtt = stats
            .last_rtt_ms
            .map(|ms| format!("{ms:.0} ms"))
            .unwrap_or_else(|| "-".into());
        let endpoint = match (&stats.endpoint_label, self.transport.is_connected()) {
            (Some(label), true) => label.as_str(),
            _ => "disconnected",
        };
        println!(
            "{} for {:.0}s | sent {} ({} B) | received {} ({} B, {} undecodable) | last message {:.1}s ago | rtt {}",
            endpoint,
            stats.connected_duration.unwrap_or(0.0),
            stats.messages_out,
            stats.bytes_out,
            stats.messages_in,
            stats.bytes_in,
            stats.undecodable,
            stats.last_message_age.unwrap_or(0.0),
            rtt
        );
    }

    fn dispatch_or_explain(&self, event: Option<ClientEvent>) {
        if event.is_none() && self.sync.is_awaiting_sync() {
            println!("Controls are locked until the host syncs");
        }
        self.dispatch(event);
    }

    fn dispatch(&self, event: Option<ClientEvent>) {
        let Some(event) = event else {
            return;
        };
        if let Err(e) = self.transport.send(&event) {
            tracing::warn!("Failed to send {:?}: {:#}", event, e);
        }
    }
}
