use std::time::Instant;

/// Callbacks a player fires, whether a user or code caused the change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Played,
    Paused,
    Seeked(f64),
    /// Periodic position report while playing
    Progress(f64),
}

/// Controls the synchronizer needs from a media player
pub trait MediaPlayer {
    /// Load a media reference, resetting position to zero
    fn load(&mut self, media_ref: &str) -> Result<(), String>;

    fn play(&mut self) -> Result<(), String>;

    fn pause(&mut self) -> Result<(), String>;

    /// Seek to a specific timestamp (in seconds)
    fn seek(&mut self, seconds: f64) -> Result<(), String>;

    /// Current playback position (in seconds)
    fn position(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn media(&self) -> Option<&str>;

    /// Take every callback fired since the last poll.
    fn poll_events(&mut self) -> Vec<PlayerEvent>;
}

/// Headless player driven by the wall clock
#[derive(Debug, Default)]
pub struct ClockPlayer {
    media: Option<String>,
    anchor_position: f64,
    playing_since: Option<Instant>,
    pending: Vec<PlayerEvent>,
}

impl ClockPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaPlayer for ClockPlayer {
    fn load(&mut self, media_ref: &str) -> Result<(), String> {
        if media_ref.trim().is_empty() {
            return Err("Empty media reference".to_string());
        }
        self.media = Some(media_ref.to_string());
        self.anchor_position = 0.0;
        self.playing_since = None;
        self.pending.clear();
        Ok(())
    }

    fn play(&mut self) -> Result<(), String> {
        if self.media.is_none() {
            return Err("No media loaded".to_string());
        }
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
            self.pending.push(PlayerEvent::Played);
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), String> {
        if self.playing_since.is_some() {
            self.anchor_position = self.position();
            self.playing_since = None;
            self.pending.push(PlayerEvent::Paused);
        }
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<(), String> {
        if self.media.is_none() {
            return Err("No media loaded".to_string());
        }
        if !seconds.is_finite() {
            return Err(format!("Invalid seek target {seconds}"));
        }
        let target = seconds.max(0.0);
        self.anchor_position = target;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
        self.pending.push(PlayerEvent::Seeked(target));
        Ok(())
    }

    fn position(&self) -> f64 {
        match self.playing_since {
            Some(since) => self.anchor_position + since.elapsed().as_secs_f64(),
            None => self.anchor_position,
        }
    }

    fn is_playing(&self) -> bool {
        self.playing_since.is_some()
    }

    fn media(&self) -> Option<&str> {
        self.media.as_deref()
    }

    fn poll_events(&mut self) -> Vec<PlayerEvent> {
        let mut events = std::mem::take(&mut self.pending);
        if self.is_playing() {
            events.push(PlayerEvent::Progress(self.position()));
        }
        events
    }
}
