use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Semantic sound events. What each one sounds like is up to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    ConfirmBeep,
    Notification,
    /// Spoken repetition count, 1 through 20.
    Count(u32),
    Finished,
}

impl fmt::Display for SoundCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundCue::ConfirmBeep => write!(f, "confirm beep"),
            SoundCue::Notification => write!(f, "notification"),
            SoundCue::Count(n) => write!(f, "count {}", n),
            SoundCue::Finished => write!(f, "finished"),
        }
    }
}

pub type Hook = Box<dyn FnOnce() + Send>;

/// Callbacks fired by a player during playback. Each fires at most once.
#[derive(Default)]
pub struct PlaybackHooks {
    on_halfway: Option<Hook>,
    on_done: Option<Hook>,
}

impl PlaybackHooks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_done<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            on_halfway: None,
            on_done: Some(Box::new(f)),
        }
    }

    pub fn with_halfway<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_halfway = Some(Box::new(f));
        self
    }

    pub fn halfway(&mut self) {
        if let Some(hook) = self.on_halfway.take() {
            hook();
        }
    }

    /// Fires the halfway hook first if playback ended before reaching it.
    pub fn done(mut self) {
        self.halfway();
        if let Some(hook) = self.on_done.take() {
            hook();
        }
    }
}

/// Plays a cue asynchronously and reports progress through `hooks`.
pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: SoundCue, hooks: PlaybackHooks);
}

/// Silences the system notification channel while the microphone is open.
pub trait NotificationMuter: Send + Sync {
    fn set_muted(&self, muted: bool);
}

/// Player for headless runs: logs each cue and completes it at once.
pub struct LogSoundPlayer {
    mute_all: bool,
}

impl LogSoundPlayer {
    pub fn new(mute_all: bool) -> Self {
        Self { mute_all }
    }
}

impl SoundPlayer for LogSoundPlayer {
    fn play(&self, cue: SoundCue, hooks: PlaybackHooks) {
        if self.mute_all {
            debug!("Sound muted, skipping {}", cue);
        } else {
            info!("Playing {}", cue);
        }
        hooks.done();
    }
}

#[derive(Default)]
pub struct LogMuter {
    muted: AtomicBool,
}

impl LogMuter {
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

impl NotificationMuter for LogMuter {
    fn set_muted(&self, muted: bool) {
        if self.muted.swap(muted, Ordering::Relaxed) != muted {
            info!(
                "Notification sounds {}",
                if muted { "muted" } else { "restored" }
            );
        }
    }
}
