use serde::{Deserialize, Serialize};
use shared::routine::{demo_routine, NamedRoutine, MAX_DURATION_SECONDS, MIN_DURATION_SECONDS};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BASIC_DURATION: u32 = 30;

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("Preferences I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid preferences file: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Preferences {
    #[serde(default = "default_true")]
    pub is_basic_mode: bool,
    #[serde(default = "default_basic_mode_duration")]
    pub basic_mode_duration: u32,
    #[serde(default)]
    pub current_routine_id: Option<String>,
    #[serde(default)]
    pub routines: Vec<NamedRoutine>,
    #[serde(default = "default_true")]
    pub voice_control_enabled: bool,
    #[serde(default)]
    pub mute_all_sounds: bool,
}

fn default_true() -> bool {
    true
}

fn default_basic_mode_duration() -> u32 {
    DEFAULT_BASIC_DURATION
}

pub fn clamp_duration(seconds: u32) -> u32 {
    seconds.clamp(MIN_DURATION_SECONDS, MAX_DURATION_SECONDS)
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            is_basic_mode: true,
            basic_mode_duration: DEFAULT_BASIC_DURATION,
            current_routine_id: None,
            routines: Vec::new(),
            voice_control_enabled: true,
            mute_all_sounds: false,
        }
    }
}

impl Preferences {
    /// Seed the demo routine when none exist. Returns true if it seeded.
    pub fn seed_demo_if_empty(&mut self) -> bool {
        if !self.routines.is_empty() {
            return false;
        }
        let demo = demo_routine();
        self.current_routine_id = Some(demo.id.clone());
        self.routines.push(demo);
        true
    }

    pub fn routine(&self, id: &str) -> Option<&NamedRoutine> {
        self.routines.iter().find(|r| r.id == id)
    }

    /// Selected routine, falling back to the first one.
    pub fn current_routine(&self) -> Option<&NamedRoutine> {
        self.current_routine_id
            .as_deref()
            .and_then(|id| self.routine(id))
            .or_else(|| self.routines.first())
    }

    pub fn set_basic_duration(&mut self, seconds: u32) -> u32 {
        self.basic_mode_duration = clamp_duration(seconds);
        self.basic_mode_duration
    }

    /// Add imported routines, replacing any with the same id.
    pub fn merge_routines(&mut self, imported: Vec<NamedRoutine>) -> usize {
        let count = imported.len();
        for routine in imported {
            match self.routines.iter_mut().find(|r| r.id == routine.id) {
                Some(existing) => *existing = routine,
                None => self.routines.push(routine),
            }
        }
        count
    }

    fn normalize(mut self) -> Self {
        self.basic_mode_duration = clamp_duration(self.basic_mode_duration);
        self.seed_demo_if_empty();
        self
    }
}

pub trait PreferencesStore: Send + Sync {
    fn load(&self) -> Result<Preferences, PrefsError>;

    fn save(&self, prefs: &Preferences) -> Result<(), PrefsError>;
}

/// Load, or fall back to first-run defaults when the store is unreadable.
pub fn load_or_default(store: &dyn PreferencesStore) -> Preferences {
    match store.load() {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!("Failed to load preferences, using defaults: {}", e);
            Preferences::default().normalize()
        }
    }
}

/// Preferences as pretty JSON in a single file.
pub struct JsonPreferences {
    path: PathBuf,
}

impl JsonPreferences {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("preferences.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferencesStore for JsonPreferences {
    fn load(&self) -> Result<Preferences, PrefsError> {
        if !self.path.exists() {
            info!(
                "No preferences at {}, starting with defaults",
                self.path.display()
            );
            return Ok(Preferences::default().normalize());
        }
        let raw = fs::read_to_string(&self.path)?;
        let prefs: Preferences = serde_json::from_str(&raw)?;
        debug!("Loaded preferences from {}", self.path.display());
        Ok(prefs.normalize())
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(prefs)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved preferences to {}", self.path.display());
        Ok(())
    }
}
