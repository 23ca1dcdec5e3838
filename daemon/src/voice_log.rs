use shared::ipc::VoiceLogEntry;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const SESSION_SWITCH_TRIGGER: &str = "session_switch";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What the recognizer heard, grouped into chunks that close on each
/// trigger. Chunks are appended to a JSON-lines file; writing is best
/// effort and never fails the caller.
pub struct VoiceLog {
    path: PathBuf,
    session_id: u64,
    chunk_started: u64,
    texts: Vec<String>,
}

impl VoiceLog {
    pub fn new(path: PathBuf) -> Self {
        let now = now_ms();
        Self {
            path,
            session_id: now,
            chunk_started: now,
            texts: Vec::new(),
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("voice_logs.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending_texts(&self) -> &[String] {
        &self.texts
    }

    pub fn add_text(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.texts.push(text.to_string());
        }
    }

    /// Close the open chunk, then begin a new session id.
    pub fn start_new_session(&mut self) {
        self.finalize(SESSION_SWITCH_TRIGGER, None, false);
        self.session_id = now_ms();
        self.chunk_started = self.session_id;
    }

    pub fn on_trigger(&mut self, trigger: &str, routine_id: Option<&str>, is_basic_mode: bool) {
        self.finalize(trigger, routine_id, is_basic_mode);
    }

    pub fn read_all(&self) -> Vec<VoiceLogEntry> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read voice log: {}", e);
                return Vec::new();
            }
        };
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping malformed voice log line: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.texts.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Voice log cleared"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear voice log: {}", e),
        }
    }

    fn finalize(&mut self, trigger: &str, routine_id: Option<&str>, is_basic_mode: bool) {
        let now = now_ms();
        if self.texts.is_empty() {
            self.chunk_started = now;
            return;
        }
        let entry = VoiceLogEntry {
            session_id: self.session_id,
            started_at: self.chunk_started,
            ended_at: now,
            trigger: trigger.to_string(),
            routine_id: routine_id.map(str::to_string),
            is_basic_mode,
            texts: std::mem::take(&mut self.texts),
        };
        if let Err(e) = self.append(&entry) {
            warn!("Failed to write voice log: {}", e);
        }
        self.chunk_started = now;
    }

    fn append(&self, entry: &VoiceLogEntry) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
