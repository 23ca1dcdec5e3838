// Common test helpers for repcued daemon tests
//
// This module provides:
// - Scripted audio input and speech engine for driving the voice pipeline
// - A recording sound player
// - Model bundle fixtures on disk
// - User interaction and output formatting for hardware tests

#![allow(dead_code)]

use repcued::audio::{AudioInput, CaptureError, CaptureFormat, InputDevice, ReleaseHandle};
use repcued::cues::{NotificationMuter, PlaybackHooks, SoundCue, SoundPlayer};
use repcued::recognizer::{
    parse_engine_payload, EngineError, SpeechEngine, SpeechModel, StreamingRecognizer, Transcript,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Produces `frames` full reads, then idles until released.
struct ScriptedDevice {
    frames: usize,
    release: ReleaseHandle,
}

impl InputDevice for ScriptedDevice {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        if self.release.is_released() {
            return Err(CaptureError::Released);
        }
        if self.frames == 0 {
            thread::sleep(Duration::from_millis(5));
            return Ok(0);
        }
        self.frames -= 1;
        buf.fill(0);
        Ok(buf.len())
    }

    fn release_handle(&self) -> ReleaseHandle {
        self.release.clone()
    }
}

/// Microphone stand-in. Every open hands out `frames_per_open` frames.
pub struct ScriptedInput {
    frames_per_open: usize,
    opens: AtomicUsize,
}

impl ScriptedInput {
    pub fn new(frames_per_open: usize) -> Self {
        Self {
            frames_per_open,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl AudioInput for ScriptedInput {
    fn min_buffer_bytes(&self, _format: CaptureFormat) -> usize {
        4096
    }

    fn open(
        &self,
        _format: CaptureFormat,
        _buffer_bytes: usize,
    ) -> Result<Box<dyn InputDevice>, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            frames: self.frames_per_open,
            release: ReleaseHandle::new(|| {}),
        }))
    }
}

/// Replays engine JSON payloads, one per accepted frame, shared across
/// recognizers so a restarted session continues the script.
pub struct ScriptedEngine {
    payloads: Arc<Mutex<VecDeque<String>>>,
    loaded: AtomicBool,
}

impl ScriptedEngine {
    pub fn new(payloads: &[&str]) -> Self {
        Self {
            payloads: Arc::new(Mutex::new(
                payloads.iter().map(|p| p.to_string()).collect(),
            )),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn was_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

impl SpeechEngine for ScriptedEngine {
    fn load_model(&self, dir: &Path) -> Result<Arc<dyn SpeechModel>, EngineError> {
        if !dir.join("conf").is_dir() {
            return Err(EngineError::Model(format!("no conf in {}", dir.display())));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(Arc::new(ScriptedModel {
            payloads: Arc::clone(&self.payloads),
        }))
    }
}

struct ScriptedModel {
    payloads: Arc<Mutex<VecDeque<String>>>,
}

impl SpeechModel for ScriptedModel {
    fn recognizer(&self, _sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>, EngineError> {
        Ok(Box::new(ScriptedRecognizer {
            payloads: Arc::clone(&self.payloads),
        }))
    }
}

struct ScriptedRecognizer {
    payloads: Arc<Mutex<VecDeque<String>>>,
}

impl StreamingRecognizer for ScriptedRecognizer {
    fn accept(&mut self, _pcm_le: &[u8]) -> Result<Transcript, EngineError> {
        let next = self.payloads.lock().unwrap().pop_front();
        match next {
            Some(payload) => parse_engine_payload(&payload),
            None => Ok(Transcript::Partial(String::new())),
        }
    }

    fn flush(&mut self) -> Result<Transcript, EngineError> {
        Ok(Transcript::Final(String::new()))
    }
}

/// Records every cue and completes playback at once.
#[derive(Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<SoundCue>>,
}

impl RecordingPlayer {
    pub fn played(&self) -> Vec<SoundCue> {
        self.played.lock().unwrap().clone()
    }
}

impl SoundPlayer for RecordingPlayer {
    fn play(&self, cue: SoundCue, mut hooks: PlaybackHooks) {
        self.played.lock().unwrap().push(cue);
        hooks.halfway();
        hooks.done();
    }
}

#[derive(Default)]
pub struct RecordingMuter {
    changes: Mutex<Vec<bool>>,
}

impl RecordingMuter {
    pub fn changes(&self) -> Vec<bool> {
        self.changes.lock().unwrap().clone()
    }
}

impl NotificationMuter for RecordingMuter {
    fn set_muted(&self, muted: bool) {
        self.changes.lock().unwrap().push(muted);
    }
}

/// Lay out a minimal model directory under `root/name`.
pub fn write_model_bundle(root: &Path, name: &str) {
    let model = root.join(name);
    for dir in ["conf", "am", "graph"] {
        std::fs::create_dir_all(model.join(dir)).unwrap();
    }
    std::fs::write(model.join("conf").join("model.conf"), "--sample-frequency=16000\n").unwrap();
    std::fs::write(model.join("am").join("final.mdl"), [0u8; 16]).unwrap();
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().to_lowercase() == "y"
}

/// Print a section header
pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

/// Print an error message
pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}
