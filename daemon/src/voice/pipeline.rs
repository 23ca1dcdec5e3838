use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audio::{
    capture_buffer_bytes, frame_samples, samples_to_le_bytes, AudioInput, CaptureError,
    CaptureFormat, InputDevice, ReleaseHandle, MIN_BUFFER_BYTES, READ_CHUNK_SAMPLES,
};
use crate::recognizer::{ModelError, ModelLoader, ModelState, SpeechModel, StreamingRecognizer, Transcript};

use super::commands::{normalize_transcript, CommandInterpreter, DEFAULT_DEBOUNCE};
use super::{VoiceControl, VoiceListener};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub format: CaptureFormat,
    pub min_buffer_bytes: usize,
    pub chunk_samples: usize,
    pub debounce: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            format: CaptureFormat::default(),
            min_buffer_bytes: MIN_BUFFER_BYTES,
            chunk_samples: READ_CHUNK_SAMPLES,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

struct CaptureSession {
    id: u64,
    stop: Arc<AtomicBool>,
    release: ReleaseHandle,
    thread: Option<JoinHandle<()>>,
}

struct Inner {
    audio: Arc<dyn AudioInput>,
    listener: Arc<dyn VoiceListener>,
    settings: PipelineSettings,
    interpreter: Mutex<CommandInterpreter>,
    model: Mutex<Option<Arc<dyn SpeechModel>>>,
    session: Mutex<Option<CaptureSession>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    next_session: AtomicU64,
    shut_down: AtomicBool,
    model_state: watch::Sender<ModelState>,
    listening: watch::Sender<bool>,
    heard_text: watch::Sender<String>,
}

/// Microphone to recognizer to command interpreter.
///
/// Each listening session runs on its own `voice-capture` thread. The thread
/// only reads audio, feeds the recognizer and hands results to the
/// [`VoiceListener`]; it never touches session state directly. Cloning
/// yields another handle to the same pipeline.
#[derive(Clone)]
pub struct VoicePipeline {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoicePipeline {
    pub fn new(
        audio: Arc<dyn AudioInput>,
        listener: Arc<dyn VoiceListener>,
        settings: PipelineSettings,
    ) -> Self {
        let interpreter = CommandInterpreter::new(settings.debounce);
        Self {
            inner: Arc::new(Inner {
                audio,
                listener,
                settings,
                interpreter: Mutex::new(interpreter),
                model: Mutex::new(None),
                session: Mutex::new(None),
                retired: Mutex::new(Vec::new()),
                next_session: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                model_state: watch::Sender::new(ModelState::Loading),
                listening: watch::Sender::new(false),
                heard_text: watch::Sender::new(String::new()),
            }),
        }
    }

    pub fn subscribe_model_state(&self) -> watch::Receiver<ModelState> {
        self.inner.model_state.subscribe()
    }

    pub fn subscribe_listening(&self) -> watch::Receiver<bool> {
        self.inner.listening.subscribe()
    }

    pub fn subscribe_heard_text(&self) -> watch::Receiver<String> {
        self.inner.heard_text.subscribe()
    }

    /// Blocking: materialize and load the model, publishing each state.
    pub fn load_model(&self, loader: &ModelLoader) {
        if matches!(self.model_state(), ModelState::Failed(_)) {
            warn!("Model load skipped: model already failed");
            return;
        }
        let result = loader.load(|state| self.inner.set_model_state(state));
        self.install(result);
    }

    /// Publish the outcome of a model load. Ignored after shutdown.
    pub fn install(&self, result: Result<Arc<dyn SpeechModel>, ModelError>) {
        let mut installed = lock(&self.inner.model);
        if self.inner.shut_down.load(Ordering::SeqCst) {
            debug!("Pipeline shut down, discarding model load result");
            return;
        }
        match result {
            Ok(model) => {
                *installed = Some(model);
                self.inner.set_model_state(ModelState::Ready);
                info!("Voice model ready");
            }
            Err(e) => {
                error!("Failed to load voice model: {}", e);
                self.inner
                    .set_model_state(ModelState::Failed(e.failure_message()));
            }
        }
    }

    /// Drop the loaded model and load it again. Not allowed once failed.
    pub fn reinitialize(&self, loader: &ModelLoader) {
        if matches!(self.model_state(), ModelState::Failed(_)) {
            warn!("Reinitialize ignored: model failed, restart required");
            return;
        }
        self.stop_listening();
        lock(&self.inner.model).take();
        self.inner.model_state.send_replace(ModelState::Loading);
        self.load_model(loader);
    }

    /// Stop capture, wait for every capture thread and release the model.
    /// Blocks for at most about one frame per live session.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down voice pipeline");
        let session = lock(&self.inner.session).take();
        let mut threads: Vec<JoinHandle<()>> = lock(&self.inner.retired).drain(..).collect();
        if let Some(mut session) = session {
            session.stop.store(true, Ordering::SeqCst);
            session.release.release();
            threads.extend(session.thread.take());
        }
        for handle in threads {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
        lock(&self.inner.model).take();
        self.inner.listening.send_replace(false);
        self.inner.heard_text.send_replace(String::new());
    }
}

impl VoiceControl for VoicePipeline {
    fn start_listening(&self) {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if *inner.model_state.borrow() != ModelState::Ready {
            debug!("Cannot start listening: model not ready");
            return;
        }
        let model = match lock(&inner.model).clone() {
            Some(model) => model,
            None => return,
        };

        let mut slot = lock(&inner.session);
        if let Some(session) = slot.as_ref() {
            if !session.stop.load(Ordering::SeqCst) {
                debug!("Already listening");
                return;
            }
        }
        if let Some(mut stopping) = slot.take() {
            let mut retired = lock(&inner.retired);
            retired.retain(|h| !h.is_finished());
            retired.extend(stopping.thread.take());
        }

        let settings = &inner.settings;
        let recognizer = match model.recognizer(settings.format.sample_rate) {
            Ok(recognizer) => recognizer,
            Err(e) => {
                warn!("Failed to create recognizer: {}", e);
                return;
            }
        };

        let device_min = inner.audio.min_buffer_bytes(settings.format);
        let buffer_bytes = capture_buffer_bytes(device_min, settings.min_buffer_bytes);
        let frame = frame_samples(buffer_bytes, settings.chunk_samples);

        let device = match inner.audio.open(settings.format, buffer_bytes) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to open input device: {}", e);
                inner.listening.send_replace(false);
                return;
            }
        };

        let id = inner.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let stop = Arc::new(AtomicBool::new(false));
        let release = device.release_handle();

        inner.heard_text.send_replace(String::new());
        inner.listening.send_replace(true);

        let thread_inner = Arc::clone(inner);
        let thread_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || capture_loop(thread_inner, id, device, recognizer, frame, thread_stop));

        match spawned {
            Ok(handle) => {
                info!(session = id, buffer_bytes, frame, "Listening");
                *slot = Some(CaptureSession {
                    id,
                    stop,
                    release,
                    thread: Some(handle),
                });
            }
            Err(e) => {
                error!("Failed to spawn capture thread: {}", e);
                release.release();
                inner.listening.send_replace(false);
            }
        }
    }

    fn stop_listening(&self) {
        if let Some(session) = lock(&self.inner.session).as_ref() {
            if !session.stop.swap(true, Ordering::SeqCst) {
                debug!(session = session.id, "Stopping capture");
            }
            session.release.release();
        }
        self.inner.listening.send_replace(false);
    }

    fn is_listening(&self) -> bool {
        *self.inner.listening.borrow()
    }

    fn heard_text(&self) -> String {
        self.inner.heard_text.borrow().clone()
    }

    fn model_state(&self) -> ModelState {
        self.inner.model_state.borrow().clone()
    }
}

impl Inner {
    /// `Failed` is terminal until restart.
    fn set_model_state(&self, state: ModelState) {
        self.model_state.send_if_modified(|current| {
            if matches!(current, ModelState::Failed(_)) || *current == state {
                return false;
            }
            debug!("Model state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    /// Only the current session may publish heard text; a retired one is
    /// still draining.
    fn deliver(&self, session: u64, transcript: Transcript) {
        {
            let slot = lock(&self.session);
            if slot.as_ref().map(|s| s.id) == Some(session) {
                self.heard_text.send_replace(transcript.text().to_string());
            }
        }

        let text = match transcript {
            Transcript::Final(text) if !text.trim().is_empty() => text,
            _ => return,
        };
        self.listener.on_final_transcript(&text);

        let normalized = normalize_transcript(&text);
        let command = lock(&self.interpreter).interpret(&normalized, Instant::now());
        if let Some(command) = command {
            info!(%command, "Voice command");
            self.listener.on_command(command);
        }
    }

    fn finish_session(&self, id: u64) {
        let mut slot = lock(&self.session);
        if slot.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        // Our own thread: dropping the handle detaches it.
        slot.take();
        self.listening.send_replace(false);
        self.heard_text.send_replace(String::new());
        debug!(session = id, "Capture session finished");
    }
}

/// Releases the device and clears session state on every exit path.
struct Teardown {
    inner: Arc<Inner>,
    session: u64,
    release: ReleaseHandle,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release.release();
        self.inner.finish_session(self.session);
    }
}

fn capture_loop(
    inner: Arc<Inner>,
    session: u64,
    mut device: Box<dyn InputDevice>,
    mut recognizer: Box<dyn StreamingRecognizer>,
    frame: usize,
    stop: Arc<AtomicBool>,
) {
    let _teardown = Teardown {
        inner: Arc::clone(&inner),
        session,
        release: device.release_handle(),
    };
    let mut buffer = vec![0i16; frame];

    while !stop.load(Ordering::SeqCst) {
        match device.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => {
                let bytes = samples_to_le_bytes(&buffer[..n]);
                match recognizer.accept(&bytes) {
                    Ok(transcript) => inner.deliver(session, transcript),
                    Err(e) => debug!("Dropping recognizer output: {}", e),
                }
            }
            Err(CaptureError::Released) => break,
            Err(e) => {
                warn!("Audio read failed, stopping capture: {}", e);
                break;
            }
        }
    }

    match recognizer.flush() {
        Ok(transcript) => inner.deliver(session, transcript),
        Err(e) => debug!("Dropping final recognizer output: {}", e),
    }
    drop(recognizer);
    drop(device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{parse_engine_payload, EngineError};
    use shared::ipc::TimerCommand;
    use std::collections::VecDeque;

    struct ScriptedDevice {
        frames: usize,
        fail_at_end: bool,
        release: ReleaseHandle,
    }

    impl InputDevice for ScriptedDevice {
        fn read(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
            if self.release.is_released() {
                return Err(CaptureError::Released);
            }
            if self.frames == 0 {
                if self.fail_at_end {
                    return Err(CaptureError::Read("device gone".to_string()));
                }
                thread::sleep(Duration::from_millis(2));
                return Ok(0);
            }
            self.frames -= 1;
            Ok(buf.len())
        }

        fn release_handle(&self) -> ReleaseHandle {
            self.release.clone()
        }
    }

    struct ScriptedInput {
        frames: usize,
        fail_at_end: bool,
        refuse: bool,
        opened: Mutex<Vec<(usize, ReleaseHandle)>>,
    }

    impl ScriptedInput {
        fn new(frames: usize) -> Self {
            Self {
                frames,
                fail_at_end: false,
                refuse: false,
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    impl AudioInput for ScriptedInput {
        fn min_buffer_bytes(&self, _format: CaptureFormat) -> usize {
            1024
        }

        fn open(
            &self,
            _format: CaptureFormat,
            buffer_bytes: usize,
        ) -> Result<Box<dyn InputDevice>, CaptureError> {
            if self.refuse {
                return Err(CaptureError::Device("permission denied".to_string()));
            }
            let release = ReleaseHandle::new(|| {});
            lock(&self.opened).push((buffer_bytes, release.clone()));
            Ok(Box::new(ScriptedDevice {
                frames: self.frames,
                fail_at_end: self.fail_at_end,
                release,
            }))
        }
    }

    struct ScriptedRecognizer {
        payloads: VecDeque<String>,
        flush: String,
        flush_delay: Duration,
    }

    impl StreamingRecognizer for ScriptedRecognizer {
        fn accept(&mut self, pcm_le: &[u8]) -> Result<Transcript, EngineError> {
            assert_eq!(pcm_le.len() % 2, 0);
            let payload = self
                .payloads
                .pop_front()
                .unwrap_or_else(|| r#"{"partial":""}"#.to_string());
            parse_engine_payload(&payload)
        }

        fn flush(&mut self) -> Result<Transcript, EngineError> {
            thread::sleep(self.flush_delay);
            parse_engine_payload(&self.flush)
        }
    }

    struct ScriptedModel {
        payloads: Vec<&'static str>,
        flush: &'static str,
        flush_delay: Duration,
    }

    impl SpeechModel for ScriptedModel {
        fn recognizer(
            &self,
            sample_rate: u32,
        ) -> Result<Box<dyn StreamingRecognizer>, EngineError> {
            assert_eq!(sample_rate, 16_000);
            Ok(Box::new(ScriptedRecognizer {
                payloads: self.payloads.iter().map(|p| p.to_string()).collect(),
                flush: self.flush.to_string(),
                flush_delay: self.flush_delay,
            }))
        }
    }

    #[derive(Default)]
    struct Recorder {
        finals: Mutex<Vec<String>>,
        commands: Mutex<Vec<TimerCommand>>,
    }

    impl VoiceListener for Recorder {
        fn on_final_transcript(&self, text: &str) {
            lock(&self.finals).push(text.to_string());
        }

        fn on_command(&self, command: TimerCommand) {
            lock(&self.commands).push(command);
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn pipeline(
        input: ScriptedInput,
        payloads: Vec<&'static str>,
        flush: &'static str,
    ) -> (VoicePipeline, Arc<Recorder>, Arc<ScriptedInput>) {
        let input = Arc::new(input);
        let recorder = Arc::new(Recorder::default());
        let pipeline = VoicePipeline::new(
            input.clone(),
            recorder.clone(),
            PipelineSettings::default(),
        );
        pipeline.install(Ok(Arc::new(ScriptedModel {
            payloads,
            flush,
            flush_delay: Duration::ZERO,
        })));
        (pipeline, recorder, input)
    }

    #[test]
    fn test_start_requires_ready_model() {
        let input = Arc::new(ScriptedInput::new(1));
        let pipeline = VoicePipeline::new(
            input.clone(),
            Arc::new(Recorder::default()),
            PipelineSettings::default(),
        );
        assert_eq!(pipeline.model_state(), ModelState::Loading);
        pipeline.start_listening();
        assert!(!pipeline.is_listening());
        assert!(lock(&input.opened).is_empty());
    }

    #[test]
    fn test_buffer_sized_from_floor() {
        let (pipeline, _, input) = pipeline(ScriptedInput::new(0), vec![], r#"{"text":""}"#);
        pipeline.start_listening();
        assert_eq!(lock(&input.opened)[0].0, 8192);
        pipeline.shutdown();
    }

    #[test]
    fn test_finals_become_commands_partials_do_not() {
        let (pipeline, recorder, _) = pipeline(
            ScriptedInput::new(3),
            vec![
                r#"{"partial":"next"}"#,
                r#"{"partial":"one two start"}"#,
                r#"{"text":"One two START please"}"#,
            ],
            r#"{"text":""}"#,
        );
        pipeline.start_listening();
        assert!(wait_until(|| !lock(&recorder.commands).is_empty()));
        assert_eq!(*lock(&recorder.commands), vec![TimerCommand::Start]);
        assert_eq!(
            *lock(&recorder.finals),
            vec!["One two START please".to_string()]
        );
        pipeline.shutdown();
    }

    #[test]
    fn test_malformed_output_dropped() {
        let (pipeline, recorder, _) = pipeline(
            ScriptedInput::new(2),
            vec!["{garbage", r#"{"text":"done"}"#],
            r#"{"text":""}"#,
        );
        pipeline.start_listening();
        assert!(wait_until(|| !lock(&recorder.commands).is_empty()));
        assert_eq!(*lock(&recorder.commands), vec![TimerCommand::Done]);
        pipeline.shutdown();
    }

    #[test]
    fn test_stop_drains_final_result_and_clears_state() {
        let (pipeline, recorder, input) = pipeline(
            ScriptedInput::new(1),
            vec![r#"{"partial":"rest"}"#],
            r#"{"text":"reset"}"#,
        );
        let heard = pipeline.subscribe_heard_text();
        pipeline.start_listening();
        assert!(pipeline.is_listening());
        assert!(wait_until(|| heard.borrow().as_str() == "rest"));

        pipeline.stop_listening();
        assert!(!pipeline.is_listening());
        assert!(lock(&input.opened)[0].1.is_released());
        assert!(wait_until(|| lock(&recorder.commands).len() == 1));
        assert_eq!(*lock(&recorder.commands), vec![TimerCommand::Reset]);
        assert!(wait_until(|| pipeline.heard_text().is_empty()));
        pipeline.shutdown();
    }

    #[test]
    fn test_read_failure_tears_down() {
        let mut input = ScriptedInput::new(1);
        input.fail_at_end = true;
        let (pipeline, recorder, input) = pipeline(input, vec![], r#"{"text":"next"}"#);
        pipeline.start_listening();
        assert!(wait_until(|| !pipeline.is_listening()));
        assert!(wait_until(|| lock(&recorder.commands).len() == 1));
        assert_eq!(*lock(&recorder.commands), vec![TimerCommand::Next]);
        assert!(lock(&input.opened)[0].1.is_released());

        // Can listen again after a transient failure.
        pipeline.start_listening();
        assert_eq!(lock(&input.opened).len(), 2);
        pipeline.shutdown();
    }

    #[test]
    fn test_device_failure_leaves_listening_false() {
        let mut input = ScriptedInput::new(0);
        input.refuse = true;
        let (pipeline, _, _) = pipeline(input, vec![], r#"{"text":""}"#);
        pipeline.start_listening();
        assert!(!pipeline.is_listening());
    }

    #[test]
    fn test_start_twice_opens_one_device() {
        let (pipeline, _, input) = pipeline(ScriptedInput::new(0), vec![], r#"{"text":""}"#);
        pipeline.start_listening();
        pipeline.start_listening();
        assert_eq!(lock(&input.opened).len(), 1);
        pipeline.shutdown();
    }

    #[test]
    fn test_restart_after_stop_keeps_new_session_listening() {
        let (pipeline, _, input) = pipeline(ScriptedInput::new(0), vec![], r#"{"text":""}"#);
        pipeline.start_listening();
        pipeline.stop_listening();
        pipeline.start_listening();
        assert_eq!(lock(&input.opened).len(), 2);
        thread::sleep(Duration::from_millis(50));
        assert!(pipeline.is_listening());
        pipeline.shutdown();
        assert!(!pipeline.is_listening());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (pipeline, _, _) = pipeline(ScriptedInput::new(0), vec![], r#"{"text":""}"#);
        pipeline.stop_listening();
        pipeline.start_listening();
        pipeline.stop_listening();
        pipeline.stop_listening();
        assert!(!pipeline.is_listening());
        pipeline.shutdown();
    }

    #[test]
    fn test_failed_model_is_terminal() {
        let (pipeline, _, _) = pipeline(ScriptedInput::new(0), vec![], r#"{"text":""}"#);
        pipeline.inner.model_state.send_replace(ModelState::Loading);
        pipeline.install(Err(ModelError::BundleMissing("model-en-us".to_string())));
        assert!(matches!(pipeline.model_state(), ModelState::Failed(_)));
        pipeline.inner.set_model_state(ModelState::Ready);
        assert!(matches!(pipeline.model_state(), ModelState::Failed(_)));
    }

    #[test]
    fn test_retired_session_keeps_out_of_heard_text() {
        let input = Arc::new(ScriptedInput::new(0));
        let recorder = Arc::new(Recorder::default());
        let pipeline = VoicePipeline::new(
            input.clone(),
            recorder.clone(),
            PipelineSettings::default(),
        );
        pipeline.install(Ok(Arc::new(ScriptedModel {
            payloads: vec![],
            flush: r#"{"text":"next"}"#,
            flush_delay: Duration::from_millis(100),
        })));

        pipeline.start_listening();
        pipeline.stop_listening();
        pipeline.start_listening();
        assert_eq!(lock(&input.opened).len(), 2);

        // The first session's drained final still reaches the listener.
        assert!(wait_until(|| lock(&recorder.commands).len() == 1));
        assert_eq!(*lock(&recorder.commands), vec![TimerCommand::Next]);
        assert!(pipeline.heard_text().is_empty());
        assert!(pipeline.is_listening());
        pipeline.shutdown();
    }

    #[test]
    fn test_model_load_finishing_after_shutdown_is_discarded() {
        let input = Arc::new(ScriptedInput::new(0));
        let pipeline = VoicePipeline::new(
            input.clone(),
            Arc::new(Recorder::default()),
            PipelineSettings::default(),
        );
        pipeline.shutdown();
        pipeline.install(Ok(Arc::new(ScriptedModel {
            payloads: vec![],
            flush: r#"{"text":""}"#,
            flush_delay: Duration::ZERO,
        })));
        assert_eq!(pipeline.model_state(), ModelState::Loading);
        assert!(lock(&pipeline.inner.model).is_none());
        pipeline.start_listening();
        assert!(lock(&input.opened).is_empty());
    }

    #[test]
    fn test_shutdown_blocks_further_listening() {
        let (pipeline, _, input) = pipeline(ScriptedInput::new(0), vec![], r#"{"text":""}"#);
        pipeline.shutdown();
        pipeline.start_listening();
        assert!(lock(&input.opened).is_empty());
    }
}
