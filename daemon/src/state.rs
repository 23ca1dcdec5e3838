use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::audio::capture::CpalInput;
use crate::config::Config;
use crate::coordinator::{SessionCoordinator, SessionEvent, SessionHandle, SessionServices};
use crate::cues::{LogMuter, LogSoundPlayer};
use crate::prefs::{load_or_default, JsonPreferences, Preferences, PreferencesStore};
use crate::rate_limit::CommandRateLimiter;
use crate::recognizer::{default_engine, DirectoryBundle, EngineError, ModelLoader};
use crate::server::DaemonServer;
use crate::voice::VoicePipeline;
use crate::voice_log::VoiceLog;

enum Exit {
    Server(anyhow::Result<()>),
    Session(Result<(), JoinError>),
    Interrupted,
}

/// False if the coordinator task panicked or was cancelled.
fn session_exited_cleanly(result: Result<(), JoinError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("Session task failed: {}", e);
            false
        }
    }
}

/// Wires the long-lived pieces together and owns their shutdown order.
pub struct DaemonState {
    config: Config,
}

impl DaemonState {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model_loader(&self) -> ModelLoader {
        let model = &self.config.model;
        ModelLoader::new(
            model.name.clone(),
            self.config.model_install_dir(),
            model.required_dirs.clone(),
            Arc::new(DirectoryBundle::with_default_roots(model.bundle_dir.clone())),
            default_engine(),
        )
    }

    /// Preferences from the data dir. A first run takes its basic duration
    /// from the config.
    pub fn load_preferences(&self, store: &JsonPreferences) -> Preferences {
        let first_run = !store.path().exists();
        let mut prefs = load_or_default(store);
        if first_run {
            prefs.set_basic_duration(self.config.timer.basic_duration_seconds);
            if let Err(e) = store.save(&prefs) {
                warn!("Failed to write initial preferences: {}", e);
            }
        }
        prefs
    }

    /// Load the model off the runtime and tell the session when it settles.
    fn spawn_model_load(&self, pipeline: VoicePipeline, handle: SessionHandle) -> JoinHandle<()> {
        let enabled = self.config.voice.enabled;
        let loader = self.model_loader();
        tokio::task::spawn_blocking(move || {
            if enabled {
                pipeline.load_model(&loader);
            } else {
                info!("Voice recognition disabled in config");
                pipeline.install(Err(EngineError::Unavailable(
                    "voice recognition disabled in config".to_string(),
                )
                .into()));
            }
            handle.post(SessionEvent::ModelSettled);
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let data_dir = self.config.data_dir();
        info!("Data directory: {}", data_dir.display());

        let store = Arc::new(JsonPreferences::in_dir(&data_dir));
        let prefs = self.load_preferences(&store);

        let (handle, events) = SessionHandle::channel();
        let audio = Arc::new(
            CpalInput::new(self.config.audio.device.clone())
                .with_queue_depth(self.config.audio.channel_capacity),
        );
        let pipeline = VoicePipeline::new(
            audio,
            Arc::new(handle.clone()),
            self.config.pipeline_settings(),
        );
        let player = Arc::new(LogSoundPlayer::new(
            self.config.cues.mute_all_sounds || prefs.mute_all_sounds,
        ));

        let services = SessionServices {
            voice: Arc::new(pipeline.clone()),
            player,
            muter: Arc::new(LogMuter::default()),
            store,
            prefs,
            voice_log: VoiceLog::in_dir(&data_dir),
        };
        let coordinator =
            SessionCoordinator::new(services, handle.clone(), self.config.coordinator_settings());

        let limiter = Arc::new(CommandRateLimiter::from_config(&self.config.rate_limit));
        let server = DaemonServer::new(
            self.config.socket_path(),
            handle.clone(),
            limiter,
            Duration::from_secs(self.config.timeouts.socket_operation_timeout_seconds),
        );
        let listener = server.bind()?;

        let mut session = tokio::spawn(coordinator.run(events));
        let loader = self.spawn_model_load(pipeline.clone(), handle.clone());

        let exit = tokio::select! {
            result = server.serve(listener) => Exit::Server(result),
            result = &mut session => Exit::Session(result),
            _ = tokio::signal::ctrl_c() => Exit::Interrupted,
        };

        let outcome = match exit {
            Exit::Server(result) => {
                handle.shutdown();
                session_exited_cleanly(session.await);
                result
            }
            Exit::Session(result) => {
                if session_exited_cleanly(result) {
                    info!("Session ended");
                }
                Ok(())
            }
            Exit::Interrupted => {
                info!("Interrupted, shutting down");
                handle.shutdown();
                session_exited_cleanly(session.await);
                Ok(())
            }
        };

        drop(server);
        self.shutdown_pipeline(pipeline, loader).await;
        info!("repcued stopped");
        outcome
    }

    /// Join capture threads, bounded so a wedged device cannot hang exit.
    async fn shutdown_pipeline(&self, pipeline: VoicePipeline, loader: JoinHandle<()>) {
        let limit = Duration::from_millis(self.config.timeouts.shutdown_join_timeout_ms);
        let join = tokio::task::spawn_blocking(move || pipeline.shutdown());
        match tokio::time::timeout(limit, join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Voice pipeline shutdown failed: {}", e),
            Err(_) => warn!("Voice pipeline did not stop within {:?}", limit),
        }
        if !loader.is_finished() {
            warn!("Model load still running at exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths = PathsConfig {
            socket_path: Some(dir.path().join("repcued.sock")),
            data_dir: Some(dir.path().join("data")),
        };
        config
    }

    #[test]
    fn test_first_run_uses_configured_duration() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.timer.basic_duration_seconds = 45;
        let state = DaemonState::new(config);
        let store = JsonPreferences::in_dir(&state.config().data_dir());

        let prefs = state.load_preferences(&store);
        assert_eq!(prefs.basic_mode_duration, 45);
        assert!(store.path().exists());
    }

    #[test]
    fn test_saved_duration_wins_over_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        let store = JsonPreferences::in_dir(&config.data_dir());
        let mut saved = Preferences::default();
        saved.set_basic_duration(12);
        store.save(&saved).unwrap();

        config.timer.basic_duration_seconds = 45;
        let prefs = DaemonState::new(config).load_preferences(&store);
        assert_eq!(prefs.basic_mode_duration, 12);
    }

    #[test]
    fn test_model_loader_uses_install_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.model.name = "tiny".to_string();
        let state = DaemonState::new(config);
        assert_eq!(
            state.model_loader().model_dir(),
            dir.path().join("data").join("models").join("tiny")
        );
    }

    #[tokio::test]
    async fn test_session_panic_is_not_swallowed() {
        let finished = tokio::spawn(async {}).await;
        assert!(session_exited_cleanly(finished));

        let panicked: Result<(), JoinError> =
            tokio::spawn(async { panic!("coordinator bug") }).await;
        assert!(!session_exited_cleanly(panicked));
    }

    #[tokio::test]
    async fn test_shutdown_request_stops_daemon() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.voice.enabled = false;
        let socket = config.socket_path();
        let daemon = tokio::spawn(DaemonState::new(config).run());

        let mut client = None;
        for _ in 0..100 {
            if let Ok(stream) = tokio::net::UnixStream::connect(&socket).await {
                client = Some(stream);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut stream = client.expect("daemon socket never appeared");

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let payload = serde_json::to_vec(&shared::ipc::Request::Shutdown).unwrap();
        stream.write_all(&payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        let response: shared::ipc::Response = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response, shared::ipc::Response::Ok);

        let result = tokio::time::timeout(Duration::from_secs(5), daemon)
            .await
            .unwrap()
            .unwrap();
        tokio_test::assert_ok!(result);
        assert!(!socket.exists());
    }
}
