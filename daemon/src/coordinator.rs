use anyhow::anyhow;
use shared::ipc::{Mode, Request, Response, SessionStatus, TimerCommand, TimerState, View};
use shared::routine::{export_json, parse_import, NamedRoutine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cues::{NotificationMuter, PlaybackHooks, SoundCue, SoundPlayer};
use crate::prefs::{Preferences, PreferencesStore};
use crate::timer::{CountdownTicker, RoutineStateMachine, TimerListener};
use crate::voice::{VoiceControl, VoiceListener};
use crate::voice_log::VoiceLog;

pub const MAX_SPOKEN_COUNT: u32 = 20;

#[derive(Debug, Clone)]
pub struct CueTiming {
    pub notification_to_count: Duration,
    pub finished_after_notification: Duration,
    pub max_spoken_count: u32,
}

impl Default for CueTiming {
    fn default() -> Self {
        Self {
            notification_to_count: Duration::from_millis(700),
            finished_after_notification: Duration::from_millis(500),
            max_spoken_count: MAX_SPOKEN_COUNT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub tick: Duration,
    pub cues: CueTiming,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            cues: CueTiming::default(),
        }
    }
}

/// Everything that reaches the session owner. Producers on other threads
/// only ever post one of these.
#[derive(Debug)]
pub enum SessionEvent {
    Voice(TimerCommand),
    FinalTranscript(String),
    Tick(u64),
    /// Model load finished, successfully or not.
    ModelSettled,
    CueHalfway,
    CueFinished(SoundCue),
    PlayCount(u32),
    PlayFinished,
    Request(Request, oneshot::Sender<Response>),
    Shutdown,
}

/// Cloneable sender side of the session queue.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the session has stopped.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub async fn request(&self, request: Request) -> anyhow::Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.post(SessionEvent::Request(request, reply_tx)) {
            return Err(anyhow!("Session is not running"));
        }
        reply_rx
            .await
            .map_err(|_| anyhow!("Session stopped before replying"))
    }

    pub fn shutdown(&self) {
        self.post(SessionEvent::Shutdown);
    }
}

impl VoiceListener for SessionHandle {
    fn on_final_transcript(&self, text: &str) {
        self.post(SessionEvent::FinalTranscript(text.to_string()));
    }

    fn on_command(&self, command: TimerCommand) {
        self.post(SessionEvent::Voice(command));
    }
}

/// Sound and microphone side effects of the timer.
///
/// The microphone is closed one second before a repetition ends and opened
/// again as soon as it completes. The routine-finished clip plays at most
/// once per completion: after the last spoken count when the timer finished
/// the routine, at once when the user did.
pub struct CueReactor {
    player: Arc<dyn SoundPlayer>,
    voice: Arc<dyn VoiceControl>,
    events: SessionHandle,
    timing: CueTiming,
    voice_active: bool,
    finished_played: bool,
    finished_pending: bool,
}

impl CueReactor {
    fn new(
        player: Arc<dyn SoundPlayer>,
        voice: Arc<dyn VoiceControl>,
        events: SessionHandle,
        timing: CueTiming,
    ) -> Self {
        Self {
            player,
            voice,
            events,
            timing,
            voice_active: false,
            finished_played: false,
            finished_pending: false,
        }
    }

    fn schedule(&self, delay: Duration, event: SessionEvent) {
        if delay.is_zero() {
            self.events.post(event);
            return;
        }
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.post(event);
        });
    }

    fn play_count(&self, count: u32) {
        let done = self.events.clone();
        let halfway = self.events.clone();
        let hooks = PlaybackHooks::on_done(move || {
            done.post(SessionEvent::CueFinished(SoundCue::Count(count)));
        })
        .with_halfway(move || {
            halfway.post(SessionEvent::CueHalfway);
        });
        self.player.play(SoundCue::Count(count), hooks);
    }

    fn play_finished(&self) {
        self.player.play(SoundCue::Finished, PlaybackHooks::none());
    }

    /// Claim the one finished clip for this completion, if still pending.
    fn take_pending_finished(&mut self) -> bool {
        if self.finished_pending && !self.finished_played {
            self.finished_pending = false;
            self.finished_played = true;
            return true;
        }
        false
    }

    fn on_cue_finished(&mut self, cue: SoundCue) {
        match cue {
            SoundCue::Count(_) => {
                if self.take_pending_finished() {
                    self.play_finished();
                }
            }
            SoundCue::Notification => {
                if self.take_pending_finished() {
                    self.schedule(
                        self.timing.finished_after_notification,
                        SessionEvent::PlayFinished,
                    );
                }
            }
            SoundCue::ConfirmBeep | SoundCue::Finished => {}
        }
    }

    fn on_halfway(&self) {
        if self.voice_active && !self.voice.is_listening() {
            self.voice.start_listening();
        }
    }
}

impl TimerListener for CueReactor {
    fn on_run_started(&mut self) {
        self.finished_played = false;
    }

    fn on_start_confirmed(&mut self) {
        self.player.play(SoundCue::ConfirmBeep, PlaybackHooks::none());
    }

    fn on_one_second_left(&mut self) {
        if self.voice_active {
            self.voice.stop_listening();
        }
    }

    fn on_timer_complete(&mut self, count: u32) {
        if self.voice_active {
            self.voice.start_listening();
        }
        if (1..=self.timing.max_spoken_count).contains(&count) {
            self.player
                .play(SoundCue::Notification, PlaybackHooks::none());
            self.schedule(
                self.timing.notification_to_count,
                SessionEvent::PlayCount(count),
            );
        } else {
            let events = self.events.clone();
            self.player.play(
                SoundCue::Notification,
                PlaybackHooks::on_done(move || {
                    events.post(SessionEvent::CueFinished(SoundCue::Notification));
                }),
            );
        }
    }

    fn on_routine_complete(&mut self, from_timer: bool) {
        if from_timer {
            self.finished_pending = true;
        } else if !self.finished_played {
            self.finished_played = true;
            self.play_finished();
        }
    }
}

pub struct SessionServices {
    pub voice: Arc<dyn VoiceControl>,
    pub player: Arc<dyn SoundPlayer>,
    pub muter: Arc<dyn NotificationMuter>,
    pub store: Arc<dyn PreferencesStore>,
    pub prefs: Preferences,
    pub voice_log: VoiceLog,
}

/// Single owner of session state. Voice results, countdown ticks, cue
/// callbacks and socket requests all arrive as [`SessionEvent`]s and are
/// applied one at a time.
pub struct SessionCoordinator {
    machine: RoutineStateMachine<CueReactor>,
    ticker: CountdownTicker,
    voice: Arc<dyn VoiceControl>,
    muter: Arc<dyn NotificationMuter>,
    store: Arc<dyn PreferencesStore>,
    prefs: Preferences,
    voice_log: VoiceLog,
    view: View,
    routine_id: Option<String>,
}

impl SessionCoordinator {
    pub fn new(
        services: SessionServices,
        handle: SessionHandle,
        settings: CoordinatorSettings,
    ) -> Self {
        let SessionServices {
            voice,
            player,
            muter,
            store,
            prefs,
            voice_log,
        } = services;

        let reactor = CueReactor::new(player, Arc::clone(&voice), handle.clone(), settings.cues);
        let machine = RoutineStateMachine::new(reactor, prefs.basic_mode_duration);
        let ticker = CountdownTicker::new(settings.tick, move |generation| {
            handle.post(SessionEvent::Tick(generation))
        });

        let mut coordinator = Self {
            machine,
            ticker,
            voice,
            muter,
            store,
            prefs,
            voice_log,
            view: View::Loading,
            routine_id: None,
        };
        coordinator.apply_saved_mode();
        coordinator
    }

    pub fn machine(&self) -> &RoutineStateMachine<CueReactor> {
        &self.machine
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        info!("Session coordinator running");
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.shutdown();
    }

    /// Apply one event. Returns false when the session should stop.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Voice(command) => self.on_voice_command(command),
            SessionEvent::FinalTranscript(text) => self.voice_log.add_text(&text),
            SessionEvent::Tick(generation) => self.machine.tick(generation),
            SessionEvent::ModelSettled => {
                if self.view == View::Loading {
                    self.set_view(View::Timer);
                }
            }
            SessionEvent::CueHalfway => self.machine.listener().on_halfway(),
            SessionEvent::CueFinished(cue) => self.machine.listener_mut().on_cue_finished(cue),
            SessionEvent::PlayCount(count) => self.machine.listener().play_count(count),
            SessionEvent::PlayFinished => self.machine.listener().play_finished(),
            SessionEvent::Request(Request::Shutdown, reply) => {
                info!("Shutdown requested");
                let _ = reply.send(Response::Ok);
                return false;
            }
            SessionEvent::Request(request, reply) => {
                let response = self.handle_request(request);
                if reply.send(response).is_err() {
                    debug!("Requester went away before the reply");
                }
            }
            SessionEvent::Shutdown => return false,
        }
        self.ticker.sync(self.machine.active_countdown());
        true
    }

    /// Cancel the countdown, close the microphone and restore notifications.
    pub fn shutdown(&mut self) {
        self.ticker.cancel();
        self.machine.cancel();
        self.voice.stop_listening();
        self.muter.set_muted(false);
        info!("Session stopped");
    }

    fn apply_saved_mode(&mut self) {
        let saved = if self.prefs.is_basic_mode {
            None
        } else {
            self.prefs.current_routine().cloned()
        };
        match saved {
            Some(routine) => self.activate_routine(routine),
            None => self.machine.set_basic_mode(),
        }
    }

    fn voice_relevant(&self) -> bool {
        self.prefs.voice_control_enabled && self.view == View::Timer
    }

    fn update_voice(&mut self, was_relevant: bool) {
        let relevant = self.voice_relevant();
        self.machine.listener_mut().voice_active = relevant;
        if relevant && !was_relevant {
            self.muter.set_muted(true);
            self.voice.start_listening();
        } else if !relevant && was_relevant {
            self.voice.stop_listening();
            self.muter.set_muted(false);
        }
    }

    fn set_view(&mut self, view: View) {
        if view == self.view {
            return;
        }
        let was_relevant = self.voice_relevant();
        debug!("View {:?} -> {:?}", self.view, view);
        self.view = view;
        self.update_voice(was_relevant);
    }

    fn set_voice_control(&mut self, enabled: bool) {
        let was_relevant = self.voice_relevant();
        self.prefs.voice_control_enabled = enabled;
        self.persist();
        info!(
            "Voice control {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.update_voice(was_relevant);
    }

    fn on_voice_command(&mut self, command: TimerCommand) {
        if !self.voice_relevant() {
            debug!("Voice command '{}' dropped: timer view not active", command);
            return;
        }
        let is_basic = self.machine.mode() == Mode::Basic;
        self.voice_log
            .on_trigger(command.as_str(), self.routine_id.as_deref(), is_basic);
        self.dispatch(command);
    }

    /// Map a command onto the state machine according to the current state.
    fn dispatch(&mut self, command: TimerCommand) {
        let machine = &mut self.machine;
        match command {
            TimerCommand::Next => match machine.state() {
                TimerState::Idle => machine.start(),
                TimerState::Completed { .. } => machine.next(),
                TimerState::Running { .. } => debug!("'next' ignored while running"),
            },
            TimerCommand::Start => match machine.state() {
                TimerState::Idle => machine.start(),
                TimerState::Completed { .. } if machine.current_count() == 0 => machine.start(),
                TimerState::Completed { .. } => machine.next(),
                TimerState::Running { .. } => debug!("'start' ignored while running"),
            },
            TimerCommand::Done => match machine.mode() {
                Mode::Basic => machine.reset_exercise(),
                Mode::Custom => machine.complete_exercise_and_advance(),
            },
            TimerCommand::Restart => machine.restart_current_rep(),
            TimerCommand::Reset => machine.reset_exercise(),
        }
    }

    fn handle_request(&mut self, request: Request) -> Response {
        debug!("Handling request: {:?}", request);
        match request {
            Request::Press(command) => {
                self.dispatch(command);
                Response::Ok
            }
            Request::JumpTo(index) => self.custom_only(|machine| machine.jump_to_exercise(index)),
            Request::ResetRoutine => self.custom_only(|machine| machine.reset_routine()),
            Request::SelectBasic => {
                self.select_basic();
                Response::Ok
            }
            Request::SelectRoutine(id) => match self.prefs.routine(&id).cloned() {
                Some(routine) => {
                    self.select_routine(routine);
                    Response::Ok
                }
                None => Response::Error(format!("Unknown routine '{}'", id)),
            },
            Request::SetBasicDuration(seconds) => {
                let seconds = self.prefs.set_basic_duration(seconds);
                self.machine.set_basic_duration(seconds);
                self.persist();
                Response::Ok
            }
            Request::SetView(view) => {
                self.set_view(view);
                Response::Ok
            }
            Request::SetVoiceControl(enabled) => {
                self.set_voice_control(enabled);
                Response::Ok
            }
            Request::ListRoutines => Response::Routines {
                routines: self.prefs.routines.clone(),
                current: self.prefs.current_routine().map(|r| r.id.clone()),
            },
            Request::ImportRoutines(raw) => self.import_routines(&raw),
            Request::ExportRoutine(id) => match self.prefs.routine(&id) {
                Some(routine) => Response::Exported(export_json(routine)),
                None => Response::Error(format!("Unknown routine '{}'", id)),
            },
            Request::VoiceLog => Response::VoiceLog(self.voice_log.read_all()),
            Request::ClearVoiceLog => {
                self.voice_log.clear();
                Response::Ok
            }
            Request::Status => Response::Status(self.status()),
            Request::Shutdown => Response::Ok,
        }
    }

    fn custom_only<F>(&mut self, op: F) -> Response
    where
        F: FnOnce(&mut RoutineStateMachine<CueReactor>),
    {
        if self.machine.mode() != Mode::Custom {
            return Response::Error("Not available in basic mode".to_string());
        }
        op(&mut self.machine);
        Response::Ok
    }

    fn select_basic(&mut self) {
        if self.routine_id.take().is_some() {
            self.voice_log.start_new_session();
        }
        self.machine.set_basic_mode();
        self.prefs.is_basic_mode = true;
        self.persist();
    }

    fn select_routine(&mut self, routine: NamedRoutine) {
        if self.routine_id.as_deref() != Some(routine.id.as_str()) {
            self.voice_log.start_new_session();
        }
        self.prefs.is_basic_mode = false;
        self.prefs.current_routine_id = Some(routine.id.clone());
        self.activate_routine(routine);
        self.persist();
    }

    fn activate_routine(&mut self, routine: NamedRoutine) {
        info!("Using routine '{}' ({})", routine.name, routine.id);
        self.machine.use_routine(routine.routine);
        self.routine_id = Some(routine.id);
    }

    fn import_routines(&mut self, raw: &str) -> Response {
        let imported = parse_import(raw);
        if imported.is_empty() {
            return Response::Error("No valid routines found".to_string());
        }
        let count = self.prefs.merge_routines(imported);
        self.persist();
        info!("Imported {} routine(s)", count);

        // An import may have redefined the active routine.
        if self.machine.mode() == Mode::Custom {
            let active = self
                .routine_id
                .as_deref()
                .and_then(|id| self.prefs.routine(id))
                .cloned();
            if let Some(routine) = active {
                self.activate_routine(routine);
            }
        }
        Response::Imported(count)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.prefs) {
            warn!("Failed to save preferences: {}", e);
        }
    }

    pub fn status(&self) -> SessionStatus {
        let machine = &self.machine;
        let custom = machine.mode() == Mode::Custom;
        SessionStatus {
            timer_state: machine.state(),
            mode: machine.mode(),
            basic_duration_seconds: machine.basic_duration(),
            routine_id: if custom { self.routine_id.clone() } else { None },
            exercise_index: machine.current_index(),
            exercise_name: machine.current_exercise().map(|e| e.name.clone()),
            exercise_count: if custom {
                machine.routine().map_or(0, |r| r.len())
            } else {
                0
            },
            rep_count: machine.current_count(),
            required_repeats: machine.required_repeats(),
            completed_exercises: machine.completed_exercises().iter().copied().collect(),
            routine_complete: machine.is_routine_complete(),
            view: self.view,
            voice_enabled: self.prefs.voice_control_enabled,
            listening: self.voice.is_listening(),
            heard_text: self.voice.heard_text(),
            model_state: self.voice.model_state(),
        }
    }
}
