use shared::routine::{Exercise, Routine};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use super::state::{is_running, Mode, TimerState};

/// Receives the state machine's side effects synchronously, on the owner's
/// thread, right after the state change that caused them.
pub trait TimerListener {
    /// A run was started or progress was reset by the user.
    fn on_run_started(&mut self) {}

    /// A countdown is about to begin.
    fn on_start_confirmed(&mut self) {}

    fn on_one_second_left(&mut self) {}

    /// `count` is the repetition number that just finished.
    fn on_timer_complete(&mut self, _count: u32) {}

    fn on_routine_complete(&mut self, _from_timer: bool) {}
}

/// Authoritative session progress: mode, exercise index, repetition counts
/// and the countdown for the current repetition.
///
/// Every operation is a silent no-op when called from a state that does not
/// support it. The countdown is driven from outside via [`tick`], tagged with
/// the generation returned by [`active_countdown`]; any cancel or restart
/// bumps the generation so a stale tick is ignored.
///
/// [`tick`]: RoutineStateMachine::tick
/// [`active_countdown`]: RoutineStateMachine::active_countdown
pub struct RoutineStateMachine<L: TimerListener> {
    listener: L,
    mode: Mode,
    basic_duration: u32,
    routine: Option<Routine>,
    index: usize,
    count: u32,
    saved_counts: HashMap<usize, u32>,
    completed: BTreeSet<usize>,
    state: TimerState,
    generation: u64,
}

impl<L: TimerListener> RoutineStateMachine<L> {
    pub fn new(listener: L, basic_duration: u32) -> Self {
        Self {
            listener,
            mode: Mode::Basic,
            basic_duration,
            routine: None,
            index: 0,
            count: 0,
            saved_counts: HashMap::new(),
            completed: BTreeSet::new(),
            state: TimerState::Idle,
            generation: 0,
        }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn basic_duration(&self) -> u32 {
        self.basic_duration
    }

    pub fn routine(&self) -> Option<&Routine> {
        self.routine.as_ref()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_count(&self) -> u32 {
        self.count
    }

    pub fn completed_exercises(&self) -> &BTreeSet<usize> {
        &self.completed
    }

    pub fn saved_count(&self, index: usize) -> Option<u32> {
        self.saved_counts.get(&index).copied()
    }

    pub fn current_exercise(&self) -> Option<&Exercise> {
        match self.mode {
            Mode::Basic => None,
            Mode::Custom => self.routine.as_ref().and_then(|r| r.get(self.index)),
        }
    }

    pub fn required_repeats(&self) -> u32 {
        self.current_exercise()
            .map(Exercise::required_repeats)
            .unwrap_or(1)
    }

    pub fn is_routine_complete(&self) -> bool {
        match (self.mode, &self.routine) {
            (Mode::Custom, Some(routine)) => self.completed.len() >= routine.len(),
            _ => false,
        }
    }

    /// Generation of the running countdown, if one is running.
    pub fn active_countdown(&self) -> Option<u64> {
        is_running(&self.state).then_some(self.generation)
    }

    pub fn set_basic_mode(&mut self) {
        if self.mode != Mode::Basic {
            info!("Switching to basic mode");
            self.mode = Mode::Basic;
            self.reset_progress();
        }
    }

    /// Switch to custom mode with `routine`. Progress survives only when the
    /// same routine is re-applied while already in custom mode.
    pub fn use_routine(&mut self, routine: Routine) {
        let unchanged = self.mode == Mode::Custom && self.routine.as_ref() == Some(&routine);
        self.routine = Some(routine);
        self.mode = Mode::Custom;
        if !unchanged {
            info!("Switching to custom routine");
            self.reset_progress();
        }
    }

    pub fn set_basic_duration(&mut self, seconds: u32) {
        self.basic_duration = seconds;
    }

    pub fn start(&mut self) {
        if is_running(&self.state) {
            debug!("start ignored: countdown already running");
            return;
        }
        if self.mode == Mode::Custom && self.is_routine_complete() {
            debug!("start ignored: routine already complete");
            return;
        }
        self.listener.on_run_started();

        let duration = self
            .current_exercise()
            .map(|e| e.duration_seconds)
            .unwrap_or(self.basic_duration);

        self.listener.on_start_confirmed();
        self.begin_countdown(duration);
    }

    /// Advance one second of the countdown tagged `generation`.
    pub fn tick(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Dropping stale tick");
            return;
        }
        let remaining = match self.state {
            TimerState::Running { remaining_seconds } => remaining_seconds.saturating_sub(1),
            _ => return,
        };
        if remaining == 0 {
            self.finish_rep();
            return;
        }
        self.state = TimerState::Running {
            remaining_seconds: remaining,
        };
        if remaining == 1 {
            self.listener.on_one_second_left();
        }
    }

    pub fn next(&mut self) {
        if !matches!(self.state, TimerState::Completed { .. }) {
            debug!("next ignored: not in completed state");
            return;
        }
        self.advance_if_reps_done();
        self.start();
    }

    pub fn restart_current_rep(&mut self) {
        self.cancel();
        if matches!(self.state, TimerState::Completed { .. }) && self.count > 0 {
            self.count -= 1;
        }
        self.state = TimerState::Idle;
        self.start();
    }

    pub fn reset_exercise(&mut self) {
        self.cancel();
        self.listener.on_run_started();
        self.count = 0;
        self.state = TimerState::Idle;
    }

    /// Mark the current exercise done regardless of its count and move on.
    pub fn complete_exercise_and_advance(&mut self) {
        self.cancel();
        match self.mode {
            Mode::Custom if self.routine.is_some() => {
                self.saved_counts.insert(self.index, self.count);
                self.completed.insert(self.index);
                match self.first_uncompleted() {
                    Some(next) => self.move_to(next),
                    None => {
                        self.count = 0;
                        info!("Routine complete");
                        self.listener.on_routine_complete(false);
                    }
                }
            }
            _ => self.count = 0,
        }
        self.state = TimerState::Idle;
    }

    pub fn reset_routine(&mut self) {
        if self.mode != Mode::Custom {
            return;
        }
        self.cancel();
        self.listener.on_run_started();
        self.completed.clear();
        self.saved_counts.clear();
        self.index = 0;
        self.count = 0;
        self.state = TimerState::Idle;
    }

    pub fn jump_to_exercise(&mut self, index: usize) {
        let last = match (self.mode, &self.routine) {
            (Mode::Custom, Some(routine)) => routine.last_index(),
            _ => return,
        };
        self.cancel();
        let target = index.min(last);
        self.saved_counts.insert(self.index, self.count);
        self.move_to(target);
        self.state = TimerState::Idle;
    }

    /// Stop any countdown without touching progress.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn begin_countdown(&mut self, seconds: u32) {
        self.cancel();
        debug!(seconds, generation = self.generation, "Countdown started");
        if seconds == 0 {
            self.finish_rep();
            return;
        }
        self.state = TimerState::Running {
            remaining_seconds: seconds,
        };
    }

    fn finish_rep(&mut self) {
        self.cancel();
        self.count += 1;
        let just_completed = self.count;
        if self.mode == Mode::Custom {
            self.advance_if_reps_done();
        }
        self.state = TimerState::Completed {
            rep_count: self.count,
        };
        info!(count = just_completed, index = self.index, "Repetition complete");
        self.listener.on_timer_complete(just_completed);
        if self.is_routine_complete() {
            info!("Routine complete");
            self.listener.on_routine_complete(true);
        }
    }

    fn advance_if_reps_done(&mut self) {
        if self.mode != Mode::Custom {
            return;
        }
        let needed = match self.current_exercise() {
            Some(exercise) => exercise.required_repeats(),
            None => return,
        };
        if self.count < needed {
            return;
        }
        self.saved_counts.insert(self.index, self.count);
        self.completed.insert(self.index);
        if let Some(next) = self.first_uncompleted() {
            self.move_to(next);
        }
    }

    fn move_to(&mut self, index: usize) {
        self.index = index;
        self.count = self.saved_counts.get(&index).copied().unwrap_or(0);
    }

    fn first_uncompleted(&self) -> Option<usize> {
        let len = self.routine.as_ref().map(Routine::len)?;
        (0..len).find(|i| !self.completed.contains(i))
    }

    fn reset_progress(&mut self) {
        self.cancel();
        self.state = TimerState::Idle;
        self.index = 0;
        self.count = 0;
        self.completed.clear();
        self.saved_counts.clear();
    }
}
