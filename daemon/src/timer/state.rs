pub use shared::ipc::{Mode, TimerState};

use super::machine::TimerListener;

/// Side effects raised by the state machine, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEffect {
    RunStarted,
    StartConfirmed,
    OneSecondLeft,
    TimerComplete { count: u32 },
    RoutineComplete { from_timer: bool },
}

/// Records effects instead of acting on them.
impl TimerListener for Vec<TimerEffect> {
    fn on_run_started(&mut self) {
        self.push(TimerEffect::RunStarted);
    }

    fn on_start_confirmed(&mut self) {
        self.push(TimerEffect::StartConfirmed);
    }

    fn on_one_second_left(&mut self) {
        self.push(TimerEffect::OneSecondLeft);
    }

    fn on_timer_complete(&mut self, count: u32) {
        self.push(TimerEffect::TimerComplete { count });
    }

    fn on_routine_complete(&mut self, from_timer: bool) {
        self.push(TimerEffect::RoutineComplete { from_timer });
    }
}

pub fn is_running(state: &TimerState) -> bool {
    matches!(state, TimerState::Running { .. })
}
