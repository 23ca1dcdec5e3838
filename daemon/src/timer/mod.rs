pub mod machine;
pub mod state;
pub mod ticker;

pub use machine::{RoutineStateMachine, TimerListener};
pub use state::{Mode, TimerEffect, TimerState};
pub use ticker::CountdownTicker;
