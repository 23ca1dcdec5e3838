pub mod ipc;
pub mod routine;

pub use ipc::{
    IpcError, ModelState, Mode, Request, Response, SessionStatus, TimerCommand, TimerState, View,
    VoiceLogEntry,
};
pub use routine::{Exercise, NamedRoutine, Routine, RoutineError};
