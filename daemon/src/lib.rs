pub mod audio;
pub mod config;
pub mod coordinator;
pub mod cues;
pub mod prefs;
pub mod rate_limit;
pub mod recognizer;
pub mod server;
pub mod state;
pub mod timer;
pub mod voice;
pub mod voice_log;

pub use coordinator::{SessionCoordinator, SessionEvent, SessionHandle, SessionServices};
pub use rate_limit::CommandRateLimiter;
pub use timer::RoutineStateMachine;
pub use voice::VoicePipeline;
