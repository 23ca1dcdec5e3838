pub mod commands;
pub mod pipeline;

use shared::ipc::{ModelState, TimerCommand};

pub use commands::{normalize_transcript, CommandInterpreter};
pub use pipeline::{PipelineSettings, VoicePipeline};

/// Receives what the pipeline hears. Called on the capture thread, so
/// implementations hand the value off to the session owner and return.
pub trait VoiceListener: Send + Sync {
    /// Non-empty final transcript, as the engine produced it.
    fn on_final_transcript(&self, text: &str);

    fn on_command(&self, command: TimerCommand);
}

/// Listening control as the session coordinator sees it.
pub trait VoiceControl: Send + Sync {
    fn start_listening(&self);

    fn stop_listening(&self);

    fn is_listening(&self) -> bool;

    fn heard_text(&self) -> String;

    fn model_state(&self) -> ModelState;
}
