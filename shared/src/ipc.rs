use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::routine::NamedRoutine;

/// The five commands a user can give by voice or by button.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerCommand {
    Start,
    Next,
    Restart,
    Done,
    Reset,
}

impl TimerCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerCommand::Start => "start",
            TimerCommand::Next => "next",
            TimerCommand::Restart => "restart",
            TimerCommand::Done => "done",
            TimerCommand::Reset => "reset",
        }
    }
}

impl fmt::Display for TimerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running { remaining_seconds: u32 },
    Completed { rep_count: u32 },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Basic,
    Custom,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Loading,
    CopyingAssets,
    Ready,
    Failed(String),
}

/// Which screen the user is looking at. Voice commands only apply on `Timer`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Loading,
    Timer,
    Settings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Request {
    Press(TimerCommand),
    JumpTo(usize),
    ResetRoutine,
    SelectBasic,
    SelectRoutine(String),
    SetBasicDuration(u32),
    SetView(View),
    SetVoiceControl(bool),
    ListRoutines,
    ImportRoutines(String),
    ExportRoutine(String),
    VoiceLog,
    ClearVoiceLog,
    Status,
    Shutdown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(String),
    Status(SessionStatus),
    Routines {
        routines: Vec<NamedRoutine>,
        current: Option<String>,
    },
    Imported(usize),
    Exported(String),
    VoiceLog(Vec<VoiceLogEntry>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub timer_state: TimerState,
    pub mode: Mode,
    pub basic_duration_seconds: u32,
    pub routine_id: Option<String>,
    pub exercise_index: usize,
    pub exercise_name: Option<String>,
    pub exercise_count: usize,
    pub rep_count: u32,
    pub required_repeats: u32,
    pub completed_exercises: Vec<usize>,
    pub routine_complete: bool,
    pub view: View,
    pub voice_enabled: bool,
    pub listening: bool,
    pub heard_text: String,
    pub model_state: ModelState,
}

/// One chunk of recognized speech, closed by a command or a session switch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceLogEntry {
    pub session_id: u64,
    pub started_at: u64,
    pub ended_at: u64,
    pub trigger: String,
    pub routine_id: Option<String>,
    pub is_basic_mode: bool,
    pub texts: Vec<String>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is repcued running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::demo_routine;
    use serde_test::{assert_tokens, Token};

    fn sample_status() -> SessionStatus {
        SessionStatus {
            timer_state: TimerState::Running {
                remaining_seconds: 4,
            },
            mode: Mode::Custom,
            basic_duration_seconds: 30,
            routine_id: Some("demo".to_string()),
            exercise_index: 1,
            exercise_name: Some("Leg Lift".to_string()),
            exercise_count: 4,
            rep_count: 1,
            required_repeats: 2,
            completed_exercises: vec![0],
            routine_complete: false,
            view: View::Timer,
            voice_enabled: true,
            listening: true,
            heard_text: "next".to_string(),
            model_state: ModelState::Ready,
        }
    }

    #[test]
    fn test_timer_command_tokens() {
        assert_tokens(
            &TimerCommand::Restart,
            &[Token::UnitVariant {
                name: "TimerCommand",
                variant: "Restart",
            }],
        );
    }

    #[test]
    fn test_timer_command_display() {
        assert_eq!(TimerCommand::Start.to_string(), "start");
        assert_eq!(TimerCommand::Done.as_str(), "done");
    }

    #[test]
    fn test_request_serialization_press() {
        let req = Request::Press(TimerCommand::Next);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"Press":"Next"}"#);
    }

    #[test]
    fn test_request_serialization_jump() {
        let json = serde_json::to_string(&Request::JumpTo(2)).unwrap();
        assert_eq!(json, r#"{"JumpTo":2}"#);
    }

    #[test]
    fn test_request_serialization_status() {
        let json = serde_json::to_string(&Request::Status).unwrap();
        assert_eq!(json, r#""Status""#);
    }

    #[test]
    fn test_timer_state_serialization() {
        let json = serde_json::to_string(&TimerState::Completed { rep_count: 2 }).unwrap();
        assert_eq!(json, r#"{"Completed":{"rep_count":2}}"#);
    }

    #[test]
    fn test_model_state_failed_serialization() {
        let json = serde_json::to_string(&ModelState::Failed("gone".to_string())).unwrap();
        assert_eq!(json, r#"{"Failed":"gone"}"#);
    }

    #[test]
    fn test_response_serialization_error() {
        let resp = Response::Error("test error".to_string());
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"Error":"test error"}"#);
    }

    #[test]
    fn test_response_status_round_trip() {
        let resp = Response::Status(sample_status());
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, parsed);
    }

    #[test]
    fn test_response_routines_round_trip() {
        let resp = Response::Routines {
            routines: vec![demo_routine()],
            current: Some("demo".to_string()),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""n":"Table Stretch - Front""#));
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, parsed);
    }

    #[test]
    fn test_voice_log_entry_camel_case() {
        let entry = VoiceLogEntry {
            session_id: 1_700_000_000_000,
            started_at: 10,
            ended_at: 20,
            trigger: "start".to_string(),
            routine_id: None,
            is_basic_mode: true,
            texts: vec!["start".to_string()],
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("sessionId"));
        assert!(json.contains("isBasicMode"));
        assert!(json.contains("endedAt"));
    }

    #[test]
    fn test_ipc_error_display_io() {
        let err = IpcError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "test"));
        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("test"));
    }

    #[test]
    fn test_ipc_error_display_connection_refused() {
        let err = IpcError::ConnectionRefused;
        assert!(err.to_string().contains("repcued"));
    }

    #[test]
    fn test_ipc_error_display_timeout() {
        let err = IpcError::Timeout;
        assert!(err.to_string().contains("Connection timeout"));
    }
}
