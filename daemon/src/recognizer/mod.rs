pub mod model;
#[cfg(feature = "vosk")]
pub mod vosk;

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use model::{DirectoryBundle, ModelBundle, ModelError, ModelLoader, ModelState};

/// One result from a streaming recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    /// The engine reached an utterance boundary.
    Final(String),
    /// Still accumulating; may be revised.
    Partial(String),
}

impl Transcript {
    pub fn text(&self) -> &str {
        match self {
            Transcript::Final(text) | Transcript::Partial(text) => text,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Transcript::Final(_))
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load model: {0}")]
    Model(String),

    #[error("Failed to create recognizer: {0}")]
    Recognizer(String),

    #[error("Malformed recognizer output: {0}")]
    Malformed(String),

    #[error("Speech engine unavailable: {0}")]
    Unavailable(String),
}

/// Streaming speech-to-text over little-endian 16-bit PCM.
pub trait StreamingRecognizer: Send {
    fn accept(&mut self, pcm_le: &[u8]) -> Result<Transcript, EngineError>;

    /// Force whatever is buffered out as a final result.
    fn flush(&mut self) -> Result<Transcript, EngineError>;
}

pub trait SpeechModel: Send + Sync {
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>, EngineError>;
}

pub trait SpeechEngine: Send + Sync {
    fn load_model(&self, dir: &Path) -> Result<Arc<dyn SpeechModel>, EngineError>;
}

#[derive(Deserialize)]
struct EnginePayload {
    text: Option<String>,
    partial: Option<String>,
}

/// Decode the JSON result convention used by Kaldi-style engines: finals
/// carry `"text"`, partials carry `"partial"`.
pub fn parse_engine_payload(json: &str) -> Result<Transcript, EngineError> {
    let payload: EnginePayload =
        serde_json::from_str(json).map_err(|e| EngineError::Malformed(e.to_string()))?;
    match payload {
        EnginePayload {
            text: Some(text), ..
        } => Ok(Transcript::Final(text.trim().to_string())),
        EnginePayload {
            partial: Some(partial),
            ..
        } => Ok(Transcript::Partial(partial.trim().to_string())),
        _ => Err(EngineError::Malformed(format!(
            "no text or partial field in {}",
            json
        ))),
    }
}

/// Stand-in when no engine is compiled in; loading always fails so the
/// session runs on manual commands only.
pub struct UnavailableEngine;

impl SpeechEngine for UnavailableEngine {
    fn load_model(&self, _dir: &Path) -> Result<Arc<dyn SpeechModel>, EngineError> {
        Err(EngineError::Unavailable(
            "no speech engine compiled in (enable the `vosk` feature)".to_string(),
        ))
    }
}

#[cfg(feature = "vosk")]
pub fn default_engine() -> Arc<dyn SpeechEngine> {
    Arc::new(vosk::VoskEngine)
}

#[cfg(not(feature = "vosk"))]
pub fn default_engine() -> Arc<dyn SpeechEngine> {
    Arc::new(UnavailableEngine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_payload() {
        let t = parse_engine_payload(r#"{"text" : "start please"}"#).unwrap();
        assert_eq!(t, Transcript::Final("start please".to_string()));
        assert!(t.is_final());
    }

    #[test]
    fn test_parse_partial_payload() {
        let t = parse_engine_payload(r#"{"partial" : "sta"}"#).unwrap();
        assert_eq!(t, Transcript::Partial("sta".to_string()));
        assert_eq!(t.text(), "sta");
    }

    #[test]
    fn test_parse_empty_final() {
        let t = parse_engine_payload(r#"{"text" : ""}"#).unwrap();
        assert_eq!(t, Transcript::Final(String::new()));
    }

    #[test]
    fn test_parse_malformed_payload() {
        assert!(matches!(
            parse_engine_payload("not json"),
            Err(EngineError::Malformed(_))
        ));
        assert!(matches!(
            parse_engine_payload(r#"{"result": []}"#),
            Err(EngineError::Malformed(_))
        ));
    }

    #[test]
    fn test_unavailable_engine_fails() {
        let result = UnavailableEngine.load_model(Path::new("/nonexistent"));
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }
}
