use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use vosk::{DecodingState, Model, Recognizer};

use super::{EngineError, SpeechEngine, SpeechModel, StreamingRecognizer, Transcript};

/// Vosk (Kaldi) engine; needs libvosk at link time.
pub struct VoskEngine;

impl SpeechEngine for VoskEngine {
    fn load_model(&self, dir: &Path) -> Result<Arc<dyn SpeechModel>, EngineError> {
        let path = dir.to_string_lossy().into_owned();
        let model = Model::new(path.as_str())
            .ok_or_else(|| EngineError::Model(format!("vosk rejected model at {}", path)))?;
        Ok(Arc::new(VoskModel { model }))
    }
}

struct VoskModel {
    model: Model,
}

impl SpeechModel for VoskModel {
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>, EngineError> {
        let recognizer = Recognizer::new(&self.model, sample_rate as f32).ok_or_else(|| {
            EngineError::Recognizer(format!("vosk recognizer at {} Hz", sample_rate))
        })?;
        Ok(Box::new(VoskRecognizer {
            recognizer,
            samples: Vec::new(),
        }))
    }
}

struct VoskRecognizer {
    recognizer: Recognizer,
    samples: Vec<i16>,
}

impl VoskRecognizer {
    fn final_text(&mut self, from_flush: bool) -> Transcript {
        let result = if from_flush {
            self.recognizer.final_result()
        } else {
            self.recognizer.result()
        };
        let text = result
            .single()
            .map(|r| r.text.trim().to_string())
            .unwrap_or_default();
        Transcript::Final(text)
    }
}

impl StreamingRecognizer for VoskRecognizer {
    fn accept(&mut self, pcm_le: &[u8]) -> Result<Transcript, EngineError> {
        self.samples.clear();
        self.samples.extend(
            pcm_le
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
        let state = self
            .recognizer
            .accept_waveform(&self.samples)
            .map_err(|e| EngineError::Malformed(format!("{:?}", e)))?;
        match state {
            DecodingState::Finalized => Ok(self.final_text(false)),
            DecodingState::Running => {
                let partial = self.recognizer.partial_result().partial.trim().to_string();
                Ok(Transcript::Partial(partial))
            }
            DecodingState::Failed => {
                debug!("vosk decoding failed for frame");
                Err(EngineError::Malformed("decoding failed".to_string()))
            }
        }
    }

    fn flush(&mut self) -> Result<Transcript, EngineError> {
        Ok(self.final_text(true))
    }
}
