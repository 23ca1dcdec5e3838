use regex::Regex;
use shared::ipc::TimerCommand;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Turns a lowercased final transcript into at most one command.
///
/// Patterns are whole-word and checked in priority order; the first match
/// wins. Digits are never mapped to a command so the app's own spoken
/// counts cannot trigger it. A transcript identical to the last accepted one
/// inside the debounce window is dropped.
pub struct CommandInterpreter {
    patterns: Vec<(TimerCommand, Regex)>,
    debounce: Duration,
    last_accepted: Option<(String, Instant)>,
}

impl CommandInterpreter {
    pub fn new(debounce: Duration) -> Self {
        let patterns = [
            (TimerCommand::Restart, r"\brestart\b"),
            (TimerCommand::Start, r"\b(start|starts|star|stat)\b"),
            (TimerCommand::Next, r"\b(next|nex)\b"),
            (TimerCommand::Done, r"\bdone\b"),
            (TimerCommand::Reset, r"\breset\b"),
        ]
        .into_iter()
        .filter_map(|(command, pattern)| Regex::new(pattern).ok().map(|re| (command, re)))
        .collect();

        Self {
            patterns,
            debounce,
            last_accepted: None,
        }
    }

    pub fn interpret(&mut self, text: &str, now: Instant) -> Option<TimerCommand> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some((last_text, at)) = &self.last_accepted {
            if last_text == text && now.saturating_duration_since(*at) < self.debounce {
                debug!("Ignoring duplicate command (debounced): '{}'", text);
                return None;
            }
        }

        let command = self
            .patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(command, _)| *command)?;

        self.last_accepted = Some((text.to_string(), now));
        debug!("Detected '{}' command in '{}'", command, text);
        Some(command)
    }
}

/// Lowercase, drop engine annotations such as `[unk]` and collapse
/// repeated words and whitespace.
pub fn normalize_transcript(text: &str) -> String {
    let annotations = Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)");
    let lowered = text.to_lowercase();
    let stripped = match &annotations {
        Ok(re) => re.replace_all(&lowered, " ").into_owned(),
        Err(_) => lowered,
    };

    let mut words: Vec<&str> = Vec::new();
    for word in stripped.split_whitespace() {
        if words.last() != Some(&word) {
            words.push(word);
        }
    }
    let normalized = words.join(" ");
    debug!("Normalized transcript: '{}' -> '{}'", text.trim(), normalized);
    normalized
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
