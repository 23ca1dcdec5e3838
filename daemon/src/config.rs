use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::CaptureFormat;
use crate::coordinator::{CoordinatorSettings, CueTiming};
use crate::voice::PipelineSettings;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub cues: CuesConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_min_buffer_bytes")]
    pub min_buffer_bytes: usize,
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            min_buffer_bytes: default_min_buffer_bytes(),
            frame_samples: default_frame_samples(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_device() -> String {
    "default".to_string()
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_min_buffer_bytes() -> usize {
    8192
}
fn default_frame_samples() -> usize {
    2048
}
fn default_channel_capacity() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    #[serde(default = "default_required_dirs")]
    pub required_dirs: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            bundle_dir: None,
            install_dir: None,
            required_dirs: default_required_dirs(),
        }
    }
}

fn default_model_name() -> String {
    "model-en-us".to_string()
}

fn default_required_dirs() -> Vec<String> {
    vec!["conf".to_string(), "am".to_string(), "graph".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VoiceConfig {
    #[serde(default = "default_voice_enabled")]
    pub enabled: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: default_voice_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_voice_enabled() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_basic_duration_seconds")]
    pub basic_duration_seconds: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            basic_duration_seconds: default_basic_duration_seconds(),
        }
    }
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_basic_duration_seconds() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CuesConfig {
    #[serde(default = "default_notification_to_count_delay")]
    pub notification_to_count_delay_ms: u64,
    #[serde(default = "default_finished_after_notification_delay")]
    pub finished_after_notification_delay_ms: u64,
    #[serde(default)]
    pub mute_all_sounds: bool,
    #[serde(default = "default_max_spoken_count")]
    pub max_spoken_count: u32,
}

impl Default for CuesConfig {
    fn default() -> Self {
        Self {
            notification_to_count_delay_ms: default_notification_to_count_delay(),
            finished_after_notification_delay_ms: default_finished_after_notification_delay(),
            mute_all_sounds: false,
            max_spoken_count: default_max_spoken_count(),
        }
    }
}

fn default_notification_to_count_delay() -> u64 {
    700
}

fn default_finished_after_notification_delay() -> u64 {
    500
}

fn default_max_spoken_count() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_commands_per_second")]
    pub commands_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            commands_per_second: default_commands_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: default_rate_limit_enabled(),
        }
    }
}

fn default_commands_per_second() -> u32 {
    10
}

fn default_burst_capacity() -> u32 {
    20
}

fn default_rate_limit_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_socket_operation_timeout")]
    pub socket_operation_timeout_seconds: u64,
    #[serde(default = "default_shutdown_join_timeout")]
    pub shutdown_join_timeout_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            socket_operation_timeout_seconds: default_socket_operation_timeout(),
            shutdown_join_timeout_ms: default_shutdown_join_timeout(),
        }
    }
}

fn default_socket_operation_timeout() -> u64 {
    5
}

fn default_shutdown_join_timeout() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct PathsConfig {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn socket_path(&self) -> PathBuf {
        self.paths
            .socket_path
            .clone()
            .unwrap_or_else(default_socket_path)
    }

    /// Preferences, voice log and the installed model live here.
    pub fn data_dir(&self) -> PathBuf {
        self.paths.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("repcue")
        })
    }

    pub fn model_install_dir(&self) -> PathBuf {
        self.model
            .install_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("models"))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            format: CaptureFormat {
                sample_rate: self.audio.sample_rate,
            },
            min_buffer_bytes: self.audio.min_buffer_bytes,
            chunk_samples: self.audio.frame_samples,
            debounce: Duration::from_millis(self.voice.debounce_ms),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            tick: Duration::from_millis(self.timer.tick_ms.max(1)),
            cues: CueTiming {
                notification_to_count: Duration::from_millis(
                    self.cues.notification_to_count_delay_ms,
                ),
                finished_after_notification: Duration::from_millis(
                    self.cues.finished_after_notification_delay_ms,
                ),
                max_spoken_count: self.cues.max_spoken_count,
            },
        }
    }
}

pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .map(|dir| dir.join("repcued.sock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/repcued.sock"))
}

pub fn load_config() -> Result<Config> {
    let config_path = match get_config_path() {
        Some(path) => path,
        None => {
            tracing::warn!("No config directory available, using defaults");
            return Ok(Config::default());
        }
    };

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("repcue").join("config.toml"))
}
