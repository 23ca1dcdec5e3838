use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    AudioInput, CaptureError, CaptureFormat, InputDevice, ReleaseHandle, MIN_BUFFER_BYTES,
};

const CHUNK_QUEUE_DEPTH: usize = 64;
const READ_POLL: Duration = Duration::from_millis(50);

/// Microphone input through cpal.
///
/// cpal streams are not `Send`, so each opened device gets its own thread
/// that owns the stream until the device is released.
pub struct CpalInput {
    device_name: String,
    queue_depth: usize,
}

impl CpalInput {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            queue_depth: CHUNK_QUEUE_DEPTH,
        }
    }

    /// Callback chunks buffered between the stream and the reader.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}

impl AudioInput for CpalInput {
    fn min_buffer_bytes(&self, _format: CaptureFormat) -> usize {
        let config = find_device(&self.device_name)
            .ok()
            .and_then(|device| device.default_input_config().ok());
        match config.map(|c| c.buffer_size().clone()) {
            Some(SupportedBufferSize::Range { min, .. }) => min as usize * 2,
            _ => MIN_BUFFER_BYTES,
        }
    }

    fn open(
        &self,
        format: CaptureFormat,
        buffer_bytes: usize,
    ) -> Result<Box<dyn InputDevice>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (chunk_tx, chunk_rx) = mpsc::sync_channel(self.queue_depth);
        let failed = Arc::new(AtomicBool::new(false));

        let device_name = self.device_name.clone();
        let stream_failed = Arc::clone(&failed);
        thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || {
                let stream =
                    match start_stream(&device_name, format, buffer_bytes, chunk_tx, stream_failed)
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(()));
                // Either a release message or the handle being dropped ends the stream.
                let _ = release_rx.recv();
                drop(stream);
                debug!("cpal stream dropped");
            })
            .map_err(|e| CaptureError::Device(format!("Failed to spawn capture thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| CaptureError::Device("Capture thread exited early".to_string()))??;

        let release = ReleaseHandle::new(move || {
            let _ = release_tx.send(());
        });

        Ok(Box::new(CpalDevice {
            chunks: chunk_rx,
            pending: VecDeque::with_capacity(buffer_bytes / 2),
            failed,
            release,
        }))
    }
}

struct CpalDevice {
    chunks: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    failed: Arc<AtomicBool>,
    release: ReleaseHandle,
}

impl InputDevice for CpalDevice {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.release.is_released() {
                return if filled > 0 {
                    Ok(filled)
                } else {
                    Err(CaptureError::Released)
                };
            }
            if self.failed.load(Ordering::SeqCst) {
                return Err(CaptureError::Read("Audio stream reported an error".to_string()));
            }

            while filled < buf.len() {
                match self.pending.pop_front() {
                    Some(sample) => {
                        buf[filled] = sample;
                        filled += 1;
                    }
                    None => break,
                }
            }
            if filled == buf.len() {
                break;
            }

            match self.chunks.recv_timeout(READ_POLL) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return if self.release.is_released() {
                        Err(CaptureError::Released)
                    } else {
                        Err(CaptureError::Read("Audio stream closed".to_string()))
                    };
                }
            }
        }
        Ok(filled)
    }

    fn release_handle(&self) -> ReleaseHandle {
        self.release.clone()
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.release.release();
    }
}

fn find_device(name: &str) -> Result<Device, CaptureError> {
    let host = cpal::default_host();

    if !name.is_empty() && name != "default" {
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Device(format!("Failed to enumerate devices: {}", e)))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }
        warn!(device = %name, "Input device not found, falling back to default");
    }

    host.default_input_device().ok_or(CaptureError::NoDevice)
}

/// Prefer a native mono config at the target rate; otherwise take the
/// device default and convert in the callback.
fn choose_config(
    device: &Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat, Option<SupportedBufferSize>), CaptureError> {
    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    for supported in supported_configs {
        debug!("Supported config: {:?}", supported);
        if supported.channels() == 1
            && supported.min_sample_rate().0 <= sample_rate
            && supported.max_sample_rate().0 >= sample_rate
        {
            let chosen = supported.with_sample_rate(cpal::SampleRate(sample_rate));
            let buffer = chosen.buffer_size().clone();
            return Ok((chosen.config(), chosen.sample_format(), Some(buffer)));
        }
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(format!("Failed to get default config: {}", e)))?;
    let buffer = fallback.buffer_size().clone();
    Ok((fallback.config(), fallback.sample_format(), Some(buffer)))
}

fn start_stream(
    device_name: &str,
    format: CaptureFormat,
    buffer_bytes: usize,
    chunk_tx: SyncSender<Vec<i16>>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, CaptureError> {
    let device = find_device(device_name)?;
    let (mut config, sample_format, buffer_range) = choose_config(&device, format.sample_rate)?;

    let frames = (buffer_bytes / 2) as u32;
    if let Some(SupportedBufferSize::Range { min, max }) = buffer_range {
        if (min..=max).contains(&frames) {
            config.buffer_size = BufferSize::Fixed(frames);
        }
    }

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = config.sample_rate.0,
        channels = config.channels,
        ?sample_format,
        "Opening input stream"
    );

    let converter = Converter {
        channels: config.channels as usize,
        from_rate: config.sample_rate.0,
        to_rate: format.sample_rate,
    };

    let error_flag = Arc::clone(&failed);
    let on_error = move |err| {
        error!("Audio stream error: {}", err);
        error_flag.store(true, Ordering::SeqCst);
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &_| forward(converter.convert(data), &chunk_tx),
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &_| {
                let samples: Vec<i16> = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                forward(converter.convert(&samples), &chunk_tx);
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &_| {
                let samples: Vec<i16> = data.iter().map(|&s| (s as i32 - 32768) as i16).collect();
                forward(converter.convert(&samples), &chunk_tx);
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Device(format!(
                "Unsupported sample format: {:?}",
                other
            )));
        }
    }
    .map_err(|e| CaptureError::Device(format!("Failed to build stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| CaptureError::Device(format!("Failed to start stream: {}", e)))?;
    Ok(stream)
}

fn forward(chunk: Vec<i16>, chunk_tx: &SyncSender<Vec<i16>>) {
    if let Err(TrySendError::Full(_)) = chunk_tx.try_send(chunk) {
        debug!("Capture queue full, dropping chunk");
    }
}

#[derive(Clone, Copy)]
struct Converter {
    channels: usize,
    from_rate: u32,
    to_rate: u32,
}

impl Converter {
    fn convert(&self, data: &[i16]) -> Vec<i16> {
        let mono = downmix(data, self.channels);
        resample(&mono, self.from_rate, self.to_rate)
    }
}

fn downmix(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Linear interpolation; good enough for command words.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    (0..output_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => (a as f64 + (b as f64 - a as f64) * pos.fract()) as i16,
                (Some(&a), None) => a,
                _ => 0,
            }
        })
        .collect()
}
