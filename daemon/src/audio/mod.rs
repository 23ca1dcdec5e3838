pub mod capture;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub use capture::CpalInput;

pub const SAMPLE_RATE: u32 = 16_000;
/// Floor for the capture buffer, in bytes.
pub const MIN_BUFFER_BYTES: usize = 8192;
/// Samples per read, about 128 ms at 16 kHz.
pub const READ_CHUNK_SAMPLES: usize = 2048;

/// Mono 16-bit PCM at `sample_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No input device available")]
    NoDevice,

    #[error("Input device unavailable: {0}")]
    Device(String),

    #[error("Audio read failed: {0}")]
    Read(String),

    #[error("Input device released")]
    Released,
}

/// An open microphone. `read` blocks until the buffer is full or the device
/// fails; a released device reports [`CaptureError::Released`].
pub trait InputDevice: Send {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError>;

    /// Handle that releases the device from any thread.
    fn release_handle(&self) -> ReleaseHandle;
}

pub trait AudioInput: Send + Sync {
    fn min_buffer_bytes(&self, format: CaptureFormat) -> usize;

    fn open(
        &self,
        format: CaptureFormat,
        buffer_bytes: usize,
    ) -> Result<Box<dyn InputDevice>, CaptureError>;
}

/// Idempotent, cross-thread release of an input device.
#[derive(Clone)]
pub struct ReleaseHandle {
    released: Arc<AtomicBool>,
    on_release: Arc<dyn Fn() + Send + Sync>,
}

impl ReleaseHandle {
    pub fn new<F>(on_release: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            released: Arc::new(AtomicBool::new(false)),
            on_release: Arc::new(on_release),
        }
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            (self.on_release)();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Larger of the device minimum and `floor`, rounded down to whole samples.
pub fn capture_buffer_bytes(device_min: usize, floor: usize) -> usize {
    (device_min.max(floor) / 2) * 2
}

/// Samples per read: the configured chunk, capped by what the buffer holds.
pub fn frame_samples(buffer_bytes: usize, chunk_samples: usize) -> usize {
    chunk_samples.min(buffer_bytes / 2).max(1)
}

pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
