pub mod buffer;
pub mod config;
pub mod file;

#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;

#[cfg(feature = "hackrf")]
pub mod hackrf;

#[cfg(feature = "airspy")]
pub mod airspy;

#[cfg(feature = "bladerf")]
pub mod bladerf;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use num_complex::Complex32;

use crate::buffer::DataBuffer;
use iq_dsp::downsampler::FcPos;

/// One complex I/Q sample.
pub type IQSample = Complex32;

/// A block of I/Q samples produced as one unit of work.
pub type IQSampleVector = Vec<IQSample>;

/// Errors raised by SDR sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Device enumeration or claim failed.
    #[error("device open: {0}")]
    Open(String),
    /// Invalid configuration key or value.
    #[error("configuration: {0}")]
    Config(String),
    /// Hardware I/O failure after streaming started.
    #[error("transfer: {0}")]
    Transfer(String),
}

/// Common trait for all SDR sources.
///
/// A source is opened bound to one physical unit, configured once from a
/// key=value string, then started. `start` spawns an internally owned
/// producer thread that pushes sample blocks into the given buffer until
/// the stop flag is observed, then signals end-of-stream on the buffer.
pub trait Source: Send {
    /// Parse and apply a device configuration string.
    fn configure(&mut self, config: &str) -> Result<(), SourceError>;

    /// Frequency requested at configure time, in Hz.
    fn get_configured_frequency(&self) -> f64;

    /// Frequency the hardware actually tuned to, in Hz.
    /// May differ from the request by tuning-step rounding.
    fn get_frequency(&self) -> f64;

    /// Actual IF sample rate the hardware emits, in Hz.
    fn get_sample_rate(&self) -> f64;

    /// log2 of the decimation factor requested via the `decim` key.
    fn get_decimation(&self) -> u32 {
        0
    }

    /// Center frequency position requested via the `fcpos` key.
    fn get_fc_pos(&self) -> FcPos {
        FcPos::Center
    }

    /// Log device-specific parameters after configuration.
    fn log_specific_parms(&self) {}

    /// Begin streaming sample blocks into `buffer` on an internal thread.
    /// The thread observes `stop` on every iteration and calls
    /// `buffer.push_end()` when it exits for any reason.
    fn start(
        &mut self,
        buffer: Arc<DataBuffer<IQSample>>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), SourceError>;

    /// Request and wait for the producer thread to terminate.
    /// Safe to call multiple times, and before `start`.
    fn stop(&mut self);
}
