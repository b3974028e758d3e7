pub mod udp;

use num_complex::Complex32;

pub use udp::UdpSink;

/// Errors raised by output sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Destination address could not be resolved.
    #[error("address: {0}")]
    Addr(String),
    /// The local socket could not be created or connected.
    #[error("bind: {0}")]
    Bind(#[source] std::io::Error),
    /// A datagram send failed. Best-effort: the caller logs and moves on.
    #[error("send: {0}")]
    Send(#[source] std::io::Error),
}

/// Destination for processed sample blocks.
///
/// Sinks are best-effort and unacknowledged: `write` failures are
/// reported but the pipeline keeps attempting subsequent writes.
pub trait SampleSink: Send {
    fn write(&mut self, samples: &[Complex32]) -> Result<(), SinkError>;
}
