//! Capture transports.
//!
//! A transport is split into a reading half (`PacketSource`), owned by the
//! capture worker, and a writing half (`PacketSink`), owned by the queue's
//! injection path. Closing a half means dropping it.

pub(crate) mod file;
mod live;

pub use file::PcapFileSource;
pub use live::{DeviceInfo, LiveCapture, LiveSink, LiveSource, list_devices};

use pcap_parser::Linktype;
use thiserror::Error;

/// One captured frame with its link type and capture timestamp (seconds).
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub ts: Option<f64>,
    pub linktype: Linktype,
    pub data: Vec<u8>,
}

/// Reading half of a capture transport.
///
/// `Ok(None)` signals end of stream. `Err(TransportError::TimeoutExpired)`
/// means nothing arrived within the poll interval and the caller may retry.
pub trait PacketSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, TransportError>;
}

/// Writing half of a capture transport.
pub trait PacketSink {
    fn write_packet(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, TransportError> {
        (**self).next_packet()
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn write_packet(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_packet(data)
    }
}

/// Sink for transports that cannot inject, such as file replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnlySink;

impl PacketSink for ReadOnlySink {
    fn write_packet(&mut self, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "packet injection is not available on this transport",
        ))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture error: {0}")]
    Capture(#[from] ::pcap::Error),
    #[error("PCAP parse error ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
    #[error("read timeout expired")]
    TimeoutExpired,
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl From<file::error::FileSourceError> for TransportError {
    fn from(value: file::error::FileSourceError) -> Self {
        match value {
            file::error::FileSourceError::Io(err) => TransportError::Io(err),
            file::error::FileSourceError::UnknownMagic { magic } => TransportError::Pcap {
                context: "capture file magic",
                message: format!("unrecognised bytes {magic:02x?}"),
            },
            file::error::FileSourceError::Pcap { context, message } => {
                TransportError::Pcap { context, message }
            }
        }
    }
}

impl TransportError {
    /// Whether the error only reports an idle poll interval.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::TimeoutExpired | TransportError::Capture(::pcap::Error::TimeoutExpired)
        )
    }
}
