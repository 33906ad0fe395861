use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecognised capture file magic {magic:02x?}")]
    UnknownMagic { magic: [u8; 4] },
    #[error("PCAP parse error ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
}
