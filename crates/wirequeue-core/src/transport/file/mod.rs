//! Offline replay of `.pcap` / `.pcapng` captures.
//!
//! The file is read with `pcap-parser`; both container formats feed one
//! block loop that tracks per-interface link types and timestamp
//! resolution.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use parser::PcapFileSource;
