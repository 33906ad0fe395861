use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader};

use crate::transport::{PacketEvent, PacketSource, TransportError};

use super::error::FileSourceError;
use super::layout;
use super::reader::{FileFormat, detect_format, legacy_ts_to_seconds, pcapng_ts_to_seconds};

/// `PacketSource` replaying the frames of a capture file in file order.
pub struct PcapFileSource {
    reader: FileReader,
    links: LinkState,
}

enum FileReader {
    Legacy(LegacyPcapReader<File>),
    PcapNg(PcapNGReader<File>),
}

impl FileReader {
    fn blocks(&mut self) -> &mut dyn PcapReaderIterator {
        match self {
            FileReader::Legacy(reader) => reader,
            FileReader::PcapNg(reader) => reader,
        }
    }
}

/// Link metadata announced by header blocks, applied to later packets.
#[derive(Debug)]
struct LinkState {
    legacy_linktype: Linktype,
    legacy_nanosecond: bool,
    interfaces: Vec<(Linktype, u8)>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            legacy_linktype: Linktype::ETHERNET,
            legacy_nanosecond: false,
            interfaces: Vec::new(),
        }
    }
}

impl LinkState {
    fn interface(&self, if_id: u32) -> (Linktype, u8) {
        self.interfaces
            .get(if_id as usize)
            .copied()
            .unwrap_or((Linktype::ETHERNET, 6))
    }

    fn accept(&mut self, block: PcapBlockOwned<'_>) -> Option<PacketEvent> {
        match block {
            PcapBlockOwned::LegacyHeader(header) => {
                self.legacy_linktype = header.network;
                self.legacy_nanosecond = header.is_nanosecond_precision();
                None
            }
            PcapBlockOwned::Legacy(packet) => Some(PacketEvent {
                ts: Some(legacy_ts_to_seconds(
                    packet.ts_sec,
                    packet.ts_usec,
                    self.legacy_nanosecond,
                )),
                linktype: self.legacy_linktype,
                data: truncate(packet.data, packet.caplen).to_vec(),
            }),
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                self.interfaces.clear();
                None
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
                self.interfaces.push((intf.linktype, intf.if_tsresol));
                None
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
                let (linktype, tsresol) = self.interface(packet.if_id);
                Some(PacketEvent {
                    ts: Some(pcapng_ts_to_seconds(packet.ts_high, packet.ts_low, tsresol)),
                    linktype,
                    data: truncate(packet.data, packet.caplen).to_vec(),
                })
            }
            PcapBlockOwned::NG(Block::SimplePacket(packet)) => {
                let (linktype, _) = self.interface(0);
                Some(PacketEvent {
                    ts: None,
                    linktype,
                    data: truncate(packet.data, packet.origlen).to_vec(),
                })
            }
            _ => None,
        }
    }
}

// Block payloads may carry alignment padding past the captured length.
fn truncate(data: &[u8], caplen: u32) -> &[u8] {
    &data[..data.len().min(caplen as usize)]
}

fn pcap_error(context: &'static str, err: impl Display) -> FileSourceError {
    FileSourceError::Pcap {
        context,
        message: err.to_string(),
    }
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        Self::open_file(path).map_err(TransportError::from)
    }

    fn open_file(path: &Path) -> Result<Self, FileSourceError> {
        let mut file = File::open(path)?;
        let reader = match detect_format(&mut file)? {
            FileFormat::Legacy => FileReader::Legacy(
                LegacyPcapReader::new(layout::READER_BUFFER_SIZE, file)
                    .map_err(|e| pcap_error("pcap reader init", e))?,
            ),
            FileFormat::PcapNg => FileReader::PcapNg(
                PcapNGReader::new(layout::READER_BUFFER_SIZE, file)
                    .map_err(|e| pcap_error("pcapng reader init", e))?,
            ),
        };
        Ok(Self {
            reader,
            links: LinkState::default(),
        })
    }

    fn next_event(&mut self) -> Result<Option<PacketEvent>, FileSourceError> {
        let links = &mut self.links;
        let reader = self.reader.blocks();
        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let event = links.accept(block);
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| pcap_error("capture refill", e))?;
                }
                Err(e) => return Err(pcap_error("capture next block", e)),
            }
        }
    }
}

impl PacketSource for PcapFileSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, TransportError> {
        self.next_event().map_err(TransportError::from)
    }
}
