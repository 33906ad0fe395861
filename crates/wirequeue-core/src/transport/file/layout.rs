pub const READER_BUFFER_SIZE: usize = 64 * 1024;

pub const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Legacy pcap magics as stored on disk: micro/nano precision, both byte orders.
pub const LEGACY_MAGICS: [[u8; 4]; 4] = [
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0x4d, 0x3c, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
];

/// `if_tsresol` value for nanosecond timestamps.
pub const TSRESOL_NANOS: u8 = 9;
