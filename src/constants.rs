pub const HEADER_LEN: usize = 6;

// IPv4 UDP payload ceiling: 65535 - 20 (IP) - 8 (UDP).
pub const MAX_DATAGRAM_LEN: usize = 65_507;
pub const MAX_PAYLOAD_LIMIT: usize = MAX_DATAGRAM_LEN - HEADER_LEN;
pub const DEFAULT_MAX_PAYLOAD: usize = 60_000;

pub const RECV_BUFFER_LEN: usize = 65_537;

pub const MIN_ID_BITS: u8 = 2;
pub const MAX_ID_BITS: u8 = 16;
pub const DEFAULT_ID_BITS: u8 = 16;

pub const DEFAULT_EVICTION_WINDOW: u16 = 32;
pub const DEFAULT_IN_FLIGHT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 250;
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

pub const RATE_WINDOW_FRAMES: u32 = 10;
