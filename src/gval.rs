//! Fixed parameters of the ring and default maintenance timings.

/// Bit width M of the identifier space. Ids live in `[0, 2^M)`.
pub const ID_SPACE_BITS: u32 = 32;

/// Number of distinct ids on the ring (2^M).
pub const ID_SPACE_SIZE: u64 = 1u64 << ID_SPACE_BITS;

/// Largest id on the ring. Its successor position is 0.
pub const ID_MAX: u32 = u32::MAX;

/// K: only the top K of the M possible finger slots are maintained.
/// `fingers[i]` targets `self.id + 2^(M - K + i)`.
pub const FINGER_TABLE_LEN: usize = 8;

/// R: length of the successor list.
pub const SUCCESSOR_LIST_LEN: usize = 3;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

// periodic task intervals
pub const DEFAULT_STABILIZE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_FIX_FINGERS_INTERVAL_MS: u64 = 250;
pub const DEFAULT_CHECK_PREDECESSOR_INTERVAL_MS: u64 = 1000;

/// Upper bound of one RPC round trip. Exceeding it is how a peer is declared dead.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 2000;
