mod log;
mod message;
mod node;
mod state;

pub use self::log::{Entry, Index, Log};
pub use message::{Envelope, Message, BROADCAST};
pub use node::{Node, NodeID, Options, Term, Ticks};
pub use state::{KvStore, State};

/// The number of ticks between leader heartbeats: 0.4s at the driver's
/// 50ms tick, strictly below the minimum election timeout so a healthy
/// leader suppresses elections.
pub const HEARTBEAT_INTERVAL: Ticks = 8;

/// The range of randomized election timeouts for followers and candidates:
/// 0.45-0.60s at the driver's 50ms tick, redrawn on every timer reset.
pub const ELECTION_TIMEOUT_RANGE: std::ops::Range<Ticks> = 9..13;

/// The maximum number of entries in a single append_entries batch. Larger
/// logs drain over multiple round trips.
pub const MAX_APPEND_ENTRIES: usize = 50;
