/// Maximum payload length of a single wire frame (64 KiB).
pub const MAX_FRAME: usize = 64 * 1024;

/// Frame tag for a JSON payload on the stream transport.
pub const FRAME_TAG_JSON: u8 = 0x01;

/// Frame tag for a Protobuf payload on the stream transport.
pub const FRAME_TAG_PROTOBUF: u8 = 0x02;

/// Seconds a stream client has to complete the `AUTH` preamble.
pub const AUTH_DEADLINE_SECS: u64 = 30;

/// Per-write deadline for outbound frames.
pub const WRITE_WAIT_SECS: u64 = 10;

/// Interval between server-originated application-level pings.
pub const PING_PERIOD_SECS: u64 = 54;

/// A session with no inbound traffic for this long is considered dead.
/// Twice the usual WebSocket idle window, to tolerate slow clients.
pub const PONG_WAIT_SECS: u64 = 120;

/// TTL of a routing registry entry without a heartbeat.
pub const REGISTRY_TTL_SECS: u64 = 300;

/// Interval between registry TTL refreshes for locally-owned users.
pub const HEARTBEAT_PERIOD_SECS: u64 = 60;

/// Capacity of a session's outbound queue.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Capacity of the per-node cross-node inbound queue.
pub const BUS_QUEUE_SIZE: usize = 1000;

/// Sender id stamped on server-originated control and error messages.
pub const SERVER_SENDER: &str = "server";
