//! Packet storage and pagination

mod packet_store;

pub use packet_store::PacketStore;

/// Number of recent packets mirrored in memory
pub const DEFAULT_RING_SIZE: usize = 10_000;
