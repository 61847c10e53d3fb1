//! Caller-facing packet operations

pub mod packet_api;
pub mod params;

pub use packet_api::PacketService;
pub use params::{ConfigParams, HistoryParams, PacketDetailParams, ResendParams};
