//! Data models for the packet store and resend engine

pub mod history;
pub mod packet;
pub mod resend;
pub mod rule;

pub use history::*;
pub use packet::*;
pub use resend::*;
pub use rule::*;
