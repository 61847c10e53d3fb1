//! # PacketProxy Core
//!
//! Packet capture store and resend engine for an intercepting proxy.
//!
//! ## Features
//!
//! - SQLite-backed packet history with paging and filters
//! - Field-level modification rules for replayed requests
//! - Repeated, paced resends in sync or detached mode
//! - Access-token gate for state-changing calls
//! - MCP tool server over stdio
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              MCP client (stdio, rmcp SDK)               │
//! ├─────────────────────────────────────────────────────────┤
//! │          PacketProxyServer  →  PacketService            │
//! │  ┌────────┐  ┌──────────┐  ┌──────────┐  ┌───────────┐  │
//! │  │  Auth  │  │  Resend  │──│  Modify  │  │  Storage  │  │
//! │  │  Gate  │  │  Coord.  │──│Transport │  │ (SQLite)  │  │
//! │  └────────┘  └──────────┘  └──────────┘  └───────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod modify;
pub mod resend;
pub mod storage;
pub mod transport;

pub use error::{PacketError, PacketResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
