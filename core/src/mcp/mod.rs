//! MCP (Model Context Protocol) adapter.
//!
//! Serves the packet operations as MCP tools using the official rmcp SDK.

pub mod sdk_server;

pub use sdk_server::PacketProxyServer;
