//! MCP server exposing the packet operations through the rmcp SDK.
//!
//! Exactly four tools are registered: `get_history`, `get_configs`,
//! `get_packet_detail` and `resend_packet`.

use std::sync::Arc;

use rmcp::handler::server::tool::{ToolCallContext, ToolRouter};
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_router, ErrorData as McpError, ServerHandler};
use serde::Serialize;
use serde_json::json;

use crate::api::{ConfigParams, HistoryParams, PacketDetailParams, PacketService, ResendParams};
use crate::error::PacketError;

/// MCP front end for a [`PacketService`]
#[derive(Clone)]
pub struct PacketProxyServer {
    service: Arc<PacketService>,
    tool_router: ToolRouter<Self>,
}

impl PacketProxyServer {
    pub fn new(service: Arc<PacketService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }
}

/// Structured tool error; `data.kind` carries the stable error name.
fn to_mcp_error(err: PacketError) -> McpError {
    let message = err.to_string();
    let data = match &err {
        PacketError::InvalidRule { index, .. } => json!({ "kind": err.kind(), "index": index }),
        _ => json!({ "kind": err.kind() }),
    };
    match err {
        PacketError::NotFound(_)
        | PacketError::InvalidArgument(_)
        | PacketError::InvalidRule { .. } => McpError::invalid_params(message, Some(data)),
        PacketError::Unauthorized(_) => McpError::invalid_request(message, Some(data)),
        PacketError::JobAborted(_) | PacketError::Storage(_) => {
            tracing::error!("Tool call failed: {message}");
            McpError::internal_error(message, Some(data))
        }
    }
}

fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    let json = serde_json::to_string_pretty(value).unwrap_or_default();
    CallToolResult::success(vec![Content::text(json)])
}

#[tool_router]
impl PacketProxyServer {
    #[tool(
        description = "List captured packets (without bodies) ordered by id. Supports limit (default 100, max 1000), offset, and optional method, url_contains, status range, origin and order filters.",
        annotations(read_only_hint = true, destructive_hint = false)
    )]
    async fn get_history(
        &self,
        params: Parameters<HistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let page = self
            .service
            .get_history(params.0)
            .await
            .map_err(to_mcp_error)?;
        Ok(json_result(&page))
    }

    #[tool(
        description = "Get proxy configuration by category (e.g. listenPorts, servers). Empty or \"all\" returns every category; unknown names are ignored.",
        annotations(read_only_hint = true, destructive_hint = false)
    )]
    async fn get_configs(
        &self,
        params: Parameters<ConfigParams>,
    ) -> Result<CallToolResult, McpError> {
        let configs = self.service.get_configs(params.0);
        Ok(json_result(&configs))
    }

    #[tool(
        description = "Fetch one packet by id including headers. Request and response bodies are included only when include_body is true.",
        annotations(read_only_hint = true, destructive_hint = false)
    )]
    async fn get_packet_detail(
        &self,
        params: Parameters<PacketDetailParams>,
    ) -> Result<CallToolResult, McpError> {
        let packet = self
            .service
            .get_packet_detail(params.0)
            .await
            .map_err(to_mcp_error)?;
        Ok(json_result(&packet))
    }

    #[tool(
        description = "Resend a captured packet, optionally modified, count times with interval_ms between sends. Requires access_token. With async_mode the call returns a job id immediately.",
        annotations(read_only_hint = false, destructive_hint = true)
    )]
    async fn resend_packet(
        &self,
        params: Parameters<ResendParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .service
            .resend_packet(params.0)
            .await
            .map_err(to_mcp_error)?;
        Ok(json_result(&outcome))
    }
}

impl ServerHandler for PacketProxyServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "packetproxy".into(),
                version: crate::VERSION.into(),
                title: Some("PacketProxy MCP Server".into()),
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "PacketProxy packet store. Use get_history and get_packet_detail to inspect \
                 captured traffic, get_configs to read proxy settings, and resend_packet \
                 (access token required) to replay a request with optional modifications."
                    .into(),
            ),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.tool_router.list_all();
        std::future::ready(Ok(ListToolsResult {
            tools,
            ..Default::default()
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let tool_context = ToolCallContext::new(self, request, context);
            self.tool_router.call(tool_context).await
        }
    }
}
