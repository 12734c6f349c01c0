//! soma: an MCP server host ("cell") that serves local tools, resources and
//! prompts, and federates the tools of remote MCP endpoints.

pub mod api;
pub mod catalog;
pub mod cell;
pub mod config;
pub mod federation;
pub mod mcp;
pub mod telemetry;
