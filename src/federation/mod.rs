//! Federation with remote peer cells.
//!
//! Each configured endpoint gets a [`Connection`] that supervises its session
//! and retries on failure. The [`ConnectionRegistry`] fans operations out
//! across all of them, and [`create_proxied_tools`] turns a connected
//! endpoint's catalog into local tools.

pub mod connection;
pub mod proxy;
pub mod registry;
pub mod transport;

pub use connection::{Connection, ConnectionError, ConnectionStatus, EndpointInfo};
pub use proxy::create_proxied_tools;
pub use registry::ConnectionRegistry;
pub use transport::{HttpTransport, RemoteSession, RemoteTool, RemoteTransport, TransportError};
