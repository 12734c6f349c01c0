use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;

use crate::config::EndpointConfig;
use crate::federation::connection::{Connection, ConnectionStatus, EndpointInfo};
use crate::federation::transport::{HttpTransport, RemoteTransport};
use crate::telemetry::TelemetryCollector;

/// Every configured endpoint connection, keyed by endpoint id.
///
/// Clones share the same set. Listing order is insertion order. Entries are
/// added during setup and live until the registry is dropped; there is no
/// removal.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<Vec<Connection>>>,
    transport: Arc<dyn RemoteTransport>,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl ConnectionRegistry {
    /// Registry whose connections speak MCP over Streamable HTTP.
    pub fn new(telemetry: Arc<dyn TelemetryCollector>) -> Self {
        Self::with_transport(Arc::new(HttpTransport), telemetry)
    }

    pub fn with_transport(
        transport: Arc<dyn RemoteTransport>,
        telemetry: Arc<dyn TelemetryCollector>,
    ) -> Self {
        Self {
            connections: Arc::new(RwLock::new(Vec::new())),
            transport,
            telemetry,
        }
    }

    /// Create and store a connection for `config`.
    ///
    /// An existing entry with the same id is replaced in place and handed
    /// back; disconnecting it is the caller's job.
    pub fn add(&self, config: EndpointConfig) -> Option<Connection> {
        let connection = Connection::new(config, self.transport.clone(), self.telemetry.clone());
        let mut connections = self.connections.write();
        match connections.iter_mut().find(|c| c.id() == connection.id()) {
            Some(existing) => {
                tracing::warn!(endpoint = %connection.id(), "replacing existing endpoint");
                Some(std::mem::replace(existing, connection))
            }
            None => {
                connections.push(connection);
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Connection> {
        self.connections.read().iter().find(|c| c.id() == id).cloned()
    }

    pub fn all(&self) -> Vec<Connection> {
        self.connections.read().clone()
    }

    pub fn info_all(&self) -> Vec<EndpointInfo> {
        self.connections.read().iter().map(Connection::info).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|c| c.status() == ConnectionStatus::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Connect every endpoint concurrently and wait for all attempts to settle.
    pub async fn connect_all(&self) {
        let connections = self.all();
        join_all(connections.iter().map(|c| c.connect())).await;
        tracing::info!(
            connected = self.connected_count(),
            total = connections.len(),
            "endpoint fan-out connect settled"
        );
    }

    /// Disconnect every endpoint concurrently and wait for all to settle.
    pub async fn disconnect_all(&self) {
        let connections = self.all();
        join_all(connections.iter().map(|c| c.disconnect())).await;
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &*self.connections.read())
            .finish_non_exhaustive()
    }
}
