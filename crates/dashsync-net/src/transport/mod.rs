mod memory;
mod tcp;

use std::sync::Arc;

use dashsync_config::TransportConfig;
use dashsync_core::Transport;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Build the transport described by a `transport:` section.
pub fn transport_from_config(config: &TransportConfig) -> Arc<dyn Transport> {
    match config {
        TransportConfig::Tcp(tcp) => Arc::new(TcpTransport::new(
            tcp.address.clone(),
            tcp.connect_timeout.as_duration(),
        )),
        TransportConfig::Memory => Arc::new(MemoryTransport::new()),
    }
}
