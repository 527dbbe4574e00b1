use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use termin_engine::Broker;

use crate::api::build_module;

/// The JSON-RPC server wrapping a shared [`Broker`].
pub struct RpcServer {
    broker: Arc<Broker>,
}

impl RpcServer {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers
    /// (browser clients talk to the broker directly). Returns a handle to
    /// stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = build_module(self.broker);
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}
