use std::sync::Arc;

use async_trait::async_trait;
use drover_domain::TalosConfig;
use tracing::debug;

use crate::api::MachineApi;
use crate::error::MachineError;
use crate::grpc::GrpcMachine;
use crate::transport;
use crate::types::Timeouts;

/// A short-lived node client handle. Dropping the last clone closes the
/// underlying connection.
pub type Client = Arc<dyn MachineApi>;

/// How a client was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Self-signed endpoint, no cluster config required.
    Maintenance,
    /// Authenticated with the cluster PKI.
    Cluster,
}

/// Builds node clients for the reconcilers. Implementations decide transport;
/// the state machines only see [`MachineApi`].
#[async_trait]
pub trait ClientProvider: Send + Sync + 'static {
    async fn maintenance(&self, address: &str) -> Result<Client, MachineError>;

    async fn cluster(&self, pki: &TalosConfig, address: &str) -> Result<Client, MachineError>;
}

/// gRPC-backed provider.
///
/// When `local_socket` is set and the machine has no management address,
/// endpoint resolution falls back to it; in-process and test deployments run
/// the node API behind a unix socket.
pub struct GrpcProvider {
    timeouts: Timeouts,
    local_socket: Option<String>,
}

impl GrpcProvider {
    pub fn new(timeouts: Timeouts, local_socket: Option<String>) -> Self {
        Self { timeouts, local_socket }
    }

    fn resolve<'a>(&'a self, address: &'a str) -> Result<String, MachineError> {
        if !address.is_empty() {
            return Ok(address.to_string());
        }
        match &self.local_socket {
            Some(path) => Ok(format!("unix://{}", path)),
            None => Err(MachineError::connection("machine has no management address")),
        }
    }
}

#[async_trait]
impl ClientProvider for GrpcProvider {
    async fn maintenance(&self, address: &str) -> Result<Client, MachineError> {
        let endpoint = self.resolve(address)?;
        debug!(endpoint = %endpoint, "building maintenance client");
        let channel = transport::connect_maintenance(&endpoint).await?;
        Ok(Arc::new(GrpcMachine::new(channel, self.timeouts)))
    }

    async fn cluster(&self, pki: &TalosConfig, address: &str) -> Result<Client, MachineError> {
        let endpoint = self.resolve(address)?;
        debug!(endpoint = %endpoint, "building cluster client");
        let channel =
            transport::connect_with_pki(&endpoint, &pki.ca, &pki.crt, &pki.key).await?;
        Ok(Arc::new(GrpcMachine::new(channel, self.timeouts)))
    }
}
