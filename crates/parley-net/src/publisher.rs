use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use parley_shared::protocol::Envelope;
use parley_shared::schema::{resolve_address, Namespace};
use parley_shared::{Address, ParleyError, SchemaRegistry};

use crate::transport::Transport;

/// Validates events locally, then hands them to the transport.
///
/// Never retries: a transport failure is returned to the caller, which owns
/// the retry policy (e.g. marking a pending message as errored).
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    registry: Arc<SchemaRegistry>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Publish a typed event on the channel identified by `args`.
    pub async fn publish<N: Namespace>(
        &self,
        args: &N::Args,
        event: &N::Event,
    ) -> Result<Address, ParleyError> {
        let address = resolve_address::<N>(args);
        let envelope = N::encode(event)?;
        self.send(address, envelope).await
    }

    /// Publish an untyped payload, validated against the registry.
    pub async fn publish_raw<S: AsRef<str>>(
        &self,
        namespace: &str,
        args: &[S],
        event: &str,
        data: Value,
    ) -> Result<Address, ParleyError> {
        let address = self.registry.resolve(namespace, args)?;
        self.registry.validate(namespace, event, data.clone())?;
        self.send(address, Envelope::new(event, data)).await
    }

    async fn send(&self, address: Address, envelope: Envelope) -> Result<Address, ParleyError> {
        match self.transport.publish(&address, &envelope).await {
            Ok(()) => {
                debug!(address = %address, event = %envelope.name, "Event published");
                Ok(address)
            }
            Err(e) => {
                warn!(address = %address, event = %envelope.name, error = %e, "Publish failed");
                Err(e.into())
            }
        }
    }
}
