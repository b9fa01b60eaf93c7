//! Client assembly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::applier::UpdateApplier;
use crate::channel::{ClientChannel, ClientNotice};
use crate::checker::UpdateChecker;
use crate::config::ClientConfig;
use crate::error::HmrResult;
use crate::evaluator::ChunkEvaluator;
use crate::registry::SharedRegistry;
use crate::state::ConnectionState;
use crate::transport::{HttpTransport, UpdateTransport};

/// A registry kept in sync with a dev server.
pub struct HotClient {
    config: ClientConfig,
    registry: SharedRegistry,
    checker: Arc<UpdateChecker>,
    channel: ClientChannel,
}

impl HotClient {
    /// Client fetching updates over HTTP from `config.server_url`.
    pub fn new(
        config: ClientConfig,
        registry: SharedRegistry,
        evaluator: Arc<dyn ChunkEvaluator>,
    ) -> HmrResult<Self> {
        let transport = HttpTransport::new(config.server_url.clone(), config.request_timeout())?;
        Ok(Self::with_transport(
            config,
            registry,
            Arc::new(transport),
            evaluator,
        ))
    }

    pub fn with_transport(
        config: ClientConfig,
        registry: SharedRegistry,
        transport: Arc<dyn UpdateTransport>,
        evaluator: Arc<dyn ChunkEvaluator>,
    ) -> Self {
        let checker = Arc::new(UpdateChecker::new(
            Arc::new(ConnectionState::new()),
            transport,
            evaluator,
            UpdateApplier::new(Arc::clone(&registry)),
            config.checker_options(),
        ));
        let channel = ClientChannel::new(Arc::clone(&checker), config.policy);

        Self {
            config,
            registry,
            checker,
            channel,
        }
    }

    /// Deliver update notices to `tx`.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<ClientNotice>) -> Self {
        self.channel = self.channel.with_notices(tx);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn checker(&self) -> &Arc<UpdateChecker> {
        &self.checker
    }

    pub fn channel(&self) -> &ClientChannel {
        &self.channel
    }

    /// Keep the push channel connected, reconnecting after
    /// `reconnect_delay_ms` whenever it drops. Only returns on invalid
    /// configuration.
    pub async fn run(&self) -> HmrResult<()> {
        let url = self.config.socket_url()?;
        let delay = self.config.reconnect_delay();

        loop {
            match self.channel.connect(&url).await {
                Ok(()) => info!("Push channel {} closed", url),
                Err(err) => warn!("Push channel {} failed: {}", url, err),
            }
            info!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}
