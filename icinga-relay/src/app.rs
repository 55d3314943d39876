//! Component wiring.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;
use crate::bus::EventBus;
use crate::channels::{ChannelDispatcher, ChannelRegistry};
use crate::config::AppConfig;
use crate::downtime::DowntimeMonitor;
use crate::enrichment::{EnrichmentRegistry, EnrichmentStage};
use crate::icinga::{
    ConnectionSupervisor, EventStreamReader, HealthProbe, IcingaClient, StatusVerifier,
    StreamConnector, SupervisorHandle,
};
use crate::router::EventRouter;
use crate::server::StatusServer;
use crate::status::StatusRegistry;

/// The assembled relay, ready to start.
pub struct Relay {
    config: AppConfig,
    bus: EventBus,
    client: IcingaClient,
    status: StatusRegistry,
    cancellation_token: CancellationToken,
}

/// A running relay.
pub struct RelayHandle {
    pub bus: EventBus,
    pub status: StatusRegistry,
    pub supervisor: SupervisorHandle,
    tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Relay {
    pub fn new(config: AppConfig, cancellation_token: CancellationToken) -> Result<Self> {
        let client = IcingaClient::from_config(&config.icinga)?;
        Ok(Self::with_client(config, client, cancellation_token))
    }

    pub fn with_client(
        config: AppConfig,
        client: IcingaClient,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            bus: EventBus::new(),
            client,
            status: StatusRegistry::new(),
            cancellation_token,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start every component, consumers first, then ask the supervisor to
    /// connect.
    pub fn start(self) -> RelayHandle {
        let config = &self.config;
        let token = &self.cancellation_token;
        let mut tasks = Vec::new();

        tasks.push(self.status.spawn(&self.bus, token.clone()));

        let channels = ChannelRegistry::from_config(&config.channels, &config.downtime.event_type);
        tasks.push(ChannelDispatcher::new(self.bus.clone(), channels).spawn(token.clone()));

        let router = EventRouter::from_config(self.bus.clone(), &config.routes, &config.channels);
        tasks.push(router.spawn(token.clone()));

        let enrichers =
            EnrichmentRegistry::with_defaults(self.client.clone(), config.icinga.request_timeout());
        let stage = EnrichmentStage::new(self.bus.clone(), &enrichers, &config.subscriptions);
        tasks.push(stage.spawn(token.clone()));

        tasks.push(DowntimeMonitor::new(self.bus.clone(), &config.downtime).spawn(token.clone()));

        let readers: Vec<Arc<dyn StreamConnector>> = config
            .subscriptions
            .iter()
            .map(|subscription| {
                Arc::new(EventStreamReader::new(
                    self.client.clone(),
                    subscription.clone(),
                    self.bus.clone(),
                    config.icinga.max_event_bytes,
                    token.clone(),
                )) as Arc<dyn StreamConnector>
            })
            .collect();

        let probe: Arc<dyn HealthProbe> = Arc::new(StatusVerifier::new(
            self.client.clone(),
            config.icinga.request_timeout(),
        ));
        let supervisor = ConnectionSupervisor::new(
            probe,
            readers,
            self.bus.clone(),
            config.icinga.retry_delay(),
            self.client.base_url(),
        )
        .spawn(token.clone());

        if config.server.enabled {
            let server = StatusServer::new(config.server.clone(), self.status.clone());
            let server_token = token.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(server_token).await {
                    error!(error = %e, "Status server failed");
                }
            }));
        }

        info!(
            url = %self.client.base_url(),
            subscriptions = config.subscriptions.len(),
            routes = config.routes.len(),
            "Relay started"
        );
        supervisor.connect();

        RelayHandle {
            bus: self.bus,
            status: self.status,
            supervisor,
            tasks,
            cancellation_token: self.cancellation_token,
        }
    }
}

impl RelayHandle {
    /// Cancel every component and wait for the long-running tasks to end.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Relay stopped");
    }
}
