//! Console composition root
//!
//! Wires the single bus connection and the long-lived services the shell
//! hands out to its views.

use std::sync::Arc;

use anyhow::Context;
use robodeck_protocol::TelemetryTopic;

use crate::application::services::{
    NavigationService, SystemStatusService, TelemetryFeed, VelocityController,
};
use crate::config::{self, ClientConfig, ConfigError};
use crate::infrastructure::messaging::{BusConnection, ConnectionState, StatusSubscription};
use crate::infrastructure::platform::FileStorage;
use crate::infrastructure::websocket::WsConnector;
use crate::ports::outbound::{StorageProvider, TransportConnector};

pub struct Console {
    connection: BusConnection,
    controller: VelocityController,
    navigation: NavigationService,
    storage: Arc<dyn StorageProvider>,
    _status_log: StatusSubscription,
}

impl Console {
    /// Desktop wiring: settings file, process environment, WebSocket transport.
    pub fn desktop() -> anyhow::Result<Self> {
        let storage: Arc<dyn StorageProvider> = Arc::new(FileStorage::new());
        let config = ClientConfig::load(storage.as_ref()).context("Failed to load configuration")?;
        Ok(Self::start(config, Arc::new(WsConnector::new()), storage))
    }

    /// Build the services and start connecting. Must run inside a tokio runtime.
    pub fn start(
        config: ClientConfig,
        connector: Arc<dyn TransportConnector>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        tracing::info!(url = %config.url, "Starting robodeck console");

        let connection = BusConnection::new(connector, config.reconnect);
        let status_log = connection.on_status_change(|state| match state {
            ConnectionState::Error => tracing::warn!("Bus connection error"),
            state => tracing::debug!(?state, "Bus connection state"),
        });
        let controller = VelocityController::spawn(&connection, config.controller.clone());
        let navigation = NavigationService::new(&connection);

        connection.connect(config.url);

        Self {
            connection,
            controller,
            navigation,
            storage,
            _status_log: status_log,
        }
    }

    pub fn connection(&self) -> &BusConnection {
        &self.connection
    }

    pub fn controller(&self) -> &VelocityController {
        &self.controller
    }

    pub fn navigation(&self) -> &NavigationService {
        &self.navigation
    }

    /// Subscribe a view to telemetry topics.
    pub fn telemetry(&self, topics: impl IntoIterator<Item = TelemetryTopic>) -> TelemetryFeed {
        TelemetryFeed::subscribe(&self.connection, topics)
    }

    /// Node and topic listings for the system view.
    pub fn system_status(&self) -> SystemStatusService {
        SystemStatusService::new(&self.connection)
    }

    /// Save a new bus URL and reconnect to it.
    pub fn set_url(&self, url: &str) -> Result<(), ConfigError> {
        config::apply_url(self.storage.as_ref(), &self.connection, url)
    }

    pub fn reset_url(&self) -> Result<(), ConfigError> {
        config::reset_url(self.storage.as_ref(), &self.connection)
    }

    /// Stop the robot and close the connection.
    pub async fn shutdown(self) {
        let Self {
            connection,
            controller,
            ..
        } = self;
        controller.shutdown().await;
        connection.disconnect();
        tracing::info!("Console stopped");
    }
}
