//! A bus already connected to a scripted server.

use std::sync::Arc;

use super::{ScriptedConnector, ServerEnd, StateRecorder};
use crate::infrastructure::messaging::{BusConnection, ConnectionState};
use crate::infrastructure::websocket::ReconnectPolicy;

pub struct BusRig {
    pub connector: Arc<ScriptedConnector>,
    pub bus: BusConnection,
    pub recorder: StateRecorder,
    /// Server side of the first link
    pub server: ServerEnd,
}

impl BusRig {
    pub const URL: &'static str = "ws://robot.local:9090";

    /// Connect with the default policy to a connector that always accepts.
    pub async fn connected() -> Self {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(Self::URL);
        assert!(
            recorder.wait_for(ConnectionState::Connected).await,
            "scripted bus never connected"
        );
        let server = connector.next_server().await;

        Self {
            connector,
            bus,
            recorder,
            server,
        }
    }
}
