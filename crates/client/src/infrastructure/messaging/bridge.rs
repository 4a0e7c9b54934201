//! Bus bridge task - owns the physical link and every state transition.
//!
//! One task per [`BusConnection`](super::BusConnection). It multiplexes:
//! - commands from the handles (connect, disconnect, URL change)
//! - results of connection attempts, tagged with a session number so a
//!   superseded attempt can never win
//! - events from the open link (frames, close, failure)
//! - the reconnect timer
//!
//! Everything that changes connection state happens here, so observers see
//! transitions in the order they occur.

use std::pin::Pin;
use std::sync::Arc;

use robodeck_protocol::{parse_server_op, ServerOp};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use super::connection::{ConnectionState, Shared, TransportHandle};
use super::service::failure_message;
use crate::infrastructure::websocket::{validate_bus_url, ReconnectPolicy};
use crate::ports::outbound::{LinkEvent, TransportConnector, TransportError, TransportLink};

/// Requests posted by [`BusConnection`](super::BusConnection) handles.
#[derive(Debug)]
pub(crate) enum Command {
    /// Connect, optionally switching URL first; `None` reuses the last URL
    Connect(Option<String>),
    Disconnect,
    SetUrl(String),
}

type OpenResult = (u64, Result<TransportLink, TransportError>);

pub(crate) fn spawn(
    shared: Arc<Shared>,
    connector: Arc<dyn TransportConnector>,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
) {
    let (opened_tx, opened_rx) = mpsc::unbounded_channel();
    let bridge = Bridge {
        shared,
        connector,
        policy,
        commands,
        opened_tx,
        opened_rx,
        session: 0,
        attempt: 0,
        opening: None,
        inbound: None,
        retry: None,
    };
    tokio::spawn(bridge.run());
}

struct Bridge {
    shared: Arc<Shared>,
    connector: Arc<dyn TransportConnector>,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    opened_tx: mpsc::UnboundedSender<OpenResult>,
    opened_rx: mpsc::UnboundedReceiver<OpenResult>,
    session: u64,
    attempt: u32,
    opening: Option<JoinHandle<()>>,
    inbound: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Bridge {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle dropped
                    None => break,
                },
                Some((session, result)) = self.opened_rx.recv() => {
                    self.handle_opened(session, result);
                }
                event = next_link_event(&mut self.inbound) => self.handle_link_event(event),
                () = retry_elapsed(&mut self.retry) => self.fire_retry(),
            }
        }

        tracing::debug!("Bus bridge task shutting down");
        self.cancel_retry();
        if let Some(task) = self.opening.take() {
            task.abort();
        }
        self.teardown_link();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(url) => self.connect(url),
            Command::Disconnect => self.disconnect(),
            Command::SetUrl(url) => self.set_url(url),
        }
    }

    fn connect(&mut self, url: Option<String>) {
        let state = self.shared.state();
        if state.is_active() {
            tracing::debug!(?state, "Connect requested while already active, ignoring");
            return;
        }

        if let Some(url) = url {
            self.shared.set_url(url);
        }
        let Some(url) = self.shared.url() else {
            tracing::warn!("Connect requested but no bus URL is configured");
            return;
        };

        self.cancel_retry();
        self.set_attempt(0);
        self.shared.set_exhausted(false);
        self.open(url);
    }

    fn disconnect(&mut self) {
        self.cancel_retry();
        if let Some(task) = self.opening.take() {
            task.abort();
        }
        // Invalidate any attempt still in flight
        self.session += 1;
        self.teardown_link();

        if self.shared.state() != ConnectionState::Disconnected {
            tracing::info!("Disconnected from rosbridge");
            self.shared.transition(ConnectionState::Disconnected);
        }
    }

    fn set_url(&mut self, url: String) {
        let live = self.shared.state().is_active() || self.retry.is_some();
        tracing::info!(%url, live, "Bus URL changed");
        self.shared.set_url(url);

        if live {
            self.disconnect();
            self.connect(None);
        }
    }

    fn open(&mut self, url: String) {
        self.session += 1;
        let session = self.session;
        self.shared.transition(ConnectionState::Connecting);

        if let Err(e) = validate_bus_url(&url) {
            self.on_failure(e);
            return;
        }

        tracing::info!(%url, attempt = self.attempt, "Connecting to rosbridge");
        let connector = Arc::clone(&self.connector);
        let opened = self.opened_tx.clone();
        self.opening = Some(tokio::spawn(async move {
            let result = connector.connect(&url).await;
            // Bridge gone means nobody cares about this link any more
            let _ = opened.send((session, result));
        }));
    }

    fn handle_opened(&mut self, session: u64, result: Result<TransportLink, TransportError>) {
        if session != self.session {
            // Dropping a stale link closes it
            tracing::debug!(session, current = self.session, "Discarding superseded connection attempt");
            return;
        }
        self.opening = None;

        match result {
            Ok(link) => self.on_open(link),
            Err(e) => self.on_failure(e),
        }
    }

    fn on_open(&mut self, link: TransportLink) {
        let TransportLink { outbound, inbound } = link;
        let handle = TransportHandle::new(self.session, outbound);

        {
            let mut slot = self.shared.link();
            let replayed = slot.registry.replay(&handle);
            if replayed > 0 {
                tracing::debug!(replayed, "Re-registered topics on new link");
            }
            slot.handle = Some(handle);
        }

        self.inbound = Some(inbound);
        self.set_attempt(0);
        self.shared.set_exhausted(false);
        tracing::info!("Connected to rosbridge");
        self.shared.transition(ConnectionState::Connected);
    }

    fn handle_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Frame(text)) => self.route_inbound(&text),
            Some(LinkEvent::Closed) | None => self.on_closed(),
            Some(LinkEvent::Failed(e)) => self.on_failure(e),
        }
    }

    fn route_inbound(&self, text: &str) {
        match parse_server_op(text) {
            Ok(ServerOp::Publish { topic, msg }) => {
                let delivered = self.shared.link().registry.deliver(&topic, &msg);
                if delivered == 0 {
                    tracing::trace!(%topic, "No subscriber for inbound message");
                }
            }
            Ok(ServerOp::ServiceResponse {
                id: Some(id),
                values,
                result,
                ..
            }) => {
                let reply = if result {
                    Ok(values)
                } else {
                    Err(failure_message(&values))
                };
                if !self.shared.link().calls.resolve(&id, reply) {
                    tracing::debug!(%id, "Service response for a call nobody waits on");
                }
            }
            Ok(ServerOp::ServiceResponse { id: None, service, .. }) => {
                tracing::warn!(?service, "Service response without an id, ignoring");
            }
            Ok(ServerOp::Status { level, msg, .. }) => match level.as_deref() {
                Some("error") | Some("warning") => tracing::warn!(%msg, "rosbridge status"),
                _ => tracing::debug!(%msg, "rosbridge status"),
            },
            Ok(ServerOp::Unsupported) => {
                tracing::trace!("Ignoring unsupported rosbridge operation");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame from rosbridge");
            }
        }
    }

    fn on_failure(&mut self, error: TransportError) {
        tracing::error!(%error, "rosbridge connection error");
        self.teardown_link();
        self.shared.transition(ConnectionState::Error);
        self.schedule_retry();
    }

    fn on_closed(&mut self) {
        tracing::info!("Connection to rosbridge closed");
        self.teardown_link();
        self.shared.transition(ConnectionState::Disconnected);
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let attempt = self.attempt + 1;
        self.set_attempt(attempt);

        if self.policy.should_retry(attempt) {
            let delay = self.policy.next_delay(attempt);
            tracing::info!(
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            self.shared.set_retry_pending(true);
        } else {
            tracing::error!(
                max_attempts = self.policy.max_attempts(),
                "Max reconnection attempts reached"
            );
            self.shared.set_exhausted(true);
            self.shared.transition(ConnectionState::Error);
        }
    }

    fn fire_retry(&mut self) {
        self.cancel_retry();
        match self.shared.url() {
            Some(url) => self.open(url),
            None => tracing::warn!("Reconnect timer fired without a bus URL"),
        }
    }

    fn cancel_retry(&mut self) {
        self.retry = None;
        self.shared.set_retry_pending(false);
    }

    fn teardown_link(&mut self) {
        self.inbound = None;
        let mut slot = self.shared.link();
        // Dropping the outbound sender closes the socket
        slot.handle = None;
        let failed = slot.calls.clear();
        if failed > 0 {
            tracing::debug!(failed, "Pending service calls failed with the link");
        }
    }

    fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
        self.shared.set_attempt(attempt);
    }
}

async fn next_link_event(inbound: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>) -> Option<LinkEvent> {
    match inbound.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::messaging::BusConnection;
    use crate::infrastructure::testing::{ScriptedConnector, StateRecorder, Step};
    use crate::ports::outbound::MockTransportConnector;

    const URL: &str = "ws://robot.local:9090";

    fn gaps(connector: &ScriptedConnector) -> Vec<u64> {
        connector
            .attempts()
            .windows(2)
            .map(|pair| (pair[1].at - pair[0].at).as_millis() as u64)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        assert!(bus.current_handle().is_none());
        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);

        assert_eq!(
            recorder.states(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(bus.is_connected());
        assert!(bus.current_handle().is_some());
        assert_eq!(bus.url().as_deref(), Some(URL));
        assert_eq!(connector.attempts()[0].url, URL);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_connects_back_off_then_give_up() {
        let connector = ScriptedConnector::refusing();
        let bus = BusConnection::new(
            connector.clone(),
            ReconnectPolicy::new(Duration::from_millis(2_000), 5),
        );

        bus.connect(URL);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.attempt_count(), 6);
        assert_eq!(gaps(&connector), vec![2_000, 4_000, 8_000, 16_000, 32_000]);
        assert_eq!(bus.state(), ConnectionState::Error);
        assert!(bus.retries_exhausted());
        assert!(!bus.retry_pending());

        // Terminal: nothing else happens on its own
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempt_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_reported_to_observers() {
        let connector = ScriptedConnector::refusing();
        let bus = BusConnection::new(
            connector.clone(),
            ReconnectPolicy::new(Duration::from_millis(100), 1),
        );
        let mut recorder = StateRecorder::attach(&bus);
        let seen_exhausted = Arc::new(Mutex::new(Vec::new()));
        let _exhaustion = bus.on_status_change({
            let seen = Arc::clone(&seen_exhausted);
            let bus = bus.clone();
            move |state| {
                if state == ConnectionState::Error {
                    seen.lock().expect("lock").push(bus.retries_exhausted());
                }
            }
        });

        bus.connect(URL);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Only the last Error tells observers that retries ran out
        assert_eq!(*seen_exhausted.lock().expect("lock"), vec![false, false, true]);
        assert!(bus.retries_exhausted());
        assert_eq!(
            recorder.states(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Error,
            ]
        );
        assert!(recorder.wait_for(ConnectionState::Error).await);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_attempts() {
        let connector = ScriptedConnector::with_steps(
            [Step::Refuse("down".into()), Step::Refuse("down".into())],
            Step::Accept,
        );
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);
        assert_eq!(bus.reconnect_attempt(), 0);

        let server = connector.next_server().await;
        server.close();
        assert!(recorder.wait_for(ConnectionState::Disconnected).await);
        assert!(recorder.wait_for(ConnectionState::Connected).await);

        // First retry after the drop uses the base delay again
        assert_eq!(gaps(&connector), vec![2_000, 4_000, 2_000]);
        assert_eq!(bus.reconnect_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_ignored_while_connecting() {
        let connector = ScriptedConnector::with_steps([], Step::Hang);
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connecting).await);
        bus.connect("ws://elsewhere:9090");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(recorder.states(), vec![ConnectionState::Connecting]);
        assert_eq!(bus.url().as_deref(), Some(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let connector = ScriptedConnector::refusing();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Error).await);
        assert!(bus.retry_pending());

        bus.disconnect();
        assert!(recorder.wait_for(ConnectionState::Disconnected).await);
        assert!(!bus.retry_pending());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_the_link() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);
        let server = connector.next_server().await;

        bus.disconnect();
        assert!(recorder.wait_for(ConnectionState::Disconnected).await);

        assert!(server.is_closed());
        assert!(bus.current_handle().is_none());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_exhaustion_starts_over() {
        let connector = ScriptedConnector::with_steps(
            [Step::Refuse("down".into()), Step::Refuse("down".into())],
            Step::Accept,
        );
        let bus = BusConnection::new(
            connector.clone(),
            ReconnectPolicy::new(Duration::from_millis(100), 1),
        );

        bus.connect(URL);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bus.retries_exhausted());

        let mut recorder = StateRecorder::attach(&bus);
        bus.reconnect();
        assert!(recorder.wait_for(ConnectionState::Connected).await);
        assert!(!bus.retries_exhausted());
        assert_eq!(connector.attempt_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_never_reaches_the_connector() {
        let mut connector = MockTransportConnector::new();
        connector.expect_connect().never();
        let bus = BusConnection::new(
            Arc::new(connector),
            ReconnectPolicy::new(Duration::from_millis(100), 2),
        );
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect("http://robot.local:9090");
        assert!(recorder.wait_for(ConnectionState::Error).await);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(bus.state(), ConnectionState::Error);
        assert!(bus.retries_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn set_url_reconnects_a_live_connection() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);
        let first = connector.next_server().await;

        bus.set_url("ws://10.0.0.9:9090");
        assert!(recorder.wait_for(ConnectionState::Disconnected).await);
        assert!(recorder.wait_for(ConnectionState::Connected).await);

        assert!(first.is_closed());
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].url, "ws://10.0.0.9:9090");
    }

    #[tokio::test(start_paused = true)]
    async fn set_url_while_idle_only_stores_it() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());

        bus.set_url("ws://10.0.0.9:9090");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(bus.url().as_deref(), Some("ws://10.0.0.9:9090"));
        assert_eq!(connector.attempt_count(), 0);
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn link_failure_goes_through_error() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);
        connector.next_server().await.fail("reset by peer");

        assert!(recorder.wait_for(ConnectionState::Error).await);
        assert!(bus.retry_pending());
        assert!(recorder.wait_for(ConnectionState::Connected).await);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_observer_is_isolated() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = bus.on_status_change(|_| panic!("badge renderer crashed"));
        let calls_clone = Arc::clone(&calls);
        let _good = bus.on_status_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_observer_is_not_called() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let subscription = bus.on_status_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_do_not_affect_the_link() {
        let connector = ScriptedConnector::accepting();
        let bus = BusConnection::new(connector.clone(), ReconnectPolicy::default());
        let mut recorder = StateRecorder::attach(&bus);

        bus.connect(URL);
        assert!(recorder.wait_for(ConnectionState::Connected).await);
        let server = connector.next_server().await;

        assert!(server.send_raw("{ not json"));
        assert!(server.send_raw(r#"{"op":"status","level":"error","msg":"unknown topic"}"#));
        assert!(server.send_raw(r#"{"op":"service_response","id":"x"}"#));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(bus.is_connected());
        assert_eq!(recorder.states().len(), 2);
    }
}
