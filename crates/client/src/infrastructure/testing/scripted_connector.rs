//! Scripted implementation of TransportConnector for testing
//!
//! Each connection attempt consumes the next [`Step`] of the script (or the
//! fallback once the script is empty). Accepted attempts hand the test a
//! [`ServerEnd`] that plays the rosbridge side of the link.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use robodeck_protocol::ClientOp;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::ports::outbound::{LinkEvent, TransportConnector, TransportError, TransportLink};

/// What one connection attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Open the link
    Accept,
    /// Fail with a connect error
    Refuse(String),
    /// Never resolve
    Hang,
}

/// A recorded connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub url: String,
    pub at: Instant,
}

struct Script {
    steps: VecDeque<Step>,
    fallback: Step,
    attempts: Vec<Attempt>,
}

pub struct ScriptedConnector {
    script: Mutex<Script>,
    servers_tx: mpsc::UnboundedSender<ServerEnd>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

impl ScriptedConnector {
    pub fn with_steps(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(Script {
                steps: steps.into_iter().collect(),
                fallback,
                attempts: Vec::new(),
            }),
            servers_tx,
            servers_rx: tokio::sync::Mutex::new(servers_rx),
        })
    }

    /// Every attempt succeeds.
    pub fn accepting() -> Arc<Self> {
        Self::with_steps([], Step::Accept)
    }

    /// Every attempt fails.
    pub fn refusing() -> Arc<Self> {
        Self::with_steps([], Step::Refuse("connection refused".into()))
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.script().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.script().attempts.len()
    }

    /// Server side of the next accepted link.
    pub async fn next_server(&self) -> ServerEnd {
        self.servers_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector outlives its sender")
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let step = {
            let mut script = self.script();
            script.attempts.push(Attempt {
                url: url.to_string(),
                at: Instant::now(),
            });
            let fallback = script.fallback.clone();
            script.steps.pop_front().unwrap_or(fallback)
        };

        match step {
            Step::Accept => {
                let (outbound, frames) = mpsc::unbounded_channel();
                let (events, inbound) = mpsc::unbounded_channel();
                let _ = self.servers_tx.send(ServerEnd { frames, events });
                Ok(TransportLink { outbound, inbound })
            }
            Step::Refuse(reason) => Err(TransportError::Connect(reason)),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// The rosbridge side of one scripted link.
pub struct ServerEnd {
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl ServerEnd {
    /// Next operation sent by the client; `None` once the client closed the link.
    pub async fn next_op(&mut self) -> Option<ClientOp> {
        let frame = self.frames.recv().await?;
        Some(serde_json::from_str(&frame).expect("client sent a valid operation"))
    }

    pub fn try_next_op(&mut self) -> Option<ClientOp> {
        let frame = self.frames.try_recv().ok()?;
        Some(serde_json::from_str(&frame).expect("client sent a valid operation"))
    }

    /// Every operation received so far.
    pub fn drain_ops(&mut self) -> Vec<ClientOp> {
        std::iter::from_fn(|| self.try_next_op()).collect()
    }

    /// Publish `msg` on `topic` towards the client.
    pub fn publish(&self, topic: &str, msg: Value) -> bool {
        self.send_raw(json!({ "op": "publish", "topic": topic, "msg": msg }).to_string())
    }

    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.events.send(LinkEvent::Frame(frame.into())).is_ok()
    }

    /// Close the link from the server side.
    pub fn close(&self) {
        let _ = self.events.send(LinkEvent::Closed);
    }

    /// Fail the link with a socket error.
    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(LinkEvent::Failed(TransportError::Socket(reason.to_string())));
    }

    /// Whether the client dropped its end of the link.
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}
