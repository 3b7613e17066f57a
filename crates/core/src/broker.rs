//! Correlated message passing between the page and the worker.
//!
//! The two sides share no memory. A call carries its own single-use reply
//! port, so concurrent calls can never receive each other's replies. There is
//! no ordering between distinct calls; callers that need call N to be visible
//! before call N+1 must await N first.
//!
//! The worker never has to answer in time, so `WorkerHandle::call` requires a
//! timeout on every call.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::protocol::{WorkerBroadcast, WorkerReply, WorkerRequest};

const BROADCAST_CAPACITY: usize = 64;

/// Protocol-level failures surfaced to the page.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("worker is not running")]
    Disconnected,

    #[error("worker dropped the reply channel for {0}")]
    NoReply(&'static str),

    #[error("unexpected reply {got} to {request}")]
    UnexpectedReply { request: &'static str, got: &'static str },

    #[error("{request} failed: {reason}")]
    Rejected { request: &'static str, reason: String },

    #[error("{0} does not take a reply channel")]
    NotACall(&'static str),
}

/// Single-use reply channel attached to one request.
#[derive(Debug)]
pub struct ReplyPort {
    tx: oneshot::Sender<WorkerReply>,
}

impl ReplyPort {
    /// Reply and consume the port. Returns false if the caller already gave up.
    pub fn send(self, reply: WorkerReply) -> bool {
        self.tx.send(reply).is_ok()
    }
}

/// A request as delivered to the worker's listener.
#[derive(Debug)]
pub struct Envelope {
    pub message: WorkerRequest,
    pub reply: Option<ReplyPort>,
}

/// Page-side handle to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Envelope>,
    events: broadcast::Sender<WorkerBroadcast>,
}

/// Worker-side end of the channel.
#[derive(Debug)]
pub struct WorkerInbox {
    rx: mpsc::Receiver<Envelope>,
    events: broadcast::Sender<WorkerBroadcast>,
}

/// Sends one-way broadcasts to every subscribed page.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    events: broadcast::Sender<WorkerBroadcast>,
}

/// Create a connected page/worker pair with room for `capacity` queued requests.
pub fn channel(capacity: usize) -> (WorkerHandle, WorkerInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
    (WorkerHandle { tx, events: events.clone() }, WorkerInbox { rx, events })
}

impl WorkerHandle {
    /// Send a request and wait for its reply, for at most `timeout`.
    ///
    /// # Errors
    ///
    /// - `NotACall` if the request type has no reply
    /// - `Disconnected` if the worker stopped listening
    /// - `NoReply` if the worker dropped the reply port
    /// - `Timeout` if nothing arrived in time
    /// - `UnexpectedReply` if the reply type does not pair with the request
    pub async fn call(&self, message: WorkerRequest, timeout: Duration) -> Result<WorkerReply, BrokerError> {
        let request = message.type_name();
        if !message.expects_reply() {
            return Err(BrokerError::NotACall(request));
        }

        let (tx, rx) = oneshot::channel();
        let envelope = Envelope { message: message.clone(), reply: Some(ReplyPort { tx }) };

        let exchange = async {
            self.tx.send(envelope).await.map_err(|_| BrokerError::Disconnected)?;
            rx.await.map_err(|_| BrokerError::NoReply(request))
        };

        let reply = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| BrokerError::Timeout(timeout))??;

        if !reply.answers(&message) {
            return Err(BrokerError::UnexpectedReply { request, got: reply.type_name() });
        }
        Ok(reply)
    }

    /// Send a request without a reply channel.
    pub async fn post(&self, message: WorkerRequest) -> Result<(), BrokerError> {
        self.tx
            .send(Envelope { message, reply: None })
            .await
            .map_err(|_| BrokerError::Disconnected)
    }

    /// Listen for worker broadcasts sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerBroadcast> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl WorkerInbox {
    /// Next request, or None once every page handle is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster { events: self.events.clone() }
    }
}

impl Broadcaster {
    /// Detached broadcaster with no page attached, for a worker run without a broker.
    pub fn detached() -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { events }
    }

    /// Returns how many pages received it.
    pub fn send(&self, event: WorkerBroadcast) -> usize {
        match self.events.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(?event, "broadcast dropped: no listening page");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerBroadcast> {
        self.events.subscribe()
    }
}
