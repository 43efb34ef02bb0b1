//! # Loopback Transport
//!
//! In-process implementation of the transport port. Instead of sockets it
//! hands out [`RemoteClient`] handles that play the part of a connected UI:
//! they receive every outbound envelope and can send envelopes in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hb_02_dispatcher::{InboundHandler, Transport};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use shared_types::{
    topics, CallId, Envelope, EnvelopeKind, InvocationError, InvocationResult, MethodDescriptor,
    TransportError,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::AppConfig;

/// Transport that keeps everything inside the process.
pub struct LoopbackTransport {
    address: String,
    running: AtomicBool,
    stopped: AtomicBool,
    handler: RwLock<Option<InboundHandler>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
    methods: RwLock<Vec<MethodDescriptor>>,
}

impl LoopbackTransport {
    pub fn new(config: &AppConfig) -> Arc<Self> {
        Arc::new(Self {
            address: format!("{}:{}", config.bind_address, config.port),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            handler: RwLock::new(None),
            clients: Mutex::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
        })
    }

    /// Attach a new remote client.
    pub fn connect(self: &Arc<Self>) -> RemoteClient {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().push(tx);
        debug!(address = %self.address, "Loopback client connected");
        RemoteClient {
            transport: Arc::clone(self),
            outbound: rx,
        }
    }

    /// Method surface received on start.
    #[must_use]
    pub fn methods(&self) -> Vec<MethodDescriptor> {
        self.methods.read().clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn deliver_inbound(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::Closed);
        }
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                handler(envelope);
                Ok(())
            }
            None => Err(TransportError::Send("no inbound handler installed".into())),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn start(&self, methods: Vec<MethodDescriptor>) -> Result<(), TransportError> {
        info!(methods = methods.len(), address = %self.address, "Loopback transport started");
        *self.methods.write() = methods;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Clients attached before `start()` already receive envelopes; only a
    /// stopped transport refuses them.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut clients = self.clients.lock();
        clients.retain(|client| client.send(envelope.clone()).is_ok());
        if clients.is_empty() {
            debug!(kind = ?envelope.kind, "No loopback clients connected");
        }
        Ok(())
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if self.running.swap(false, Ordering::AcqRel) {
            self.clients.lock().clear();
            info!("Loopback transport stopped");
        }
    }

    fn url(&self) -> String {
        format!("loopback://{}", self.address)
    }
}

/// A connected remote client.
pub struct RemoteClient {
    transport: Arc<LoopbackTransport>,
    outbound: mpsc::UnboundedReceiver<Envelope>,
}

impl RemoteClient {
    /// Send an envelope to the backend.
    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.transport.deliver_inbound(envelope)
    }

    /// Next envelope from the backend. `None` once the transport stopped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.outbound.recv().await
    }

    /// Next envelope, waiting at most `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Emit an event as the remote UI.
    pub fn emit(&self, name: &str, data: Value) -> Result<(), TransportError> {
        self.send(Envelope::new(
            EnvelopeKind::Event,
            topics::EVENT_IN,
            json!({ "name": name, "data": data }),
        ))
    }

    /// Log a line as the remote UI.
    pub fn log(&self, level: &str, message: &str) -> Result<(), TransportError> {
        self.send(Envelope::new(
            EnvelopeKind::Log,
            format!("{}{}", topics::LOG_PREFIX, level),
            json!(message),
        ))
    }

    /// Invoke a bound method and wait for its `callResult`. Other envelopes
    /// received meanwhile are discarded.
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Result<Value, InvocationError>, TransportError> {
        let call_id = CallId::generate();
        self.send(Envelope::new(
            EnvelopeKind::Call,
            topics::CALL_REQUEST,
            json!({ "callId": call_id, "method": method, "args": args }),
        ))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let envelope = tokio::time::timeout_at(deadline, self.outbound.recv())
                .await
                .map_err(|_| TransportError::Timeout {
                    call_id: call_id.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })?
                .ok_or(TransportError::Closed)?;
            if envelope.kind != EnvelopeKind::CallResult {
                continue;
            }
            let result: InvocationResult = serde_json::from_value(envelope.payload)
                .map_err(|e| TransportError::Send(format!("bad callResult: {e}")))?;
            if result.call_id == call_id {
                return Ok(result.result);
            }
        }
    }
}
