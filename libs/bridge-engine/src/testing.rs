//! In-memory collaborators for bridge tests.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use bridge_api::{
    ChannelPayload, ChannelRequest, ChannelResponse, DeliveryError, InboundRequest,
    PortError, RequestHandle, RequestPort, UpstreamClient, UpstreamError,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryPort
// ═══════════════════════════════════════════════════════════════

pub struct MemoryPort {
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundRequest>>,
    replies: mpsc::UnboundedSender<(RequestHandle, ChannelResponse)>,
    disconnected: Mutex<HashSet<u64>>,
    registered: Mutex<Vec<String>>,
}

/// Сторона теста: отправляет запросы и читает ответы.
/// Drop закрывает port.
pub struct PortDriver {
    requests: mpsc::UnboundedSender<InboundRequest>,
    replies: mpsc::UnboundedReceiver<(RequestHandle, ChannelResponse)>,
}

impl MemoryPort {
    pub fn new() -> (Arc<Self>, PortDriver) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (rep_tx, rep_rx) = mpsc::unbounded_channel();
        let port = Arc::new(Self {
            requests: tokio::sync::Mutex::new(req_rx),
            replies: rep_tx,
            disconnected: Mutex::new(HashSet::new()),
            registered: Mutex::new(Vec::new()),
        });
        (port, PortDriver { requests: req_tx, replies: rep_rx })
    }

    /// Потребитель запроса `id` "отключился": reply вернёт ошибку.
    pub fn disconnect(&self, id: u64) {
        self.disconnected.lock().unwrap().insert(id);
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }
}

impl RequestPort for MemoryPort {
    fn receive_next(&self) -> Pin<Box<dyn Future<Output = Result<InboundRequest, PortError>> + Send + '_>> {
        Box::pin(async move {
            self.requests.lock().await.recv().await.ok_or(PortError::Closed)
        })
    }

    fn reply(
        &self,
        handle: RequestHandle,
        response: ChannelResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + '_>> {
        Box::pin(async move {
            if self.disconnected.lock().unwrap().contains(&handle.id()) {
                return Err(DeliveryError::Closed);
            }
            self.replies.send((handle, response)).map_err(|_| DeliveryError::Closed)
        })
    }

    fn register(&self, channels: &[String]) -> Pin<Box<dyn Future<Output = Result<(), PortError>> + Send + '_>> {
        self.registered.lock().unwrap().extend_from_slice(channels);
        Box::pin(async { Ok(()) })
    }
}

impl PortDriver {
    pub fn send(&self, id: u64, request: ChannelRequest) {
        self.requests
            .send(InboundRequest { handle: RequestHandle::new(id), request })
            .unwrap();
    }

    pub async fn next_reply(&mut self) -> (RequestHandle, ChannelResponse) {
        self.replies.recv().await.unwrap()
    }
}

// ═══════════════════════════════════════════════════════════════
//  ScriptedUpstream
// ═══════════════════════════════════════════════════════════════

type Script = Box<dyn Fn(&ChannelRequest) -> Result<ChannelResponse, UpstreamError> + Send + Sync>;
type DelayFn = Box<dyn Fn(&ChannelRequest) -> Duration + Send + Sync>;

/// Upstream, отвечающий по скрипту. Записывает все полученные запросы.
pub struct ScriptedUpstream {
    script: Script,
    delay: Option<DelayFn>,
    calls: Mutex<Vec<ChannelRequest>>,
}

impl ScriptedUpstream {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ChannelRequest) -> Result<ChannelResponse, UpstreamError> + Send + Sync + 'static,
    {
        Self { script: Box::new(script), delay: None, calls: Mutex::new(Vec::new()) }
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&ChannelRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn calls(&self) -> Vec<ChannelRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl UpstreamClient for ScriptedUpstream {
    fn fetch(
        &self,
        request: &ChannelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChannelResponse, UpstreamError>> + Send + '_>> {
        self.calls.lock().unwrap().push(request.clone());
        let delay = self.delay.as_ref().map(|d| d(request));
        let result = (self.script)(request);
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

/// Каждый запрошенный канал возвращается с данными = его имя.
pub fn echo(request: &ChannelRequest) -> Result<ChannelResponse, UpstreamError> {
    Ok(ChannelResponse::new(
        request
            .channels
            .iter()
            .map(|c| ChannelPayload::new(c.clone(), request.start, request.duration, c.as_bytes().to_vec()))
            .collect(),
    ))
}
