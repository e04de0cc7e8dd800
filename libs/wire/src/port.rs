use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bridge_api::{
    ChannelResponse, DeliveryError, InboundRequest, PortError, RequestHandle, RequestPort,
};

use crate::error::WireError;
use crate::protocol::{Action, LineReader, WireRequest, WireResponse, encode_line};

/// Параметры consumer-facing listener'а.
#[derive(Debug, Clone)]
pub struct TcpPortConfig {
    pub listen: String,
    /// Очередь ответов на одно соединение.
    pub conn_buffer: usize,
    /// Максимальная длина строки запроса (0 = без ограничения).
    pub max_line_length: usize,
}

/// Ожидающий ответа запрос: куда писать и под каким id потребителя.
struct Pending {
    consumer_id: u64,
    writer: mpsc::Sender<WireResponse>,
}

/// Состояние, разделяемое между port'ом и задачами соединений.
struct PortState {
    pending: Mutex<HashMap<u64, Pending>>,
    registered: RwLock<Vec<String>>,
    next_handle: AtomicU64,
    conn_buffer: usize,
    max_line_length: usize,
}

// ═══════════════════════════════════════════════════════════════
//  TcpRequestPort
// ═══════════════════════════════════════════════════════════════

/// RequestPort поверх TCP: JSON-запрос на строку, JSON-ответ на строку.
///
/// Каждое соединение может держать много запросов в полёте; ответы
/// коррелируются по `id` потребителя и могут приходить в любом порядке.
///
/// Отмена `token` останавливает приём новых запросов. Уже принятые
/// запросы остаются доставляемыми, пока соединение живо.
pub struct TcpRequestPort {
    local_addr: SocketAddr,
    inbound: tokio::sync::Mutex<mpsc::Receiver<InboundRequest>>,
    state: Arc<PortState>,
    token: CancellationToken,
    connections: TaskTracker,
    acceptor: JoinHandle<()>,
}

impl TcpRequestPort {
    pub async fn bind(config: &TcpPortConfig, token: CancellationToken) -> Result<Self, WireError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| WireError::Bind { addr: config.listen.clone(), source: e })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "request port listening");

        let state = Arc::new(PortState {
            pending: Mutex::new(HashMap::new()),
            registered: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            conn_buffer: config.conn_buffer.max(1),
            max_line_length: config.max_line_length,
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(config.conn_buffer.max(1));
        let connections = TaskTracker::new();
        let acceptor = tokio::spawn(accept_loop(
            listener,
            inbound_tx,
            state.clone(),
            connections.clone(),
            token.clone(),
        ));

        Ok(Self {
            local_addr,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            state,
            token,
            connections,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Число запросов, ожидающих ответа.
    pub fn pending(&self) -> usize {
        self.state.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Остановить приём и дождаться, пока соединения допишут ответы.
    ///
    /// Запросы, принятые, но так и не выданные через `receive_next`,
    /// получают пустой ответ. Вызывать после остановки bridge.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.acceptor.abort();

        let mut inbound = self.inbound.lock().await;
        inbound.close();
        let mut unserved = 0usize;
        while let Ok(req) = inbound.try_recv() {
            unserved += 1;
            let _ = self.reply(req.handle, ChannelResponse::empty()).await;
        }
        if unserved > 0 {
            tracing::warn!(unserved, "answered queued requests with empty responses");
        }

        self.connections.close();
        self.connections.wait().await;
        tracing::info!(addr = %self.local_addr, "request port drained");
    }
}

impl Drop for TcpRequestPort {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

impl RequestPort for TcpRequestPort {
    fn receive_next(&self) -> Pin<Box<dyn Future<Output = Result<InboundRequest, PortError>> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.inbound.lock().await;
            tokio::select! {
                next = rx.recv() => next.ok_or(PortError::Closed),
                _ = self.token.cancelled() => Err(PortError::Closed),
            }
        })
    }

    fn reply(
        &self,
        handle: RequestHandle,
        response: ChannelResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + '_>> {
        let pending = match self.state.pending.lock() {
            Ok(mut pending) => pending.remove(&handle.id()),
            Err(_) => None,
        };
        let result = match pending {
            None => Err(DeliveryError::UnknownHandle(handle.id())),
            Some(p) => p
                .writer
                .try_send(WireResponse::ok(p.consumer_id, response))
                .map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => DeliveryError::Backlog,
                    mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
                }),
        };
        Box::pin(async move { result })
    }

    fn register(&self, channels: &[String]) -> Pin<Box<dyn Future<Output = Result<(), PortError>> + Send + '_>> {
        let result = match self.state.registered.write() {
            Ok(mut registered) => {
                *registered = channels.to_vec();
                Ok(())
            }
            Err(_) => Err(PortError::Io("registration table poisoned".into())),
        };
        Box::pin(async move { result })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Connection handling
// ═══════════════════════════════════════════════════════════════

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::Sender<InboundRequest>,
    state: Arc<PortState>,
    connections: TaskTracker,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "consumer connected");
                    connections.spawn(handle_connection(stream, peer, inbound.clone(), state.clone(), token.clone()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
            _ = token.cancelled() => break,
        }
    }
    tracing::info!("request port closed");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    inbound: mpsc::Sender<InboundRequest>,
    state: Arc<PortState>,
    token: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<WireResponse>(state.conn_buffer);

    // Writer живёт, пока есть отправители: reader + ожидающие запросы.
    // Ошибка записи означает, что потребитель ушёл: rx закрывается, и
    // ответы на оставшиеся запросы получают DeliveryError::Closed.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let line = match encode_line(&msg) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(%peer, error = %e, "encode error");
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(&line).await {
                tracing::warn!(%peer, error = %e, "write error, dropping connection");
                break;
            }
        }
    });

    let mut reader = LineReader::new(read_half, state.max_line_length);
    loop {
        let line = tokio::select! {
            line = reader.next_line() => line,
            _ = token.cancelled() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            // Half-close: запросов больше не будет, но ответы ещё ждут.
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "read error");
                break;
            }
        };

        let msg: WireRequest = match serde_json::from_slice(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "bad request line, skipping");
                let _ = tx.try_send(WireResponse::error(0, format!("parse: {e}")));
                continue;
            }
        };

        match msg.action {
            Action::List => {
                let channels = state.registered.read().map(|r| r.clone()).unwrap_or_default();
                let _ = tx.try_send(WireResponse::channels(msg.id, channels));
            }
            Action::Fetch => {
                let handle = RequestHandle::new(state.next_handle.fetch_add(1, Ordering::Relaxed));
                if let Ok(mut pending) = state.pending.lock() {
                    pending.insert(handle.id(), Pending { consumer_id: msg.id, writer: tx.clone() });
                }
                tracing::debug!(%peer, request = %handle, consumer_id = msg.id, "request received");
                let queued = tokio::select! {
                    sent = inbound.send(InboundRequest { handle, request: msg.request }) => sent.is_ok(),
                    _ = token.cancelled() => false,
                };
                if !queued {
                    if let Ok(mut pending) = state.pending.lock() {
                        pending.remove(&handle.id());
                    }
                    let _ = tx.try_send(WireResponse::error(msg.id, "bridge is shutting down"));
                    break;
                }
            }
        }
    }

    drop(tx);
    let _ = writer.await;
    tracing::info!(%peer, "connection closed");
}
