use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bridge_api::{ChannelRequest, ChannelResponse, UpstreamClient, UpstreamError};

use crate::error::WireError;
use crate::protocol::{LineReader, WireRequest, WireResponse, encode_line};

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<WireResponse>>>>;

#[derive(Debug, Clone)]
pub struct TcpUpstreamConfig {
    pub address: String,
    /// Дедлайн одного fetch (zero = ждать бесконечно).
    pub fetch_timeout: Duration,
    pub max_line_length: usize,
}

// ═══════════════════════════════════════════════════════════════
//  TcpUpstreamClient
// ═══════════════════════════════════════════════════════════════

/// UpstreamClient поверх одного TCP соединения.
///
/// Запросы мультиплексируются по `id`: reader task раздаёт ответы
/// ожидающим вызовам, поэтому параллельные fetch не блокируют друг друга.
/// Потеря соединения переводит клиента в состояние `Closed` навсегда.
pub struct TcpUpstreamClient {
    address: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    waiters: Waiters,
    next_id: AtomicU64,
    fetch_timeout: Duration,
    closed: CancellationToken,
    reader: JoinHandle<()>,
}

impl TcpUpstreamClient {
    pub async fn connect(config: &TcpUpstreamConfig) -> Result<Self, WireError> {
        let stream = TcpStream::connect(&config.address)
            .await
            .map_err(|e| WireError::Connect { addr: config.address.clone(), source: e })?;
        let _ = stream.set_nodelay(true);
        tracing::info!(addr = %config.address, "upstream connected");

        let (read_half, write_half) = stream.into_split();
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_replies(
            config.address.clone(),
            LineReader::new(read_half, config.max_line_length),
            waiters.clone(),
            closed.clone(),
        ));

        Ok(Self {
            address: config.address.clone(),
            writer: tokio::sync::Mutex::new(write_half),
            waiters,
            next_id: AtomicU64::new(1),
            fetch_timeout: config.fetch_timeout,
            closed,
            reader,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn timed_out(&self) -> UpstreamError {
        UpstreamError::timeout(format!("no reply from {} within {:?}", self.address, self.fetch_timeout))
    }

    fn forget(&self, id: u64) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&id);
        }
    }
}

impl Drop for TcpUpstreamClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl UpstreamClient for TcpUpstreamClient {
    fn fetch(
        &self,
        request: &ChannelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChannelResponse, UpstreamError>> + Send + '_>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode_line(&WireRequest::fetch(id, request.clone()));

        Box::pin(async move {
            if self.is_closed() {
                return Err(UpstreamError::closed(format!("upstream {} disconnected", self.address)));
            }
            let line = line?;

            let (tx, rx) = oneshot::channel();
            if let Ok(mut waiters) = self.waiters.lock() {
                waiters.insert(id, tx);
            }
            // Reader мог завершиться между проверкой и вставкой.
            if self.is_closed() {
                self.forget(id);
                return Err(UpstreamError::closed(format!("upstream {} disconnected", self.address)));
            }

            // Один дедлайн на весь fetch: ожидание writer'а, запись и ответ.
            let deadline = (!self.fetch_timeout.is_zero()).then(|| Instant::now() + self.fetch_timeout);

            let mut writing = false;
            let written = within(deadline, async {
                let mut writer = self.writer.lock().await;
                if self.is_closed() {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection abandoned"));
                }
                writing = true;
                writer.write_all(&line).await
            })
            .await;
            match written {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    self.forget(id);
                    self.closed.cancel();
                    return Err(UpstreamError::closed(format!("write to {}: {e}", self.address)));
                }
                None => {
                    self.forget(id);
                    if writing {
                        // Недописанная строка ломает поток.
                        self.closed.cancel();
                        tracing::warn!(addr = %self.address, "write stalled past deadline, connection abandoned");
                    }
                    return Err(self.timed_out());
                }
            }

            let reply = match within(deadline, rx).await {
                Some(reply) => reply,
                None => {
                    self.forget(id);
                    return Err(self.timed_out());
                }
            };

            match reply {
                Ok(reply) => reply.into_result(),
                Err(_) => Err(UpstreamError::closed(format!("upstream {} disconnected", self.address))),
            }
        })
    }
}

/// Выполнить `fut` до `deadline` (`None`: без дедлайна).
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Читает ответы upstream'а и раздаёт их ожидающим fetch.
async fn read_replies(
    address: String,
    mut reader: LineReader<OwnedReadHalf>,
    waiters: Waiters,
    closed: CancellationToken,
) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::warn!(addr = %address, "upstream closed connection");
                break;
            }
            Err(e) => {
                tracing::error!(addr = %address, error = %e, "upstream read error");
                break;
            }
        };

        let reply: WireResponse = match serde_json::from_slice(&line) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(addr = %address, error = %e, "malformed upstream reply, skipping");
                continue;
            }
        };

        let waiter = waiters.lock().ok().and_then(|mut w| w.remove(&reply.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!(addr = %address, id = reply.id, "reply for abandoned request"),
        }
    }

    closed.cancel();
    // Drop отправителей будит всех ожидающих с ошибкой Closed.
    if let Ok(mut waiters) = waiters.lock() {
        waiters.clear();
    }
}
