#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use bridge_api::{ChannelPayload, ChannelResponse};
use bridge_wire::{WireRequest, WireResponse};

/// Ответ фейкового upstream'а: задержка + строка ответа (None = молчать).
pub type Handler = Arc<dyn Fn(&WireRequest) -> (Duration, Option<WireResponse>) + Send + Sync>;

/// Возвращает каждый запрошенный канал с данными = имя канала.
pub fn echo_reply(req: &WireRequest) -> WireResponse {
    let payloads = req
        .request
        .channels
        .iter()
        .map(|c| ChannelPayload::new(c.clone(), req.request.start, req.request.duration, c.as_bytes().to_vec()))
        .collect();
    WireResponse::ok(req.id, ChannelResponse::new(payloads))
}

/// Фейковый upstream: принимает одно соединение и отвечает по handler'у.
pub async fn fake_upstream(handler: Handler) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WireResponse>();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let mut line = serde_json::to_vec(&msg).unwrap();
                line.push(b'\n');
                if write_half.write_all(&line).await.is_err() {
                    break;
                }
            }
        });
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let req: WireRequest = serde_json::from_str(&line).unwrap();
            let (delay, reply) = handler(&req);
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(reply) = reply {
                    let _ = tx.send(reply);
                }
            });
        }
    });
    (addr, task)
}

/// Потребитель: пишет JSON-строки и читает ответы.
pub struct Consumer {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Consumer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self { lines: BufReader::new(read_half).lines(), writer }
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Закрыть свою сторону записи (half-close), продолжая читать.
    pub async fn finish_writes(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    pub async fn recv(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("reply timed out")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }
}
