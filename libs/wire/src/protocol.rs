use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use bridge_api::{ChannelRequest, ChannelResponse, UpstreamError};

use crate::error::WireError;

// ═══════════════════════════════════════════════════════════════
//  Messages
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Запрос данных по каналам.
    #[default]
    Fetch,
    /// Список каналов, объявленных bridge'ем.
    List,
}

/// Одна строка запроса: `{"id":1,"channels":["temp"],"start":0,"duration":1,"reference":"newest"}`.
///
/// `id` выбирает отправитель; ответ несёт тот же `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    #[serde(default)]
    pub action: Action,
    #[serde(flatten)]
    pub request: ChannelRequest,
}

impl WireRequest {
    pub fn fetch(id: u64, request: ChannelRequest) -> Self {
        Self { id, action: Action::Fetch, request }
    }
}

/// Одна строка ответа. Либо payloads (+ unresolved), либо `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    #[serde(flatten)]
    pub response: ChannelResponse,
}

impl WireResponse {
    pub fn ok(id: u64, response: ChannelResponse) -> Self {
        Self { id, error: None, channels: Vec::new(), response }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self { id, error: Some(message.into()), channels: Vec::new(), response: ChannelResponse::empty() }
    }

    pub fn channels(id: u64, channels: Vec<String>) -> Self {
        Self { id, error: None, channels, response: ChannelResponse::empty() }
    }

    /// Ответ upstream'а → результат fetch.
    pub fn into_result(self) -> Result<ChannelResponse, UpstreamError> {
        match self.error {
            Some(msg) => Err(UpstreamError::remote(msg)),
            None => Ok(self.response),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Line framing
// ═══════════════════════════════════════════════════════════════

/// Извлечь одну строку из буфера.
/// Возвращает (line, bytes_consumed) или None если строка неполная.
/// `max_length` = 0: без ограничения.
pub fn decode_line(buf: &[u8], max_length: usize) -> Result<Option<(Vec<u8>, usize)>, WireError> {
    let pos = match buf.iter().position(|&b| b == b'\n') {
        Some(p) => p,
        None => {
            // `\r` перед ещё не пришедшим `\n` в длину строки не входит.
            let pending = buf.strip_suffix(b"\r").unwrap_or(buf);
            if max_length > 0 && pending.len() > max_length {
                return Err(WireError::LineTooLong { len: pending.len(), max: max_length });
            }
            return Ok(None);
        }
    };

    let consumed = pos + 1;
    let line = &buf[..pos];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    if max_length > 0 && line.len() > max_length {
        return Err(WireError::LineTooLong { len: line.len(), max: max_length });
    }

    Ok(Some((line.to_vec(), consumed)))
}

/// Сериализовать сообщение в одну `\n`-terminated строку.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = serde_json::to_vec(msg)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Буферизованный читатель строк поверх async потока.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_length: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_length: usize) -> Self {
        Self { inner, buf: Vec::with_capacity(8192), max_length }
    }

    /// Следующая непустая строка. `None`: поток закрыт.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let mut tmp = [0u8; 4096];
        loop {
            while let Some((line, consumed)) = decode_line(&self.buf, self.max_length)? {
                self.buf.drain(..consumed);
                if !line.iter().all(u8::is_ascii_whitespace) {
                    return Ok(Some(line));
                }
            }

            let n = self.inner.read(&mut tmp).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}
