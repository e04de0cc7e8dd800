pub mod error;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

pub use error::{DeliveryError, ErrorKind, PortError, UpstreamError};

// ════════════════════════════════════════════════════════════════
//  Channel Types
// ════════════════════════════════════════════════════════════════

/// Привязка временного окна запроса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
    /// `start`: абсолютная метка времени.
    #[default]
    Absolute,
    /// Окно отсчитывается от самых свежих данных.
    Newest,
    /// Окно отсчитывается от самых старых доступных данных.
    Oldest,
}

impl std::fmt::Display for ReferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceMode::Absolute => f.write_str("absolute"),
            ReferenceMode::Newest => f.write_str("newest"),
            ReferenceMode::Oldest => f.write_str("oldest"),
        }
    }
}

/// Тип элементов в payload. Bridge передаёт его как есть и никогда
/// не интерпретирует байты численно.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Float64,
    Float32,
    Int64,
    Int32,
    Int16,
    Int8,
    String,
    ByteArray,
    User,
    #[default]
    Unknown,
}

/// Запрос потребителя: набор каналов + временное окно.
///
/// Имена каналов принадлежат namespace'у держателя: виртуальные
/// на стороне потребителя, реальные на стороне upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRequest {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub reference: ReferenceMode,
}

impl ChannelRequest {
    pub fn new(channels: Vec<String>, start: f64, duration: f64, reference: ReferenceMode) -> Self {
        Self { channels, start, duration, reference }
    }

    /// Тот же запрос (окно и reference) с другим набором каналов.
    pub fn with_channels(&self, channels: Vec<String>) -> Self {
        Self {
            channels,
            start: self.start,
            duration: self.duration,
            reference: self.reference,
        }
    }
}

fn default_mime() -> String {
    "application/octet-stream".into()
}

/// Данные одного канала в ответе.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub name: String,
    pub start: f64,
    pub duration: f64,
    #[serde(default = "default_mime")]
    pub mime: String,
    #[serde(rename = "type", default)]
    pub type_tag: TypeTag,
    /// Сырые байты; на проводе: base64.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ChannelPayload {
    pub fn new(name: impl Into<String>, start: f64, duration: f64, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            start,
            duration,
            mime: default_mime(),
            type_tag: TypeTag::Unknown,
            data,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    pub fn with_type(mut self, type_tag: TypeTag) -> Self {
        self.type_tag = type_tag;
        self
    }
}

/// Ответ на один запрос. Каналы без данных просто отсутствуют.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelResponse {
    #[serde(default)]
    pub payloads: Vec<ChannelPayload>,
    /// Запрошенные каналы, которые bridge не смог разрешить.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl ChannelResponse {
    pub fn new(payloads: Vec<ChannelPayload>) -> Self {
        Self { payloads, unresolved: Vec::new() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.payloads.iter().map(|p| p.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ChannelPayload> {
        self.payloads.iter().find(|p| p.name == name)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

// ════════════════════════════════════════════════════════════════
//  Request Port
// ════════════════════════════════════════════════════════════════

/// Непрозрачный идентификатор входящего запроса. Выдаётся port'ом,
/// возвращается в `reply()` для корреляции ответа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Запрос, полученный port'ом, вместе с handle для ответа.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub handle: RequestHandle,
    pub request: ChannelRequest,
}

/// Сторона потребителей: выдаёт запросы и принимает ответы.
///
/// Реализации: TCP listener (bridge-wire), in-memory port в тестах.
pub trait RequestPort: Send + Sync {
    /// Дождаться следующего запроса. Ошибка = port потерян (фатально).
    fn receive_next(&self) -> Pin<Box<dyn Future<Output = Result<InboundRequest, PortError>> + Send + '_>>;

    /// Доставить ответ на запрос `handle`. Не должен блокироваться
    /// на закрытом потребителе: ошибка сразу.
    fn reply(
        &self,
        handle: RequestHandle,
        response: ChannelResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + '_>>;

    /// Объявить виртуальные каналы, которые обслуживает bridge.
    fn register(&self, _channels: &[String]) -> Pin<Box<dyn Future<Output = Result<(), PortError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

// ════════════════════════════════════════════════════════════════
//  Upstream Client
// ════════════════════════════════════════════════════════════════

/// Сторона upstream: выполняет запрос по реальным именам каналов.
///
/// Таймауты: свойство реализации, bridge их не добавляет.
pub trait UpstreamClient: Send + Sync {
    fn fetch(
        &self,
        request: &ChannelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChannelResponse, UpstreamError>> + Send + '_>>;
}
