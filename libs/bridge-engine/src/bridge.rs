use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use bridge_api::{ChannelResponse, InboundRequest, RequestPort, UpstreamClient};

use crate::error::BridgeError;
use crate::name_map::NameMap;
use crate::translate::{translate_request, translate_response};

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

/// Модель обслуживания запросов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Один запрос за раз: receive → fetch → reply → receive.
    Sequential,
    /// Цикл только принимает запросы; каждый обслуживается своей задачей.
    #[default]
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Имя bridge для логов.
    pub name: String,
    pub dispatch: DispatchMode,
    /// Максимум одновременно обслуживаемых запросов (0 = без ограничения).
    /// Только для `Concurrent`.
    pub max_in_flight: usize,
    /// Раскрывать `*` и `...` во все каналы таблицы.
    pub wildcards: bool,
    /// Объявить виртуальные каналы port'у при старте.
    pub register_channels: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "VChans".into(),
            dispatch: DispatchMode::Concurrent,
            max_in_flight: 0,
            wildcards: true,
            register_channels: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Bridge
// ═══════════════════════════════════════════════════════════════

/// Всё, что нужно одному worker'у. Read-only, разделяется через Arc.
struct Shared {
    name: String,
    map: Arc<NameMap>,
    port: Arc<dyn RequestPort>,
    upstream: Arc<dyn UpstreamClient>,
    wildcards: bool,
}

/// Мост virtual ↔ real: принимает запросы от RequestPort, переводит
/// имена, выполняет запрос через UpstreamClient и отвечает.
pub struct Bridge {
    shared: Arc<Shared>,
    dispatch: DispatchMode,
    max_in_flight: usize,
    register_channels: bool,
}

impl Bridge {
    pub fn new(
        map: Arc<NameMap>,
        port: Arc<dyn RequestPort>,
        upstream: Arc<dyn UpstreamClient>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                map,
                port,
                upstream,
                wildcards: config.wildcards,
            }),
            dispatch: config.dispatch,
            max_in_flight: config.max_in_flight,
            register_channels: config.register_channels,
        }
    }

    pub fn name_map(&self) -> &NameMap {
        &self.shared.map
    }

    /// Обслуживать запросы до отмены `token` или фатальной ошибки.
    ///
    /// Ошибки отдельных запросов не прерывают цикл. Фатальны только
    /// потеря RequestPort и потеря соединения с upstream.
    pub async fn run(&self, token: CancellationToken) -> Result<(), BridgeError> {
        let name = &self.shared.name;

        if self.register_channels {
            let channels: Vec<String> = self.shared.map.virtual_names().map(String::from).collect();
            self.shared.port.register(&channels).await?;
            tracing::info!(bridge = %name, channels = channels.len(), "registered virtual channels");
        }

        tracing::info!(
            bridge = %name,
            dispatch = ?self.dispatch,
            max_in_flight = self.max_in_flight,
            "serving requests"
        );

        let result = match self.dispatch {
            DispatchMode::Sequential => self.run_sequential(&token).await,
            DispatchMode::Concurrent => self.run_concurrent(&token).await,
        };

        match &result {
            Ok(()) => tracing::info!(bridge = %name, "stopped"),
            Err(e) => tracing::error!(bridge = %name, error = %e, "stopped on fatal error"),
        }
        result
    }

    async fn run_sequential(&self, token: &CancellationToken) -> Result<(), BridgeError> {
        loop {
            let inbound = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = self.shared.port.receive_next() => next?,
            };
            serve_request(&self.shared, inbound).await?;
        }
    }

    async fn run_concurrent(&self, token: &CancellationToken) -> Result<(), BridgeError> {
        let limit = (self.max_in_flight > 0).then(|| Arc::new(Semaphore::new(self.max_in_flight)));
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<BridgeError>(1);
        let mut workers = JoinSet::new();

        let result = loop {
            while let Some(done) = workers.try_join_next() {
                reap(&self.shared.name, done);
            }

            let permit = match &limit {
                Some(sem) => tokio::select! {
                    biased;
                    _ = token.cancelled() => break Ok(()),
                    Some(e) = fatal_rx.recv() => break Err(e),
                    permit = sem.clone().acquire_owned() => match permit {
                        Ok(p) => Some(p),
                        Err(_) => break Ok(()),
                    },
                },
                None => None,
            };

            let inbound = tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(()),
                Some(e) = fatal_rx.recv() => break Err(e),
                next = self.shared.port.receive_next() => match next {
                    Ok(inbound) => inbound,
                    Err(e) => break Err(e.into()),
                },
            };

            let shared = self.shared.clone();
            let fatal_tx = fatal_tx.clone();
            workers.spawn(async move {
                let _permit = permit;
                if let Err(e) = serve_request(&shared, inbound).await {
                    // Канал ёмкостью 1: достаточно одной фатальной ошибки.
                    let _ = fatal_tx.try_send(e);
                }
            });
        };

        if !workers.is_empty() {
            tracing::info!(bridge = %self.shared.name, in_flight = workers.len(), "waiting for in-flight requests");
        }
        while let Some(done) = workers.join_next().await {
            reap(&self.shared.name, done);
        }
        result
    }
}

fn reap(name: &str, done: Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        tracing::error!(bridge = %name, error = %e, "request worker failed");
    }
}

/// Обслужить один запрос от начала до ответа.
///
/// Потребитель всегда получает ровно один ответ: пустой, если upstream
/// не ответил. `Err` только при потере соединения с upstream.
async fn serve_request(shared: &Shared, inbound: InboundRequest) -> Result<(), BridgeError> {
    let InboundRequest { handle, request } = inbound;
    let name = shared.name.as_str();

    let translation = translate_request(&shared.map, &request, shared.wildcards);
    for miss in &translation.unresolved {
        tracing::warn!(bridge = %name, request = %handle, channel = %miss.name, "unresolvable channel, skipping");
    }

    let mut fatal = None;
    let mut response = match translation.upstream {
        None => {
            tracing::debug!(bridge = %name, request = %handle, "no resolvable channels, upstream not queried");
            ChannelResponse::empty()
        }
        Some(upstream_request) => match shared.upstream.fetch(&upstream_request).await {
            Ok(fetched) => {
                let (translated, dropped) = translate_response(&shared.map, &upstream_request.channels, fetched);
                for miss in &dropped {
                    tracing::warn!(bridge = %name, request = %handle, channel = %miss.name, "unable to match upstream channel, dropping");
                }
                translated
            }
            Err(e) if e.is_fatal() => {
                fatal = Some(BridgeError::UpstreamClosed(e));
                ChannelResponse::empty()
            }
            Err(e) => {
                tracing::warn!(bridge = %name, request = %handle, kind = %e.kind(), error = %e, "upstream fetch failed");
                ChannelResponse::empty()
            }
        },
    };
    response.unresolved = translation.unresolved.into_iter().map(|u| u.name).collect();

    let payloads = response.len();
    match shared.port.reply(handle, response).await {
        Ok(()) => tracing::debug!(bridge = %name, request = %handle, payloads, "replied"),
        Err(e) => tracing::warn!(bridge = %name, request = %handle, error = %e, "delivery failed, response discarded"),
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
