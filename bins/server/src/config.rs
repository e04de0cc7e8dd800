use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use bridge_engine::{BridgeConfig, DispatchMode, NameMap};
use bridge_wire::{TcpPortConfig, TcpUpstreamConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(
    name = "vchans-server",
    version,
    about = "Мост виртуальных каналов поверх upstream источника",
    long_about = "Потребители запрашивают каналы по виртуальным именам; vchans-server \
                  переводит их в реальные, забирает данные у upstream и отдаёт \
                  payload'ы под виртуальными именами."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить bridge
    Serve(ServeArgs),
    /// Проверить конфигурацию и вывести таблицу каналов
    Check(ServeArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<String>,

    /// Адрес upstream источника (перекрывает `upstream` из конфига)
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Адрес для потребителей (перекрывает `listen` из конфига)
    #[arg(long)]
    pub listen: Option<String>,

    /// Обслуживать запросы строго по одному
    #[arg(long)]
    pub sequential: bool,

    /// Пары имён каналов: `real virtual [real virtual ...]`
    #[arg(value_name = "REAL VIRTUAL")]
    pub pairs: Vec<String>,
}

// ---- TOML Config ----

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPair {
    pub real: String,
    #[serde(rename = "virtual")]
    pub virtual_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Имя bridge в логах.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_upstream")]
    pub upstream: String,
    #[serde(default)]
    pub dispatch: DispatchMode,
    /// 0 = без ограничения.
    #[serde(default)]
    pub max_in_flight: usize,
    #[serde(default = "default_true")]
    pub wildcards: bool,
    #[serde(default = "default_true")]
    pub register_channels: bool,
    /// Дедлайн одного запроса к upstream (0 = без дедлайна).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Пауза перед переподключением к upstream (0 = завершиться).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Очередь ответов на одно соединение потребителя.
    #[serde(default = "default_conn_buffer")]
    pub conn_buffer: usize,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default)]
    pub channels: Vec<ChannelPair>,
}

fn default_name() -> String {
    "VChans".into()
}
fn default_listen() -> String {
    "0.0.0.0:3334".into()
}
fn default_upstream() -> String {
    "localhost:3333".into()
}
fn default_true() -> bool {
    true
}
fn default_fetch_timeout_ms() -> u64 {
    20_000
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_conn_buffer() -> usize {
    64
}
fn default_max_line_length() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen: default_listen(),
            upstream: default_upstream(),
            dispatch: DispatchMode::default(),
            max_in_flight: 0,
            wildcards: true,
            register_channels: true,
            fetch_timeout_ms: default_fetch_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            conn_buffer: default_conn_buffer(),
            max_line_length: default_max_line_length(),
            channels: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Конфиг из файла (если задан) + переопределения из командной строки.
    /// Пары из командной строки добавляются после пар из файла.
    pub fn resolve(args: &ServeArgs) -> Result<(Self, NameMap), ServerError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(address) = &args.address {
            config.upstream = address.clone();
        }
        if let Some(listen) = &args.listen {
            config.listen = listen.clone();
        }
        if args.sequential {
            config.dispatch = DispatchMode::Sequential;
        }

        let cli_pairs = NameMap::from_args(&args.pairs)?;
        let map = NameMap::from_pairs(
            config
                .channels
                .iter()
                .map(|p| (p.real.as_str(), p.virtual_name.as_str()))
                .chain(cli_pairs.iter()),
        )?;
        if map.is_empty() {
            return Err(ServerError::NoChannels);
        }
        Ok((config, map))
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            name: self.name.clone(),
            dispatch: self.dispatch,
            max_in_flight: self.max_in_flight,
            wildcards: self.wildcards,
            register_channels: self.register_channels,
        }
    }

    pub fn port_config(&self) -> TcpPortConfig {
        TcpPortConfig {
            listen: self.listen.clone(),
            conn_buffer: self.conn_buffer,
            max_line_length: self.max_line_length,
        }
    }

    pub fn upstream_config(&self) -> TcpUpstreamConfig {
        TcpUpstreamConfig {
            address: self.upstream.clone(),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            max_line_length: self.max_line_length,
        }
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_ms > 0).then(|| Duration::from_millis(self.reconnect_delay_ms))
    }
}
