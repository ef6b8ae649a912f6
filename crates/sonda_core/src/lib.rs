//! # Sonda Core
//!
//! Crate compartilhada que define as estruturas de dados, protocolo de
//! serialização binária (bincode) e configuração TOML do pipeline Sonda
//! de telemetria e streaming de logs.
//!
//! ## Módulos
//! - [`types`] – Structs transmitidas ao coletor (snapshot de métricas, linha de log)
//! - [`protocol`] – Encode/decode binário com magic byte e prefixo de tamanho
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod config;

// Re-exports convenientes
pub use types::{LogEntry, MetricSnapshot};
pub use protocol::{AgentMessage, decode_frame, encode_frame, read_frame, PROTOCOL_VERSION};
pub use config::AgentConfig;
