//! Definição de tipos/structs transmitidos ao coletor.
//!
//! Serialização bincode mantém o frame de métricas em ~60 bytes, pequeno o
//! suficiente para conviver com o stream de logs na mesma conexão.

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Snapshot de métricas
// ──────────────────────────────────────────────

/// Snapshot derivado de telemetria enviado periodicamente ao coletor.
///
/// CPU e rede são taxas derivadas de contadores cumulativos do sistema;
/// memória é gauge absoluto lido diretamente.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricSnapshot {
    /// Memória em uso (KB)
    pub memory_used_kb: u64,
    /// Memória total (KB)
    pub memory_total_kb: u64,
    /// Uso de CPU no intervalo, sempre em [0, 1]
    pub cpu_usage_ratio: f32,
    /// Bytes enviados por segundo (todas as interfaces)
    pub sent_bytes_per_sec: f32,
    /// Bytes recebidos por segundo (todas as interfaces)
    pub recv_bytes_per_sec: f32,
    /// Momento do cálculo (epoch, ms)
    pub timestamp_ms: u64,
}

// ──────────────────────────────────────────────
// Linha de log
// ──────────────────────────────────────────────

/// Uma linha opaca do stream de log do dispositivo.
///
/// A ordem de captura é preservada ponta a ponta; `seq` é o número de
/// chegada dentro da sessão e nunca retrocede.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Ordem de chegada dentro da sessão (0, 1, 2…)
    pub seq: u64,
    /// Texto já formatado, sem interpretação
    pub text: String,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
