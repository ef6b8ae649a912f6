//! Protocolo de comunicação binário agente → coletor.
//!
//! Formato do frame:
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬──────────────┐
//! │ Magic(1) │ Ver.(1) │ Len(4BE) │ Payload (N)  │
//! └──────────┴─────────┴──────────┴──────────────┘
//! ```
//!
//! - Magic byte `0x53` ('S') identifica frame Sonda
//! - Versão do protocolo (1 byte)
//! - Tamanho do payload em big-endian (TCP é stream de bytes, o frame
//!   precisa se auto-delimitar)
//! - Payload serializado com bincode
//!
//! Métricas e dump de logs compartilham a mesma conexão; a convenção de
//! ordem (métricas antes do dump) é responsabilidade de quem envia.

use crate::types::{LogEntry, MetricSnapshot};
use serde::{Deserialize, Serialize};

/// Magic byte que identifica frames do protocolo Sonda.
pub const MAGIC_BYTE: u8 = 0x53; // 'S'

/// Versão atual do protocolo.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + version + length).
const HEADER_SIZE: usize = 6;

/// Tamanho máximo de payload aceito (proteção contra frame corrompido).
pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Payload de {0} bytes excede o máximo de {MAX_PAYLOAD}")]
    Oversized(usize),

    #[error("Frame truncado: header anuncia {expected} bytes, restam {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Mensagens que o agente envia ao coletor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AgentMessage {
    /// Abre a sessão: credencial e identificador da aplicação monitorada.
    SessionStart { api_key: String, app_id: String },
    /// Snapshot periódico de métricas.
    Metrics(MetricSnapshot),
    /// Replay em lote das linhas retidas desde o último dump, em ordem de captura.
    LogDump { entries: Vec<LogEntry> },
    /// Nada mais será enviado nesta sessão.
    SessionEnd,
}

/// Codifica um [`AgentMessage`] para transmissão.
///
/// Retorna bytes no formato `[MAGIC][VERSION][LEN_BE][bincode_payload...]`.
pub fn encode_frame(message: &AgentMessage) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(message).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    if body.len() > MAX_PAYLOAD {
        return Err(ProtocolError::Oversized(body.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(MAGIC_BYTE);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Decodifica um frame completo em [`AgentMessage`].
///
/// Valida magic byte, versão e tamanho anunciado antes de deserializar.
pub fn decode_frame(data: &[u8]) -> Result<AgentMessage, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    let declared = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize;
    if declared > MAX_PAYLOAD {
        return Err(ProtocolError::Oversized(declared));
    }

    let body = &data[HEADER_SIZE..];
    if body.len() < declared {
        return Err(ProtocolError::Truncated {
            expected: declared,
            actual: body.len(),
        });
    }

    bincode::deserialize(&body[..declared]).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

/// Lê um frame completo de um stream (lado coletor e testes).
pub fn read_frame<R: std::io::Read>(reader: &mut R) -> Result<AgentMessage, ProtocolError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    if header[0] != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(header[0]));
    }
    if header[1] != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(header[1]));
    }

    let declared = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if declared > MAX_PAYLOAD {
        return Err(ProtocolError::Oversized(declared));
    }

    let mut body = vec![0u8; declared];
    reader.read_exact(&mut body)?;
    bincode::deserialize(&body).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics() -> AgentMessage {
        AgentMessage::Metrics(MetricSnapshot {
            memory_used_kb: 1_843_200,
            memory_total_kb: 3_932_160,
            cpu_usage_ratio: 0.30,
            sent_bytes_per_sec: 100_000.0,
            recv_bytes_per_sec: 52_311.4,
            timestamp_ms: 1_700_000_000_000,
        })
    }

    fn sample_dump() -> AgentMessage {
        AgentMessage::LogDump {
            entries: vec![
                LogEntry { seq: 0, text: "linha 0".into() },
                LogEntry { seq: 1, text: "linha 1".into() },
            ],
        }
    }

    #[test]
    fn encode_decode_roundtrip_all_variants() {
        let messages = [
            AgentMessage::SessionStart {
                api_key: "k-123".into(),
                app_id: "com.example.app".into(),
            },
            sample_metrics(),
            sample_dump(),
            AgentMessage::SessionEnd,
        ];

        for original in messages {
            let encoded = encode_frame(&original).unwrap();
            let decoded = decode_frame(&encoded).unwrap();
            assert_eq!(original, decoded);
        }
    }

    #[test]
    fn header_is_correct() {
        let encoded = encode_frame(&AgentMessage::SessionEnd).unwrap();
        assert_eq!(encoded[0], MAGIC_BYTE);
        assert_eq!(encoded[1], PROTOCOL_VERSION);
        let declared = u32::from_be_bytes([encoded[2], encoded[3], encoded[4], encoded[5]]);
        assert_eq!(declared as usize, encoded.len() - 6);
    }

    #[test]
    fn rejects_invalid_magic() {
        let mut encoded = encode_frame(&sample_metrics()).unwrap();
        encoded[0] = 0xFF;
        assert!(matches!(
            decode_frame(&encoded),
            Err(ProtocolError::InvalidMagic(0xFF))
        ));
    }

    #[test]
    fn rejects_short_frame() {
        assert!(matches!(
            decode_frame(&[MAGIC_BYTE]),
            Err(ProtocolError::TooShort(1))
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut encoded = encode_frame(&sample_metrics()).unwrap();
        encoded[1] = 99;
        assert!(matches!(
            decode_frame(&encoded),
            Err(ProtocolError::VersionMismatch(99))
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        let encoded = encode_frame(&sample_dump()).unwrap();
        let cut = &encoded[..encoded.len() - 3];
        assert!(matches!(
            decode_frame(cut),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn read_frame_from_stream_in_sequence() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(&sample_metrics()).unwrap());
        wire.extend_from_slice(&encode_frame(&sample_dump()).unwrap());
        wire.extend_from_slice(&encode_frame(&AgentMessage::SessionEnd).unwrap());

        let mut cursor = std::io::Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), sample_metrics());
        assert_eq!(read_frame(&mut cursor).unwrap(), sample_dump());
        assert_eq!(read_frame(&mut cursor).unwrap(), AgentMessage::SessionEnd);
    }

    #[test]
    fn metrics_frame_is_compact() {
        let encoded = encode_frame(&sample_metrics()).unwrap();
        println!("Metrics frame size: {} bytes", encoded.len());
        assert!(encoded.len() < 100, "Frame de métricas deveria ser < 100 bytes");
    }
}
