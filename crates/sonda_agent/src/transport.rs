//! Conexão de saída com o coletor.
//!
//! O loop de captura fala apenas com a trait [`Transport`]; a implementação
//! TCP cuida de framing, buffer de dump e do próprio estado de vida.
//! Reconexão não é responsabilidade deste núcleo: erro de escrita marca o
//! transporte como morto e o loop encerra a sessão.

use sonda_core::config::CollectorConfig;
use sonda_core::protocol::{encode_frame, AgentMessage, ProtocolError};
use sonda_core::types::{LogEntry, MetricSnapshot};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Erros do transporte.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Falha ao conectar em {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Falha ao enviar frame: {0}")]
    Send(#[from] io::Error),

    #[error("Falha ao codificar frame: {0}")]
    Encode(#[from] ProtocolError),
}

/// Superfície que o loop de captura exige do canal de saída.
pub trait Transport {
    /// O canal ainda está vivo? Falso encerra a sessão cooperativamente.
    fn is_live(&self) -> bool;

    /// O canal aceita envios neste momento?
    fn can_accept_send(&self) -> bool;

    /// Retém uma linha para o próximo dump, em ordem de captura.
    fn enqueue_log_line(&mut self, entry: LogEntry);

    /// Envia um snapshot de métricas. Por convenção do coletor, vem sempre
    /// antes do dump de logs do mesmo ciclo.
    fn send_metric_snapshot(&mut self, snapshot: &MetricSnapshot) -> Result<(), TransportError>;

    /// Envia em lote as linhas retidas desde o último dump.
    fn send_buffered_log_dump(&mut self) -> Result<(), TransportError>;

    /// Avisa o coletor que nada mais chega nesta sessão (best-effort).
    fn send_end_of_session(&mut self) -> Result<(), TransportError>;
}

// ──────────────────────────────────────────────
// Implementação TCP
// ──────────────────────────────────────────────

/// Transporte TCP com framing binário do protocolo Sonda.
pub struct TcpTransport {
    stream: TcpStream,
    live: bool,
    pending: VecDeque<LogEntry>,
    pending_cap: usize,
}

impl TcpTransport {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Conecta ao coletor e abre a sessão com a credencial configurada.
    ///
    /// `pending_cap` limita as linhas retidas entre dumps; além disso as
    /// mais antigas são descartadas (entrega é best-effort, sem replay).
    pub fn connect(config: &CollectorConfig, pending_cap: usize) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", config.host, config.port);
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.clone(),
                source: e,
            })?
            .next()
            .ok_or_else(|| TransportError::Connect {
                addr: addr.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "endereço não resolvido"),
            })?;

        let stream = TcpStream::connect_timeout(&sock_addr, Self::CONNECT_TIMEOUT).map_err(|e| {
            TransportError::Connect {
                addr: addr.clone(),
                source: e,
            }
        })?;
        stream.set_nodelay(true).ok();

        let mut transport = Self {
            stream,
            live: true,
            pending: VecDeque::new(),
            pending_cap,
        };
        transport.send_frame(&AgentMessage::SessionStart {
            api_key: config.api_key.clone(),
            app_id: config.app_id.clone(),
        })?;

        info!("Sessão aberta com {addr} (app {})", config.app_id);
        Ok(transport)
    }

    fn send_frame(&mut self, message: &AgentMessage) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        if let Err(e) = self.stream.write_all(&frame) {
            self.live = false;
            warn!("Transporte morto após erro de escrita: {e}");
            return Err(TransportError::Send(e));
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn is_live(&self) -> bool {
        self.live
    }

    fn can_accept_send(&self) -> bool {
        self.live
    }

    fn enqueue_log_line(&mut self, entry: LogEntry) {
        if self.pending_cap > 0 && self.pending.len() >= self.pending_cap {
            self.pending.pop_front();
            debug!(
                "Buffer de dump cheio ({}), descartando linha mais antiga",
                self.pending_cap
            );
        }
        self.pending.push_back(entry);
    }

    fn send_metric_snapshot(&mut self, snapshot: &MetricSnapshot) -> Result<(), TransportError> {
        self.send_frame(&AgentMessage::Metrics(snapshot.clone()))
    }

    fn send_buffered_log_dump(&mut self) -> Result<(), TransportError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let entries: Vec<LogEntry> = self.pending.drain(..).collect();
        let count = entries.len();
        self.send_frame(&AgentMessage::LogDump { entries })?;
        debug!("Dump de {count} linhas enviado");
        Ok(())
    }

    fn send_end_of_session(&mut self) -> Result<(), TransportError> {
        self.send_frame(&AgentMessage::SessionEnd)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sonda_core::protocol::read_frame;
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn test_config(port: u16) -> CollectorConfig {
        CollectorConfig {
            host: "127.0.0.1".into(),
            port,
            api_key: "k-teste".into(),
            app_id: "app-teste".into(),
        }
    }

    /// Sobe um coletor fake que lê frames até SessionEnd (ou erro).
    fn spawn_collector() -> (u16, mpsc::Receiver<Vec<AgentMessage>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut messages = Vec::new();
            loop {
                match read_frame(&mut stream) {
                    Ok(AgentMessage::SessionEnd) => {
                        messages.push(AgentMessage::SessionEnd);
                        break;
                    }
                    Ok(msg) => messages.push(msg),
                    Err(_) => break,
                }
            }
            let _ = tx.send(messages);
        });

        (port, rx)
    }

    #[test]
    fn frames_arrive_in_send_order() {
        let (port, rx) = spawn_collector();
        let mut transport = TcpTransport::connect(&test_config(port), 100).unwrap();

        transport.enqueue_log_line(LogEntry { seq: 0, text: "a".into() });
        transport.enqueue_log_line(LogEntry { seq: 1, text: "b".into() });

        let snapshot = MetricSnapshot {
            cpu_usage_ratio: 0.25,
            ..Default::default()
        };
        transport.send_metric_snapshot(&snapshot).unwrap();
        transport.send_buffered_log_dump().unwrap();
        transport.send_end_of_session().unwrap();

        let messages = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(
            &messages[0],
            AgentMessage::SessionStart { api_key, app_id }
                if api_key == "k-teste" && app_id == "app-teste"
        ));
        assert_eq!(messages[1], AgentMessage::Metrics(snapshot));
        assert!(matches!(
            &messages[2],
            AgentMessage::LogDump { entries }
                if entries.len() == 2 && entries[0].seq == 0 && entries[1].seq == 1
        ));
        assert_eq!(messages[3], AgentMessage::SessionEnd);
    }

    #[test]
    fn dump_drains_buffer_and_skips_when_empty() {
        let (port, rx) = spawn_collector();
        let mut transport = TcpTransport::connect(&test_config(port), 100).unwrap();

        transport.enqueue_log_line(LogEntry { seq: 0, text: "única".into() });
        transport.send_buffered_log_dump().unwrap();
        // Segundo dump sem linhas novas não gera frame
        transport.send_buffered_log_dump().unwrap();
        transport.send_end_of_session().unwrap();

        let messages = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let dumps: Vec<_> = messages
            .iter()
            .filter(|m| matches!(m, AgentMessage::LogDump { .. }))
            .collect();
        assert_eq!(dumps.len(), 1);
    }

    #[test]
    fn pending_cap_drops_oldest_lines() {
        let (port, rx) = spawn_collector();
        let mut transport = TcpTransport::connect(&test_config(port), 2).unwrap();

        for seq in 0..4u64 {
            transport.enqueue_log_line(LogEntry { seq, text: format!("l{seq}") });
        }
        transport.send_buffered_log_dump().unwrap();
        transport.send_end_of_session().unwrap();

        let messages = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let AgentMessage::LogDump { entries } = &messages[1] else {
            panic!("esperava LogDump, veio {:?}", messages[1]);
        };
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn connect_refused_is_fatal() {
        // Porta recém-liberada: ninguém escutando
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = TcpTransport::connect(&test_config(port), 100);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn write_error_marks_transport_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport = TcpTransport::connect(&test_config(port), 100).unwrap();

        // Coletor derruba a conexão
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
        drop(listener);

        let snapshot = MetricSnapshot::default();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.send_metric_snapshot(&snapshot).is_ok() {
            assert!(
                std::time::Instant::now() < deadline,
                "escrita nunca falhou após o peer fechar"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!transport.is_live());
        assert!(!transport.can_accept_send());
    }
}
