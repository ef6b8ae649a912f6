//! Loop de captura e despacho – a única unidade de trabalho em background.
//!
//! Uma sessão é uma thread dedicada que intercala, na mesma sequência
//! lógica, o tail do log e o envio periódico de métricas. É um poll loop
//! cooperativo: a fonte de log nunca é lida de forma bloqueante e o loop
//! dorme um intervalo curto quando não há linha pronta. O dono e a thread
//! só compartilham as duas flags atômicas de [`RunState`]; todo o resto é
//! propriedade exclusiva da sessão.

use crate::log_source::{LogSource, PipeLogSource};
use crate::sampler::CounterSampler;
use crate::transport::{TcpTransport, Transport};
use sonda_core::config::AgentConfig;
use sonda_core::types::{LogEntry, MetricSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

// ──────────────────────────────────────────────
// Máquina de fases
// ──────────────────────────────────────────────

/// Fase da sessão, derivada dos dois sinais de parada independentes
/// (dono e transporte). Qualquer um dos dois derruba a sessão; nenhum
/// sinal a ressuscita.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Running,
    Stopping,
    Stopped,
}

impl SessionPhase {
    /// Transição avaliada uma vez por iteração do loop.
    pub fn advance(self, host_active: bool, transport_live: bool) -> Self {
        match self {
            SessionPhase::Running if host_active && transport_live => SessionPhase::Running,
            SessionPhase::Running => SessionPhase::Stopping,
            other => other,
        }
    }
}

// ──────────────────────────────────────────────
// Estado compartilhado com o dono
// ──────────────────────────────────────────────

/// Flags que cruzam a fronteira de thread. Nada além delas é compartilhado.
#[derive(Debug)]
pub struct RunState {
    /// O processo monitorado ainda roda? Vira `false` exatamente uma vez.
    host_active: AtomicBool,
    /// `true` da partida até o teardown completar. O dono faz polling.
    thread_running: AtomicBool,
}

impl RunState {
    fn new() -> Self {
        Self {
            host_active: AtomicBool::new(true),
            thread_running: AtomicBool::new(true),
        }
    }
}

// ──────────────────────────────────────────────
// Sessão
// ──────────────────────────────────────────────

/// Handle do dono para uma sessão de captura.
pub struct CaptureSession {
    state: Arc<RunState>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Inicia a sessão em uma thread dedicada.
    ///
    /// Falha ao conectar o transporte (ou abrir a fonte de log) é fatal
    /// para esta sessão: a thread sai sem trabalhar e
    /// [`is_thread_running`](Self::is_thread_running) vai direto a `false`.
    pub fn spawn(config: AgentConfig) -> Self {
        let state = Arc::new(RunState::new());
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("capture-dispatch".into())
            .spawn(move || {
                run_session(&config, &thread_state);
                thread_state.thread_running.store(false, Ordering::Release);
            })
            .expect("Falha ao criar thread da sessão");

        Self {
            state,
            handle: Some(handle),
        }
    }

    /// Pedido idempotente de parada: o loop encerra na próxima fronteira
    /// de iteração. Não bloqueia nem garante parada imediata.
    pub fn mark_host_terminated(&self) {
        self.state.host_active.store(false, Ordering::Release);
    }

    /// `true` da partida bem-sucedida até o teardown completar. O dono
    /// acompanha por polling; o término não é síncrono.
    pub fn is_thread_running(&self) -> bool {
        self.state.thread_running.load(Ordering::Acquire)
    }

    /// Bloqueia até a thread da sessão terminar.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_session(config: &AgentConfig, state: &RunState) {
    let transport = match TcpTransport::connect(&config.collector, config.telemetry.retained_log_cap)
    {
        Ok(t) => t,
        Err(e) => {
            error!("Fatal na partida: {e}");
            return;
        }
    };

    let source = match PipeLogSource::open(&config.log_source) {
        Ok(s) => s,
        Err(e) => {
            error!("Fatal na partida: falha ao abrir fonte de log: {e}");
            return;
        }
    };

    run_loop(
        transport,
        source,
        CounterSampler::new(),
        state,
        Duration::from_secs_f64(config.telemetry.interval_secs),
        Duration::from_millis(config.telemetry.idle_poll_ms),
    );
}

/// Corpo do loop, genérico sobre transporte e fonte para os testes rodarem
/// sem I/O real.
fn run_loop<T: Transport, L: LogSource>(
    mut transport: T,
    mut source: L,
    mut sampler: CounterSampler,
    state: &RunState,
    interval: Duration,
    idle_poll: Duration,
) {
    // Gauge quase constante, lido uma vez por sessão
    let memory_total_kb = sampler.sample_memory_total_kb();
    let mut seq: u64 = 0;
    let mut last_push: Option<Instant> = None;
    let mut phase = SessionPhase::Running;

    loop {
        phase = phase.advance(
            state.host_active.load(Ordering::Acquire),
            transport.is_live(),
        );
        if phase != SessionPhase::Running {
            break;
        }

        // 1. Envio periódico: métricas primeiro, depois o dump de logs.
        //    O coletor depende dessa ordem.
        let due = last_push.is_none_or(|at| at.elapsed() >= interval);
        if due && transport.can_accept_send() {
            let snapshot = MetricSnapshot {
                memory_used_kb: sampler.sample_memory_used_kb(),
                memory_total_kb,
                cpu_usage_ratio: sampler.sample_cpu_usage(),
                sent_bytes_per_sec: sampler.sample_sent_bytes_per_second(),
                recv_bytes_per_sec: sampler.sample_received_bytes_per_second(),
                timestamp_ms: epoch_millis(),
            };
            match transport.send_metric_snapshot(&snapshot) {
                Ok(()) => {
                    if let Err(e) = transport.send_buffered_log_dump() {
                        warn!("Dump de logs falhou: {e}");
                    }
                    last_push = Some(Instant::now());
                }
                Err(e) => warn!("Envio de métricas falhou: {e}"),
            }
        }

        // 2. Checagem non-blocking da fonte; linha pronta vai para o
        //    transporte na hora, em ordem de captura.
        match source.try_read_line() {
            Ok(Some(text)) => {
                transport.enqueue_log_line(LogEntry { seq, text });
                seq += 1;
            }
            Ok(None) => thread::sleep(idle_poll),
            Err(e) => {
                // Terminal para esta sessão; a fonte não é reaberta
                error!("Fonte de log ficou ilegível: {e}");
                break;
            }
        }
    }

    // Teardown: libera a fonte, avisa o coletor, e só então o dono vê a
    // thread como encerrada.
    if let Err(e) = source.close() {
        warn!("Falha ao fechar fonte de log: {e}");
    }
    if let Err(e) = transport.send_end_of_session() {
        warn!("Notificação de fim de sessão falhou: {e}");
    }
    phase = SessionPhase::Stopped;
    info!(
        "Sessão encerrada ({seq} linhas capturadas, {} clamps de CPU, fase {phase:?})",
        sampler.clamp_event_count()
    );
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
