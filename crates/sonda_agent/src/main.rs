//! # Sonda Agent
//!
//! Captura o stream de log do dispositivo e snapshots periódicos de
//! CPU/memória/rede, multiplexando ambos em uma única conexão TCP com o
//! coletor remoto. Entrega é best-effort: sem a rede, nada é acumulado
//! para replay.
//!
//! ## Uso
//! ```bash
//! sonda_agent            # usa o config.toml ao lado do executável
//! ```

mod log_source;
mod pipeline;
mod sampler;
mod transport;

use pipeline::CaptureSession;
use sonda_core::config::AgentConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Setado pelo handler de sinal; o loop do dono converte em
/// `mark_host_terminated`.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AgentConfig::default_path();
    let config = AgentConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        std::process::exit(1);
    }

    install_stop_handler();

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ SONDA AGENT – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Coletor:    {}:{}", config.collector.host, config.collector.port);
    println!("  App:        {}", config.collector.app_id);
    println!("  Intervalo:  {:.1}s", config.telemetry.interval_secs);
    println!("  Log:        {}", config.log_source.command);
    println!("  Protocolo:  bincode v{}", sonda_core::PROTOCOL_VERSION);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Sessão ──
    let session = CaptureSession::spawn(config);

    // O dono acompanha o término por polling; a thread também encerra
    // sozinha se o transporte morrer.
    let mut stop_sent = false;
    while session.is_thread_running() {
        if STOP_REQUESTED.load(Ordering::Acquire) && !stop_sent {
            info!("Parada solicitada pelo host, encerrando sessão...");
            session.mark_host_terminated();
            stop_sent = true;
        }
        std::thread::sleep(Duration::from_millis(250));
    }
    session.join();
    info!("Agente finalizado");
}

// ──────────────────────────────────────────────
// Sinal de parada (Unix)
// ──────────────────────────────────────────────

#[cfg(unix)]
extern "C" fn handle_stop(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::Release);
}

#[cfg(unix)]
fn install_stop_handler() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_stop as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            handle_stop as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

#[cfg(not(unix))]
fn install_stop_handler() {}
