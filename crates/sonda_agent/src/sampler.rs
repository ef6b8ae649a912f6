//! Amostrador de contadores cumulativos do sistema.
//!
//! Converte os contadores monotônicos expostos pelo kernel (ticks de CPU,
//! páginas de memória, bytes por interface de rede) em razões pontuais e
//! taxas por segundo. Todo o parsing da representação bruta fica escondido
//! aqui; falha de leitura degrada para `0` naquela chamada em vez de
//! derrubar o loop de captura.

use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Raiz da árvore de contadores (configurável para testes).
const DEFAULT_COUNTER_ROOT: &str = "/proc";

const STAT_FILE: &str = "stat";
const MEMINFO_FILE: &str = "meminfo";
const NET_DEV_FILE: &str = "net/dev";

/// Linhas fixas da tabela de memória: total e em uso (KB no campo 1).
const MEMINFO_TOTAL_LINE: usize = 0;
const MEMINFO_USED_LINE: usize = 5;

/// Campos pós-`:` da tabela por interface (2 linhas de header descartadas).
const NET_RX_FIELD: usize = 0;
const NET_TX_FIELD: usize = 8;

// ──────────────────────────────────────────────
// Amostra bruta
// ──────────────────────────────────────────────

/// Snapshot imutável dos contadores cumulativos em um instante.
///
/// Cada contador só cresce desde o boot; somente deltas entre duas amostras
/// consecutivas carregam significado.
#[derive(Debug, Clone, Copy)]
pub struct RawCounterSample {
    /// Ticks de CPU não-idle (user+nice+system+irq+softirq+steal)
    pub active_ticks: u64,
    /// Todos os ticks, incluindo idle e iowait
    pub total_ticks: u64,
    /// Bytes enviados, somados em todas as interfaces
    pub bytes_sent: u64,
    /// Bytes recebidos, somados em todas as interfaces
    pub bytes_received: u64,
    /// Instante da leitura (clock monotônico)
    pub captured_at: Instant,
}

/// Baseline independente de uma direção de tráfego.
#[derive(Debug, Clone, Copy)]
struct RateBaseline {
    bytes: u64,
    at: Instant,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Sent,
    Received,
}

// ──────────────────────────────────────────────
// Amostrador
// ──────────────────────────────────────────────

/// Amostrador de uso de CPU, memória e rede.
///
/// Os baselines são estado exclusivo desta instância; uma sessão, um
/// amostrador. Cada métrica de taxa mantém seu próprio baseline porque as
/// cadências de chamada podem diferir.
pub struct CounterSampler {
    root: PathBuf,
    cpu_baseline: RawCounterSample,
    sent_baseline: RateBaseline,
    recv_baseline: RateBaseline,
    clamp_events: u64,
}

impl CounterSampler {
    /// Cria o amostrador lendo os baselines iniciais da árvore padrão.
    pub fn new() -> Self {
        Self::with_root(DEFAULT_COUNTER_ROOT)
    }

    /// Cria o amostrador com uma raiz alternativa de contadores.
    ///
    /// Fonte ilegível na construção vira baseline zero; as chamadas
    /// seguintes degradam para `0` em vez de falhar.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let now = Instant::now();
        let baseline = initial_baseline(&root, now);
        Self {
            root,
            cpu_baseline: baseline,
            sent_baseline: RateBaseline {
                bytes: baseline.bytes_sent,
                at: now,
            },
            recv_baseline: RateBaseline {
                bytes: baseline.bytes_received,
                at: now,
            },
            clamp_events: 0,
        }
    }

    /// Uso de CPU desde a última chamada, sempre em [0, 1].
    ///
    /// Primeira chamada (ou nenhum tick decorrido) retorna 0. A fonte já
    /// foi observada reportando deltas negativos quando lida fora de ordem;
    /// a política é tratar inconsistência inexplicável como 0% de uso, mas
    /// cada disparo do clamp é contado e logado em vez de sumir em silêncio.
    pub fn sample_cpu_usage(&mut self) -> f32 {
        let Some((active, total)) = read_cpu_ticks(&self.root) else {
            debug!("Linha de ticks de CPU ilegível, reportando 0");
            return 0.0;
        };

        let delta_active = active as i64 - self.cpu_baseline.active_ticks as i64;
        let delta_total = total as i64 - self.cpu_baseline.total_ticks as i64;
        let baseline_age = self.cpu_baseline.captured_at.elapsed();

        // Baseline avança mesmo em leituras degeneradas; a próxima chamada
        // se corrige sozinha.
        self.cpu_baseline = RawCounterSample {
            active_ticks: active,
            total_ticks: total,
            captured_at: Instant::now(),
            ..self.cpu_baseline
        };

        if delta_total < 0 {
            self.note_clamp(format!(
                "contadores de CPU retrocederam (delta_total={delta_total}, baseline de {baseline_age:?} atrás)"
            ));
            return 0.0;
        }
        if delta_total == 0 {
            return 0.0;
        }

        let ratio = delta_active as f32 / delta_total as f32;
        if !(0.0..=1.0).contains(&ratio) {
            self.note_clamp(format!("razão de CPU fora de [0,1]: {ratio:.4}"));
        }
        ratio.clamp(0.0, 1.0)
    }

    /// Memória em uso (KB). Gauge absoluto, sem baseline.
    pub fn sample_memory_used_kb(&self) -> u64 {
        read_meminfo_line(&self.root, MEMINFO_USED_LINE).unwrap_or(0)
    }

    /// Memória total (KB). Gauge absoluto, sem baseline.
    pub fn sample_memory_total_kb(&self) -> u64 {
        read_meminfo_line(&self.root, MEMINFO_TOTAL_LINE).unwrap_or(0)
    }

    /// Bytes enviados por segundo desde a última chamada deste método.
    pub fn sample_sent_bytes_per_second(&mut self) -> f32 {
        self.byte_rate(Direction::Sent, Instant::now())
    }

    /// Bytes recebidos por segundo desde a última chamada deste método.
    pub fn sample_received_bytes_per_second(&mut self) -> f32 {
        self.byte_rate(Direction::Received, Instant::now())
    }

    /// Quantas vezes o clamp de CPU disparou nesta sessão.
    pub fn clamp_event_count(&self) -> u64 {
        self.clamp_events
    }

    /// Taxa de uma direção. Cada direção reseta apenas o próprio baseline.
    fn byte_rate(&mut self, direction: Direction, now: Instant) -> f32 {
        let field = match direction {
            Direction::Sent => NET_TX_FIELD,
            Direction::Received => NET_RX_FIELD,
        };
        let Some(current) = read_net_total(&self.root, field) else {
            debug!("Tabela de rede ilegível, reportando 0 ({direction:?})");
            return 0.0;
        };

        let baseline = match direction {
            Direction::Sent => &mut self.sent_baseline,
            Direction::Received => &mut self.recv_baseline,
        };
        let elapsed = now.saturating_duration_since(baseline.at).as_secs_f64();
        // Regressão do contador (reset de interface) vira delta 0
        let delta = current.saturating_sub(baseline.bytes) as f64;

        baseline.bytes = current;
        baseline.at = now;

        if elapsed == 0.0 {
            // Duas chamadas no mesmo instante não têm taxa definida
            return 0.0;
        }
        (delta / elapsed) as f32
    }

    fn note_clamp(&mut self, why: String) {
        self.clamp_events += 1;
        debug!("Clamp de CPU #{}: {}", self.clamp_events, why);
    }
}

impl Default for CounterSampler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────────────────────
// Parsing da fonte de contadores
// ──────────────────────────────────────────────

fn initial_baseline(root: &Path, now: Instant) -> RawCounterSample {
    let (active, total) = read_cpu_ticks(root).unwrap_or((0, 0));
    RawCounterSample {
        active_ticks: active,
        total_ticks: total,
        bytes_sent: read_net_total(root, NET_TX_FIELD).unwrap_or(0),
        bytes_received: read_net_total(root, NET_RX_FIELD).unwrap_or(0),
        captured_at: now,
    }
}

fn file_lines(path: &Path) -> Option<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content.lines().map(str::to_owned).collect()),
        Err(e) => {
            debug!("Falha ao ler {}: {e}", path.display());
            None
        }
    }
}

/// Lê a primeira linha da tabela de ticks e retorna `(ativos, totais)`.
///
/// Campos 1–8: user/nice/system/idle/iowait/irq/softirq/steal. Idle para
/// fins de uso é `idle + iowait`.
fn read_cpu_ticks(root: &Path) -> Option<(u64, u64)> {
    let lines = file_lines(&root.join(STAT_FILE))?;
    parse_cpu_line(lines.first()?)
}

fn parse_cpu_line(line: &str) -> Option<(u64, u64)> {
    let mut fields = line.split_whitespace();
    fields.next()?; // rótulo "cpu"

    let mut ticks = [0u64; 8];
    for slot in ticks.iter_mut() {
        *slot = fields.next()?.parse().ok()?;
    }

    let idle_all = ticks[3] + ticks[4];
    let total: u64 = ticks.iter().sum();
    Some((total - idle_all, total))
}

fn read_meminfo_line(root: &Path, index: usize) -> Option<u64> {
    let lines = file_lines(&root.join(MEMINFO_FILE))?;
    let line = lines.get(index)?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Soma um campo cumulativo em todas as interfaces da tabela de rede.
///
/// As duas primeiras linhas são header; linhas que não parseiam são
/// puladas (interface parcialmente escrita não derruba a soma).
fn read_net_total(root: &Path, field: usize) -> Option<u64> {
    let lines = file_lines(&root.join(NET_DEV_FILE))?;
    let mut total: u64 = 0;
    for line in lines.iter().skip(2) {
        let Some((_iface, counters)) = line.split_once(':') else {
            continue;
        };
        if let Some(value) = counters.split_whitespace().nth(field) {
            if let Ok(parsed) = value.parse::<u64>() {
                total += parsed;
            }
        }
    }
    Some(total)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
