//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável cobre coletor, cadência de
//! telemetria e fonte de log.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuração da conexão com o coletor remoto.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Host/IP do coletor
    pub host: String,
    /// Porta TCP
    pub port: u16,
    /// Credencial enviada na abertura da sessão
    pub api_key: String,
    /// Identificador da aplicação monitorada
    pub app_id: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5055,
            api_key: String::new(),
            app_id: "sonda".into(),
        }
    }
}

/// Cadência do loop de captura e envio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Intervalo entre envios de métricas (segundos)
    pub interval_secs: f64,
    /// Pausa do loop quando não há linha de log pronta (ms).
    /// Trade-off entre uso de CPU e latência de captura.
    pub idle_poll_ms: u64,
    /// Máximo de linhas retidas em memória para o dump (as mais antigas são descartadas)
    pub retained_log_cap: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0.5,
            idle_poll_ms: 10,
            retained_log_cap: 10_000,
        }
    }
}

/// Fonte contínua de linhas de log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSourceConfig {
    /// Comando que emite o stream de log em stdout
    pub command: String,
    /// Comando executado antes de abrir o stream, para descartar o
    /// conteúdo acumulado do buffer (vazio = pular)
    pub flush_command: String,
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self {
            command: "journalctl -f -n 0 -o short-iso".into(),
            flush_command: String::new(),
        }
    }
}

/// Configuração raiz do agente.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub collector: CollectorConfig,
    pub telemetry: TelemetryConfig,
    pub log_source: LogSourceConfig,
}

impl AgentConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AgentConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AgentConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.collector.host.is_empty() {
            errors.push("Host do coletor não pode ser vazio".into());
        }
        if self.collector.port == 0 {
            errors.push("Porta do coletor não pode ser 0".into());
        }
        if self.telemetry.interval_secs < 0.1 || self.telemetry.interval_secs > 60.0 {
            errors.push(format!(
                "Intervalo de telemetria inválido: {} (0.1–60.0)",
                self.telemetry.interval_secs
            ));
        }
        if self.telemetry.idle_poll_ms == 0 || self.telemetry.idle_poll_ms > 1000 {
            errors.push(format!(
                "Pausa idle inválida: {} ms (1–1000)",
                self.telemetry.idle_poll_ms
            ));
        }
        if self.log_source.command.is_empty() {
            errors.push("Comando da fonte de log não pode ser vazio".into());
        }

        errors
    }
}
