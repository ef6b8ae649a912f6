//! Fonte contínua de linhas de log.
//!
//! O loop de captura nunca pode bloquear esperando o log: a checagem de
//! linha pronta é sempre non-blocking e o loop dorme por conta própria
//! quando não há nada. `Ok(None)` significa "nenhuma linha completa ainda".

use sonda_core::config::LogSourceConfig;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Stream line-oriented consumido pelo loop de captura.
pub trait LogSource {
    /// Checagem non-blocking: `Some(linha)` quando uma linha completa está
    /// disponível, `None` caso contrário. Erro é terminal para a sessão.
    fn try_read_line(&mut self) -> io::Result<Option<String>>;

    /// Libera o handle de leitura.
    fn close(&mut self) -> io::Result<()>;
}

// ──────────────────────────────────────────────
// Buffer de linhas
// ──────────────────────────────────────────────

/// Acumula bytes lidos em pedaços e extrai linhas completas.
///
/// Linhas parciais atravessam chamadas de leitura; `\r\n` é normalizado.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove e retorna a próxima linha completa, se houver.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop(); // '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Esvazia o resto do buffer como linha final (stream terminou sem `\n`).
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest: Vec<u8> = self.buf.drain(..).collect();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

// ──────────────────────────────────────────────
// Fonte via processo filho
// ──────────────────────────────────────────────

/// Tail do log do sistema via processo filho com stdout non-blocking.
///
/// O stream é supostamente infinito: EOF depois de drenado o buffer é
/// reportado como erro, e a sessão encerra sem reabrir a fonte.
#[derive(Debug)]
pub struct PipeLogSource {
    child: Child,
    stdout: std::process::ChildStdout,
    buffer: LineBuffer,
    eof: bool,
}

impl PipeLogSource {
    /// Roda o flush (se configurado), inicia o comando de log e coloca o
    /// stdout em modo non-blocking.
    pub fn open(config: &LogSourceConfig) -> io::Result<Self> {
        if !config.flush_command.is_empty() {
            run_flush(&config.flush_command);
        }

        let mut parts = config.command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "comando de log vazio")
        })?;

        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::other("stdout do processo de log indisponível")
        })?;
        set_nonblocking(&stdout)?;

        info!("Fonte de log aberta: {}", config.command);
        Ok(Self {
            child,
            stdout,
            buffer: LineBuffer::default(),
            eof: false,
        })
    }
}

impl LogSource for PipeLogSource {
    fn try_read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.buffer.next_line() {
            return Ok(Some(line));
        }

        if !self.eof {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stdout.read(&mut chunk) {
                    Ok(0) => {
                        self.eof = true;
                        break;
                    }
                    Ok(n) => {
                        self.buffer.push(&chunk[..n]);
                        if let Some(line) = self.buffer.next_line() {
                            return Ok(Some(line));
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        if self.eof {
            // Entrega a linha parcial final antes de reportar o fim
            if let Some(rest) = self.buffer.take_remainder() {
                return Ok(Some(rest));
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream de log terminou",
            ));
        }

        Ok(None)
    }

    fn close(&mut self) -> io::Result<()> {
        let _ = self.child.kill();
        self.child.wait().map(|_| ())
    }
}

impl Drop for PipeLogSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Descarta o conteúdo acumulado do buffer de log antes do streaming,
/// para a sessão não repetir linhas antigas. Falha aqui não impede abrir.
fn run_flush(command: &str) {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return;
    };
    match Command::new(program).args(parts).status() {
        Ok(status) if status.success() => debug!("Flush do log executado: {command}"),
        Ok(status) => warn!("Flush do log saiu com {status}: {command}"),
        Err(e) => warn!("Flush do log falhou: {e}"),
    }
}

#[cfg(unix)]
fn set_nonblocking(stdout: &std::process::ChildStdout) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = stdout.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_nonblocking(_stdout: &std::process::ChildStdout) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "leitura non-blocking do log requer Unix",
    ))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
