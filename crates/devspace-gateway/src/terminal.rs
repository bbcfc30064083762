//! The shared terminal.
//!
//! One shell runs on a pseudo-terminal for the whole gateway lifetime. Every
//! session writes into the same input queue and sees the same output. If the
//! shell cannot be spawned the gateway keeps running with a
//! [`DegradedTerminal`] that swallows input.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use regex::{Captures, Regex};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::TerminalConfig;
use crate::error::GatewayError;
use crate::hub::BroadcastHub;
use crate::protocol::ServerEvent;

const READ_CHUNK: usize = 4096;
const COLOR_RESET: &str = "\x1b[0m";

/// `user@host:path$` or `user@host:path#` at the start of a line.
static PROMPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([\w.-]+@[\w.-]+:[^#$\n]*[#$])").expect("Invalid regex pattern for shell prompt")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Running,
    Degraded,
}

/// Handle to the shared shell.
pub trait Terminal: Send + Sync {
    /// Queue bytes for the shell's input. Never blocks and never fails.
    fn write(&self, bytes: &[u8]);

    fn state(&self) -> TerminalState;

    /// Kill the shell.
    fn shutdown(&self);
}

/// Spawn the shell, falling back to a degraded terminal on failure.
pub fn start_terminal(
    config: &TerminalConfig,
    cwd: &Path,
    hub: Arc<BroadcastHub>,
) -> Arc<dyn Terminal> {
    match PtyTerminal::spawn(config, cwd, hub) {
        Ok(terminal) => Arc::new(terminal),
        Err(err) => {
            warn!("{}; terminal disabled", err);
            Arc::new(DegradedTerminal)
        }
    }
}

// ============================================================================
// Degraded
// ============================================================================

/// Stand-in used when no shell could be started.
#[derive(Debug, Default, Clone, Copy)]
pub struct DegradedTerminal;

impl Terminal for DegradedTerminal {
    fn write(&self, bytes: &[u8]) {
        debug!("Terminal degraded; dropping {} input byte(s)", bytes.len());
    }

    fn state(&self) -> TerminalState {
        TerminalState::Degraded
    }

    fn shutdown(&self) {}
}

// ============================================================================
// PTY-backed shell
// ============================================================================

pub struct PtyTerminal {
    input: mpsc::UnboundedSender<Vec<u8>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    // Dropping the master closes the pty, so it lives as long as we do.
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtyTerminal {
    pub fn spawn(
        config: &TerminalConfig,
        cwd: &Path,
        hub: Arc<BroadcastHub>,
    ) -> Result<Self, GatewayError> {
        let program = config.shell_program();

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| GatewayError::ProcessSpawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&program);
        cmd.args(&config.args);
        cmd.cwd(cwd);
        cmd.env("TERM", &config.term);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| GatewayError::ProcessSpawn(format!("{program}: {e}")))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| GatewayError::ProcessSpawn(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| GatewayError::ProcessSpawn(e.to_string()))?;

        let (input, input_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("pty-writer".to_string())
            .spawn(move || write_loop(writer, input_rx))?;

        let colorizer = PromptColorizer::new(&config.prompt_color);
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || read_loop(reader, colorizer, hub))?;

        info!(
            "Spawned shell {} ({}x{}) in {}",
            program,
            config.cols,
            config.rows,
            cwd.display()
        );

        Ok(Self {
            input,
            child: Mutex::new(child),
            _master: Mutex::new(pair.master),
        })
    }
}

impl Terminal for PtyTerminal {
    fn write(&self, bytes: &[u8]) {
        if self.input.send(bytes.to_vec()).is_err() {
            debug!("Shell input closed; dropping {} byte(s)", bytes.len());
        }
    }

    fn state(&self) -> TerminalState {
        TerminalState::Running
    }

    fn shutdown(&self) {
        let Ok(mut child) = self.child.lock() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!("Shell already exited: {:?}", status),
            _ => {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill shell: {}", e);
                } else {
                    info!("Shell stopped");
                }
            }
        }
    }
}

fn write_loop(mut writer: Box<dyn Write + Send>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.blocking_recv() {
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            error!("Failed to write to shell: {}", e);
            break;
        }
    }
    debug!("Shell writer stopped");
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    mut colorizer: PromptColorizer,
    hub: Arc<BroadcastHub>,
) {
    let mut carry = Utf8Carry::default();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = carry.push(&buf[..n]);
                if !text.is_empty() {
                    hub.publish(ServerEvent::TerminalData(colorizer.apply(&text)));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Shell output closed: {}", e);
                break;
            }
        }
    }
    info!("Shell output stream ended");
}

// ============================================================================
// Output processing
// ============================================================================

/// Wraps shell prompts in a color escape.
///
/// Chunks are colored as they arrive and never held back, so a prompt that
/// is split across two reads is passed through uncolored.
pub struct PromptColorizer {
    color: String,
    at_line_start: bool,
}

impl PromptColorizer {
    pub fn new(color: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            at_line_start: true,
        }
    }

    /// Color prompts in the next chunk of output. A match at the start of
    /// the chunk only counts if the previous chunk ended a line.
    pub fn apply(&mut self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let continues_line = !self.at_line_start;
        let out = PROMPT_PATTERN
            .replace_all(text, |caps: &Captures| {
                let whole = &caps[0];
                if continues_line && caps.get(0).is_some_and(|m| m.start() == 0) {
                    whole.to_string()
                } else {
                    format!("{}{}{}", self.color, &caps[1], COLOR_RESET)
                }
            })
            .into_owned();
        self.at_line_start = text.ends_with('\n');
        out
    }
}

/// Reassembles UTF-8 characters split across reads.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decode as much as possible, holding back an incomplete trailing
    /// character. Invalid bytes become U+FFFD.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
