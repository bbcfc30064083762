use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::refresh::DebounceWindow;
use crate::runner::{RunTemplate, default_templates};

/// Gateway configuration, loaded from an optional TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Quiet window for coalescing change notifications (milliseconds)
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,

    /// Longest a change may wait for a refresh while changes keep arriving (milliseconds)
    #[serde(default = "default_refresh_max_wait_ms")]
    pub refresh_max_wait_ms: u64,

    /// How often to retry clearing the workspace when it is busy
    #[serde(default = "default_clear_retries")]
    pub clear_retries: u32,

    /// Delay between clear retries (milliseconds)
    #[serde(default = "default_clear_retry_delay_ms")]
    pub clear_retry_delay_ms: u64,

    /// Maximum JSON request body size (in bytes)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Maximum total uncompressed bytes allowed in a folder download (0 = unlimited)
    #[serde(default = "default_max_zip_bytes")]
    pub max_zip_bytes: u64,

    /// Maximum number of files allowed in a folder download (0 = unlimited)
    #[serde(default = "default_max_zip_entries")]
    pub max_zip_entries: u64,

    #[serde(default)]
    pub terminal: TerminalConfig,

    /// Extra or overriding run templates, keyed by file extension
    #[serde(default)]
    pub runners: HashMap<String, RunTemplate>,
}

/// Settings for the shared shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shell program (defaults to $SHELL, then bash)
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Value of TERM inside the shell
    #[serde(default = "default_term")]
    pub term: String,

    #[serde(default = "default_cols")]
    pub cols: u16,

    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Escape sequence used to color shell prompts
    #[serde(default = "default_prompt_color")]
    pub prompt_color: String,
}

fn default_refresh_debounce_ms() -> u64 {
    250
}

fn default_refresh_max_wait_ms() -> u64 {
    1000
}

fn default_clear_retries() -> u32 {
    5
}

fn default_clear_retry_delay_ms() -> u64 {
    1000
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024 // 50 MB
}

fn default_max_zip_bytes() -> u64 {
    512 * 1024 * 1024 // 512 MB
}

fn default_max_zip_entries() -> u64 {
    20_000
}

fn default_term() -> String {
    "xterm-color".to_string()
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    30
}

fn default_prompt_color() -> String {
    "\x1b[38;2;236;74;4m".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            prompt_color: default_prompt_color(),
        }
    }
}

impl TerminalConfig {
    /// The shell program to spawn.
    pub fn shell_program(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "bash".to_string())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: default_refresh_debounce_ms(),
            refresh_max_wait_ms: default_refresh_max_wait_ms(),
            clear_retries: default_clear_retries(),
            clear_retry_delay_ms: default_clear_retry_delay_ms(),
            max_body_bytes: default_max_body_bytes(),
            max_zip_bytes: default_max_zip_bytes(),
            max_zip_entries: default_max_zip_entries(),
            terminal: TerminalConfig::default(),
            runners: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Debounce timing for `file:refresh` notifications.
    pub fn debounce_window(&self) -> DebounceWindow {
        DebounceWindow::new(
            Duration::from_millis(self.refresh_debounce_ms),
            Duration::from_millis(self.refresh_max_wait_ms),
        )
    }

    /// Built-in run templates with configured ones layered on top.
    pub fn run_templates(&self) -> HashMap<String, RunTemplate> {
        let mut templates = default_templates();
        for (ext, template) in &self.runners {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            templates.insert(ext, template.clone());
        }
        templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.refresh_debounce_ms, 250);
        assert_eq!(config.refresh_max_wait_ms, 1000);
        assert_eq!(config.clear_retries, 5);
        assert_eq!(config.terminal.cols, 80);
        assert_eq!(config.terminal.rows, 30);
        assert_eq!(config.terminal.term, "xterm-color");
    }

    #[test]
    fn test_runner_overrides_merge_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            refresh_debounce_ms = 50

            [terminal]
            shell = "/bin/sh"

            [[runners.".rb".steps]]
            program = "ruby"
            args = ["{file}"]

            [[runners.py.steps]]
            program = "python3.12"
            args = ["-u", "{file}"]
            "#,
        )
        .unwrap();

        assert_eq!(config.refresh_debounce_ms, 50);
        assert_eq!(config.terminal.shell_program(), "/bin/sh");

        let templates = config.run_templates();
        assert_eq!(templates["rb"].steps[0].program, "ruby");
        assert_eq!(templates["py"].steps[0].program, "python3.12");
        assert!(templates.contains_key("c"));
    }
}
