use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "console.logs.jsonl";

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    Off,
    /// Compact lines on stderr. Stdout is left to the revealed text.
    Stderr,
    /// JSONL appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    sink: LogSink,
    /// Explicit `CONSOLE_LOG_LEVEL`; falls back to `RUST_LOG`, then `info`.
    level: Option<String>,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("CONSOLE_OBSERVABILITY_ENABLED")
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(true);
        let sink = if !enabled {
            LogSink::Off
        } else if let Some(raw) = lookup("CONSOLE_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
            json_sink(Path::new(raw.trim()))
        } else {
            LogSink::Stderr
        };
        Self {
            sink,
            level: lookup("CONSOLE_LOG_LEVEL").filter(|l| !l.trim().is_empty()),
        }
    }

    fn filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn install(self) {
        let filter = self.filter();
        match self.sink {
            LogSink::Off => {}
            LogSink::Stderr => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
            }
            LogSink::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
            }
        }
    }
}

fn json_sink(path: &Path) -> LogSink {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogSink::JsonFile { dir, file_name }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the process-wide subscriber on first call; later calls do nothing.
///
/// Reads `CONSOLE_OBSERVABILITY_ENABLED` (default on), `CONSOLE_LOG_LEVEL`
/// or `RUST_LOG`, and `CONSOLE_JSON_LOG_PATH`. Without a path, logs go to
/// stderr.
pub fn init_observability() {
    INIT.get_or_init(|| LogSettings::from_lookup(|key| std::env::var(key).ok()).install());
}
