use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "livegen.logs.jsonl";

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Compact lines on stderr; stdout stays free for command output.
    Console,
    /// One JSON object per line, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogSink {
    fn json_file(raw: &str) -> Self {
        let path = PathBuf::from(raw.trim());
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE)
            .to_string();
        LogSink::JsonFile { dir, file_name }
    }
}

/// Logging settings resolved from the environment.
///
/// - `LIVEGEN_OBSERVABILITY`: `off`/`0`/`false` disables logging (default on).
/// - `LIVEGEN_LOG_LEVEL`: filter directive, falling back to `RUST_LOG`, then `info`.
/// - `LIVEGEN_JSON_LOG_PATH`: switches the sink to a JSONL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    pub filter: String,
    pub sink: LogSink,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("LIVEGEN_OBSERVABILITY")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);
        let filter = ["LIVEGEN_LOG_LEVEL", "RUST_LOG"]
            .iter()
            .filter_map(|key| lookup(key))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty() && tracing_subscriber::EnvFilter::try_new(v).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let sink = lookup("LIVEGEN_JSON_LOG_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(|v| LogSink::json_file(&v))
            .unwrap_or(LogSink::Console);
        Self {
            enabled,
            filter,
            sink,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the process-wide subscriber from [`ObservabilitySettings::from_env`].
/// Later calls do nothing.
pub fn init_observability() {
    INIT.get_or_init(|| install(ObservabilitySettings::from_env()));
}

fn install(settings: ObservabilitySettings) {
    if !settings.enabled {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_new(&settings.filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    // try_init: a host application may already own the global subscriber.
    match settings.sink {
        LogSink::Console => {
            let _ = registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .try_init();
        }
        LogSink::JsonFile { dir, file_name } => {
            let _ = std::fs::create_dir_all(&dir);
            let _ = registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(false)
                        .with_writer(tracing_appender::rolling::never(dir, file_name)),
                )
                .try_init();
        }
    }
}
