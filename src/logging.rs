use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming a log file prefix.
pub const LOG_ENV: &str = "JOBTAIL_LOG";

/// Initialize tracing.
///
/// With `JOBTAIL_LOG` set, logs go to `{path}.{timestamp}.{pid}` so that
/// concurrent instances never share a file. Otherwise they go to stderr,
/// which keeps stdout clean for command output.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_path) = std::env::var(LOG_ENV) {
        let path = unique_log_path(&log_path);
        match std::fs::File::create(&path) {
            Ok(file) => {
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .init();
                return;
            }
            Err(err) => eprintln!("Warning: Failed to create log file {path}: {err}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();
}

fn unique_log_path(prefix: &str) -> String {
    let pid = std::process::id();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{prefix}.{timestamp}.{pid}")
}
