//! Subscriber setup for binaries and embedding applications.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `COMMBRIDGE_LOG` picks the level for
/// this crate (default `info`). `LOG_FORMAT=json` switches to JSON lines.
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(std::env::var("COMMBRIDGE_LOG").ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

fn filter_directives(level: Option<&str>) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("commbridge={level},commbridge_demo={level}")
}
