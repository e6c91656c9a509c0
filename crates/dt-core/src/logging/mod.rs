//! Structured logging for dt-core.
//!
//! Two output modes, both on stderr (stdout is reserved for command payloads):
//! - Human-readable console lines for interactive use
//! - JSONL for scripted pipelines, one object per event
//!
//! Library code logs with plain `tracing` macros and an event name from
//! [`event_names`] as the target. The CLI wraps each command in
//! [`LogContext::span`] so every line carries the analysis and host IDs.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Event targets are event names rather than module paths, so the filter is
/// a plain level. `RUST_LOG` directives apply only while `DT_LOG` is unset.
pub fn init_logging(config: &LogConfig) {
    let level_filter = || EnvFilter::default().add_directive(LevelFilter::from(config.level).into());
    let filter = if std::env::var(config::ENV_LOG_LEVEL).is_err() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter())
    } else {
        level_filter()
    };

    // A second install fails and is ignored.
    let _ = match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };
}

/// Host identifier for log correlation.
///
/// Uses the first 8 characters of the machine-id when available, else a
/// hash of `HOSTNAME`, else a random suffix.
pub fn get_host_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 && id.is_ascii() {
            return format!("host-{}", &id[..8]);
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        hostname.hash(&mut hasher);
        return format!("host-{:08x}", hasher.finish() as u32);
    }

    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("host-{}", &uuid[..8])
}

/// Emit an event carrying the context's correlation IDs.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "starting", command = "decompose");
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(
            target: $event,
            analysis_id = %$ctx.analysis_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(
            target: $event,
            analysis_id = %$ctx.analysis_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(
            target: $event,
            analysis_id = %$ctx.analysis_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(
            target: $event,
            analysis_id = %$ctx.analysis_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            message = $msg,
            $($key = $val,)*
        )
    };
}
