//! The process-wide log sink.
//!
//! One stdout subscriber, installed once. The line format is fixed:
//! millisecond timestamp, level padded to 8 characters, the event's target
//! as the component tag, then the message.

use std::sync::OnceLock;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::GlobalConfig;

struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = metadata.level().to_string();
        write!(
            writer,
            "{} | {:<8} | {} | ",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            metadata.target(),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the stdout sink, reading verbosity from the global config.
///
/// `tracing` does not support unregistering a global subscriber, so the
/// "no duplicate sinks on re-initialization" contract is met with a guard:
/// only the first call installs anything, later calls return immediately.
pub fn init_logging(config: &GlobalConfig) {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_new(&config.log_level)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(LineFormat)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinitialization_is_guarded() {
        let config = GlobalConfig {
            log_level: "debug".to_string(),
        };
        init_logging(&config);
        // A second call must not panic or install a second sink.
        init_logging(&config);
        tracing::info!("sink smoke test");
    }

    #[test]
    fn invalid_level_falls_back_to_info() {
        let config = GlobalConfig {
            log_level: "definitely-not-a-level".to_string(),
        };
        // Must not panic; the filter falls back to `info`.
        init_logging(&config);
    }
}
