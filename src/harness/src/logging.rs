use std::fmt;

use ansi_term::Colour;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{Directive, EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Overrides the default level, e.g. `RPMA_LOG=rpma_server=debug`.
pub const LOG_ENV: &str = "RPMA_LOG";

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> FmtLevel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

const TRACE_STR: &str = "TRACE";
const DEBUG_STR: &str = "DEBUG";
const INFO_STR: &str = " INFO";
const WARN_STR: &str = " WARN";
const ERROR_STR: &str = "ERROR";

impl<'a> fmt::Display for FmtLevel<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (text, colour) = match *self.level {
            Level::TRACE => (TRACE_STR, Colour::Purple),
            Level::DEBUG => (DEBUG_STR, Colour::Blue),
            Level::INFO => (INFO_STR, Colour::Green),
            Level::WARN => (WARN_STR, Colour::Yellow),
            Level::ERROR => (ERROR_STR, Colour::Red),
        };
        if self.ansi {
            write!(f, "{}", colour.paint(text))
        } else {
            f.pad(text)
        }
    }
}

/// `[timestamp LEVEL file:line] fields`
struct EngineFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for EngineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        use chrono::Utc;
        let metadata = event.metadata();
        let fmt_level = FmtLevel::new(metadata.level(), self.ansi && writer.has_ansi_escapes());

        write!(
            writer,
            "[{} {} {}:{}] ",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            fmt_level,
            metadata.file().unwrap_or("<unnamed>"),
            metadata.line().unwrap_or(0),
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. `default_level` is a directive such as `info` or
/// `rpma_server=debug` and is used unless `RPMA_LOG` is set; an unparsable directive falls
/// back to `info`.
///
/// Returns false if a subscriber was already installed.
pub fn init_log(default_level: &str, ansi: bool) -> bool {
    use tracing_subscriber::prelude::*;

    let default_directive: Directive = default_level
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());

    let log_env_filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let log_fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .event_format(EngineFormatter { ansi })
        .with_filter(log_env_filter);

    let ok = tracing_subscriber::registry()
        .with(log_fmt_layer)
        .try_init()
        .is_ok();
    if ok {
        tracing::info!("tracing-log initialized");
    }
    ok
}
