//! Logger initialization for the proxy binary.

use std::fmt::Write;
use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::Once;

use jiff::{Zoned, tz::TimeZone};
use logforth::{
    append::Stderr,
    filter::EnvFilter,
    layout::Layout,
};

static INIT: Once = Once::new();

/// Layout printing UTC timestamps; stdout is reserved for the protocol, so
/// everything goes to stderr.
#[derive(Debug)]
struct UtcLayout {
    color: bool,
}

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();

        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        if self.color {
            let code = match record.level() {
                log::Level::Error => 31,
                log::Level::Warn => 33,
                log::Level::Info => 32,
                log::Level::Debug => 34,
                log::Level::Trace => 35,
            };
            write!(output, "\x1b[{code}m{:>5}\x1b[0m  ", record.level())?;
        } else {
            write!(output, "{:>5}  ", record.level())?;
        }

        write!(output, "{}", record.args())?;

        Ok(output.into_bytes())
    }
}

/// Initializes the global logger with the given filter string (the
/// `MCP_PROXY_LOG_LEVEL` syntax, case-insensitive levels).
pub fn init(log_filter: &str) {
    let log_filter = log_filter.to_lowercase();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |dispatch| {
                let filter = EnvFilter::from_str(&log_filter).unwrap_or_else(|_| {
                    EnvFilter::from_str("info").expect("default filter should be valid")
                });

                let layout = UtcLayout {
                    color: std::io::stderr().is_terminal(),
                };

                dispatch
                    .filter(filter)
                    .append(Stderr::default().with_layout(layout))
            })
            .apply();
    });
}
