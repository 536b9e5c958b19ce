//! Logger initialization.

use std::fmt::Write as _;
use std::io::IsTerminal;
use std::str::FromStr;

use jiff::tz::TimeZone;
use jiff::Zoned;
use logforth::append::Stderr;
use logforth::filter::EnvFilter;
use logforth::layout::Layout;

use crate::args::Args;

/// Layout that timestamps every line in UTC and colors the level when stderr is a terminal.
#[derive(Debug)]
struct UtcLayout {
    no_color: bool,
}

impl Layout for UtcLayout {
    fn format(&self, record: &log::Record<'_>, _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();
        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level_str = if self.no_color {
            format!("{:>5}", record.level())
        } else {
            match record.level() {
                log::Level::Error => format!("\x1b[31m{:>5}\x1b[0m", record.level()),
                log::Level::Warn => format!("\x1b[33m{:>5}\x1b[0m", record.level()),
                log::Level::Info => format!("\x1b[32m{:>5}\x1b[0m", record.level()),
                log::Level::Debug => format!("\x1b[34m{:>5}\x1b[0m", record.level()),
                log::Level::Trace => format!("\x1b[35m{:>5}\x1b[0m", record.level()),
            }
        };
        write!(output, "{level_str}  {}", record.args())?;
        Ok(output.into_bytes())
    }
}

/// Apply the server's logging configuration. Safe to call at most once per process.
pub fn init(args: &Args) {
    let log_filter = args.log_filter.clone();

    logforth::builder()
        .dispatch(move |d| {
            let filter = EnvFilter::from_str(&log_filter).unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter is valid"));
            let layout = UtcLayout { no_color: !std::io::stderr().is_terminal() };
            d.filter(filter).append(Stderr::default().with_layout(layout))
        })
        .apply();
}
