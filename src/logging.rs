//! Thin facade over `slog`. Engine components take an optional parent logger
//! and fall back to a discarding root, so library users pay nothing unless
//! they opt in.

use serde_derive::{Deserialize, Serialize};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Severity, SourceLocation};
use sloggers::Build;

pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Logger};

/// How much the engine reports about network events.
///
/// `Events` emits one line per transport event. `EventsData` additionally
/// includes message sizes and contents. `EventsSource` also tags each line
/// with the module and line that emitted it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Verbosity {
    None,
    Events,
    EventsData,
    EventsSource,
}

impl Default for Verbosity {
    fn default() -> Verbosity {
        Verbosity::None
    }
}

/// Builds a stderr terminal logger matching the requested verbosity.
pub fn terminal(verbosity: Verbosity) -> Logger {
    let severity = match verbosity {
        Verbosity::None => return Logger::root(Discard, o!()),
        Verbosity::Events => Severity::Info,
        Verbosity::EventsData => Severity::Debug,
        Verbosity::EventsSource => Severity::Trace,
    };

    let location = match verbosity {
        Verbosity::EventsSource => SourceLocation::ModuleAndLine,
        _ => SourceLocation::None,
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);
    builder.source_location(location);

    builder.build().expect("Error building terminal logger")
}

/// Resolves an optional parent logger into a child or a discarding root.
#[inline]
pub fn child<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        _ => Logger::root(Discard, o!()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_none_discards() {
        let log = terminal(Verbosity::None);
        // A discarding logger accepts records without side effects.
        info!(log, "dropped");
    }

    #[test]
    fn test_child_of_none_discards() {
        let log = child(None);
        debug!(log, "dropped");
    }
}
