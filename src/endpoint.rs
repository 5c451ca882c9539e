// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of tracing-endpoints.
//
// tracing-endpoints is free software: you can redistribute it and/or modify it under the terms of
// the GNU General Public License as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// tracing-endpoints is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See
// the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with tracing-endpoints.
// If not, see <http://www.gnu.org/licenses/>.

//! The contract every log sink implements.

use crate::format::{DateFormatter, EntryFormatter, Rfc3339DateFormatter, TextEntryFormatter};

use std::io::Write;

/// Operations all endpoints must support.
///
/// The [`Logger`](crate::logger::Logger) knows its sinks only through this trait: it asks each
/// whether an entry's level is admitted, has the endpoint's own formatters render the entry, and
/// hands the result to [`Endpoint::write`].
///
/// `write` takes `&self` & returns nothing: endpoints are shared between threads, and a logging
/// call must never fail because a sink did. Implementations report their troubles on the
/// [diagnostic channel](crate::diagnostics).
pub trait Endpoint: Send + Sync {
    /// The most verbose level this endpoint accepts (in [`tracing`]'s ordering, entries with
    /// `level <= minimum_level()` are written).
    ///
    /// [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
    fn minimum_level(&self) -> tracing::Level;
    fn date_formatter(&self) -> &dyn DateFormatter;
    fn entry_formatter(&self) -> &dyn EntryFormatter;
    /// Whether [`Endpoint::write`] should terminate each rendered entry with a newline
    fn requires_newlines(&self) -> bool;
    /// Write one rendered entry.
    fn write(&self, text: &str);
    /// True if this endpoint wants entries at `level`
    fn admits(&self, level: &tracing::Level) -> bool {
        *level <= self.minimum_level()
    }
}

/// Which standard stream a [`ConsoleEndpoint`] writes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Plain console output; one line per entry.
pub struct ConsoleEndpoint {
    stream: Stream,
    minimum_level: tracing::Level,
    date_formatter: Box<dyn DateFormatter>,
    entry_formatter: Box<dyn EntryFormatter>,
}

impl std::default::Default for ConsoleEndpoint {
    fn default() -> Self {
        ConsoleEndpoint::new(Stream::Stdout, tracing::Level::TRACE)
    }
}

impl ConsoleEndpoint {
    pub fn new(stream: Stream, minimum_level: tracing::Level) -> ConsoleEndpoint {
        ConsoleEndpoint {
            stream,
            minimum_level,
            date_formatter: Box::new(Rfc3339DateFormatter),
            entry_formatter: Box::new(TextEntryFormatter),
        }
    }
    pub fn with_formatters(
        mut self,
        dates: impl DateFormatter + 'static,
        entries: impl EntryFormatter + 'static,
    ) -> ConsoleEndpoint {
        self.date_formatter = Box::new(dates);
        self.entry_formatter = Box::new(entries);
        self
    }
}

impl Endpoint for ConsoleEndpoint {
    fn minimum_level(&self) -> tracing::Level {
        self.minimum_level
    }
    fn date_formatter(&self) -> &dyn DateFormatter {
        self.date_formatter.as_ref()
    }
    fn entry_formatter(&self) -> &dyn EntryFormatter {
        self.entry_formatter.as_ref()
    }
    fn requires_newlines(&self) -> bool {
        true
    }
    fn write(&self, text: &str) {
        // Lock the stream so that concurrent entries don't interleave mid-line.
        let _ = match self.stream {
            Stream::Stdout => writeln!(std::io::stdout().lock(), "{}", text),
            Stream::Stderr => writeln!(std::io::stderr().lock(), "{}", text),
        };
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn admission_follows_tracing_order() {
        let e = ConsoleEndpoint::new(Stream::Stderr, tracing::Level::INFO);
        assert!(e.admits(&tracing::Level::ERROR));
        assert!(e.admits(&tracing::Level::WARN));
        assert!(e.admits(&tracing::Level::INFO));
        assert!(!e.admits(&tracing::Level::DEBUG));
        assert!(!e.admits(&tracing::Level::TRACE));
    }
}
