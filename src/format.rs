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

//! Rendering entries to text.
//!
//! The path from a logging call to bytes on disk (or on the wire) has three steps:
//!
//! 1. the [`Logger`](crate::logger::Logger) captures an [`Entry`]
//!
//! 2. each endpoint's [`EntryFormatter`] renders that entry to a string (consulting the endpoint's
//!    [`DateFormatter`] for timestamps)
//!
//! 3. the endpoint writes the string
//!
//! This module is step 2. Both traits are small, and hosts are free to bring their own
//! layouts; [`TextEntryFormatter`] and [`JsonEntryFormatter`] cover the common cases.

use crate::{
    entry::Entry,
    error::{Error, Result},
};

use backtrace::Backtrace;
use chrono::prelude::*;
use serde::Serialize;

use std::fmt::Write;

/// Renders instants for humans.
pub trait DateFormatter: Send + Sync {
    fn format(&self, time: DateTime<Utc>) -> String;
}

/// RFC 3339, UTC, microsecond precision (e.g. `2024-03-01T12:00:00.250000Z`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Rfc3339DateFormatter;

impl DateFormatter for Rfc3339DateFormatter {
    fn format(&self, time: DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// `strftime`-style patterns, rendered in UTC.
#[derive(Clone, Debug)]
pub struct PatternDateFormatter {
    pattern: String,
}

impl PatternDateFormatter {
    pub fn new(pattern: impl Into<String>) -> PatternDateFormatter {
        PatternDateFormatter {
            pattern: pattern.into(),
        }
    }
}

impl DateFormatter for PatternDateFormatter {
    fn format(&self, time: DateTime<Utc>) -> String {
        let mut out = String::new();
        // chrono reports a bad pattern as a `fmt::Error` at render time; fall back rather than
        // lose the entry.
        if write!(out, "{}", time.format(&self.pattern)).is_err() {
            return Rfc3339DateFormatter.format(time);
        }
        out
    }
}

/// Renders an [`Entry`] to the string an endpoint will write.
pub trait EntryFormatter: Send + Sync {
    fn format(&self, entry: &Entry, dates: &dyn DateFormatter) -> Result<String>;
}

/// One line of plain text per entry:
///
/// ```text
/// 2024-03-01T12:00:00.250000Z [WARN] src/disk.rs:42 app::disk - disk nearly full free=12
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct TextEntryFormatter;

impl EntryFormatter for TextEntryFormatter {
    fn format(&self, entry: &Entry, dates: &dyn DateFormatter) -> Result<String> {
        let site = entry.call_site();
        let mut out = format!("{} [{}] ", dates.format(entry.time()), entry.level());
        if !site.file.is_empty() {
            out.push_str(&site.file);
            if let Some(line) = site.line {
                let _ = write!(out, ":{}", line);
            }
            out.push(' ');
        }
        if !site.function.is_empty() {
            out.push_str(&site.function);
            out.push(' ');
        }
        out.push_str("- ");
        out.push_str(entry.message());
        for (key, value) in entry.user_info() {
            let _ = write!(out, " {}={}", key, value);
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    entries: [&'a Entry; 1],
}

/// The JSON wire payload: `{"entries":[{...}]}`, one entry per payload.
///
/// The array leaves room for batching several entries into one upload later on without changing
/// the shape receivers parse.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEntryFormatter;

impl EntryFormatter for JsonEntryFormatter {
    fn format(&self, entry: &Entry, _dates: &dyn DateFormatter) -> Result<String> {
        serde_json::to_string(&Payload { entries: [entry] }).map_err(|err| Error::Format {
            source: Box::new(err),
            back: Backtrace::new(),
        })
    }
}
