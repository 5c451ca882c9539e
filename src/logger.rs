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

//! Fanning entries out to endpoints.
//!
//! A [`Logger`] holds any number of [`Endpoint`]s. For each logging call it builds one [`Entry`]
//! and, for every endpoint whose minimum level admits the entry, has that endpoint's formatters
//! render it & hands the result to the endpoint's `write`.
//!
//! [`Logger`] is a [`tracing_subscriber`] [`Layer`], so the usual way to log is with the
//! [`tracing`] macros:
//!
//! ```no_run
//! use tracing::info;
//! use tracing_endpoints::{endpoint::ConsoleEndpoint, file::RotatingFileEndpoint, logger::Logger};
//! use tracing_subscriber::layer::SubscriberExt; // Needed to get `with()`
//!
//! let logger = Logger::new()
//!     .with_endpoint(ConsoleEndpoint::default())
//!     .with_endpoint(
//!         RotatingFileEndpoint::builder("/var/log/app/app.log")
//!             .minimum_level(tracing::Level::INFO)
//!             .build()
//!             .unwrap(),
//!     );
//! let subscriber = tracing_subscriber::Registry::default().with(logger);
//! let _guard = tracing::subscriber::set_default(subscriber);
//! info!(free = 12, "disk nearly full");
//! ```
//!
//! Hosts that don't use [`tracing`] can call [`Logger::log`] directly.
//!
//! [`tracing_subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html

use crate::{
    clock::{Clock, SystemClock},
    diagnostics,
    endpoint::Endpoint,
    entry::{CallSite, Entry},
    format::{DateFormatter, Rfc3339DateFormatter},
};

use serde_json::Value;
use tracing::Event;
use tracing_subscriber::layer::Context;

// When the tracing-log feature is enabled, use NormalizeEvent to recover file/line metadata
// from events that originated from the `log` crate.
#[cfg(feature = "tracing-log")]
use tracing_log::NormalizeEvent;

use std::{collections::BTreeMap, sync::Arc};

/// Collects an event's `message` & its other fields as JSON values.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &tracing::field::Field, value: Value) {
        // Fields the `log` bridge adds to carry metadata; they're recovered via
        // `normalized_metadata()` instead.
        if !field.name().starts_with("log.") {
            self.fields.insert(field.name().to_owned(), value);
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            // The tracing macros pre-format the message, so `value` is a `fmt::Arguments` whose
            // `Debug` output carries no enclosing quotes.
            self.message = Some(format!("{:?}", value));
        } else {
            self.insert(field, Value::from(format!("{:?}", value)));
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.insert(field, Value::from(value));
        }
    }
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, Value::from(value));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, Value::from(value));
    }
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.insert(field, Value::from(value));
    }
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}

/// Fans each logging call out to a set of [`Endpoint`]s.
pub struct Logger {
    endpoints: Vec<Arc<dyn Endpoint>>,
    date_formatter: Box<dyn DateFormatter>,
    clock: Arc<dyn Clock>,
}

impl std::default::Default for Logger {
    fn default() -> Self {
        Logger::new()
    }
}

impl Logger {
    /// A logger with no endpoints, stamping entries with the system clock in RFC 3339.
    pub fn new() -> Logger {
        Logger {
            endpoints: Vec::new(),
            date_formatter: Box::new(Rfc3339DateFormatter),
            clock: Arc::new(SystemClock),
        }
    }
    pub fn with_endpoint(self, endpoint: impl Endpoint + 'static) -> Logger {
        self.with_shared_endpoint(Arc::new(endpoint))
    }
    /// Add an endpoint the caller keeps a handle on (to rotate it, drain it &c).
    pub fn with_shared_endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Logger {
        self.endpoints.push(endpoint);
        self
    }
    /// How [`Entry::date`] is rendered; endpoints' own date formatters are unaffected.
    pub fn with_date_formatter(mut self, dates: impl DateFormatter + 'static) -> Logger {
        self.date_formatter = Box::new(dates);
        self
    }
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Logger {
        self.clock = Arc::new(clock);
        self
    }
    pub fn endpoints(&self) -> &[Arc<dyn Endpoint>] {
        &self.endpoints
    }
    /// True if at least one endpoint admits `level`
    pub fn admits(&self, level: &tracing::Level) -> bool {
        self.endpoints.iter().any(|ep| ep.admits(level))
    }

    /// Log `message` at `level` with `fields`, made from wherever this is called.
    #[track_caller]
    pub fn log(&self, level: tracing::Level, message: &str, fields: BTreeMap<String, Value>) {
        let caller = std::panic::Location::caller();
        self.log_at(
            level,
            message,
            fields,
            CallSite {
                function: String::new(),
                file: caller.file().to_owned(),
                line: Some(caller.line()),
                column: Some(caller.column()),
            },
        );
    }

    /// Log `message` at `level` with `fields`, attributed to `call_site`.
    pub fn log_at(
        &self,
        level: tracing::Level,
        message: &str,
        fields: BTreeMap<String, Value>,
        call_site: CallSite,
    ) {
        if !self.admits(&level) {
            return;
        }
        let time = self.clock.now();
        let entry = Entry::new(level, message, time, self.date_formatter.format(time))
            .with_fields(fields)
            .with_call_site(call_site);
        self.dispatch(&entry);
    }

    /// Render `entry` for, & write it to, every endpoint that admits it.
    pub fn dispatch(&self, entry: &Entry) {
        let level = entry.level();
        for endpoint in self.endpoints.iter().filter(|ep| ep.admits(&level)) {
            match endpoint
                .entry_formatter()
                .format(entry, endpoint.date_formatter())
            {
                Ok(text) => endpoint.write(&text),
                Err(err) => tracing::warn!(
                    target: diagnostics::TARGET,
                    "dropping an entry that couldn't be rendered: {}",
                    err
                ),
            }
        }
    }
}

impl<S> tracing_subscriber::layer::Layer<S> for Logger
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Our own complaints go to whatever else is listening, never back into our endpoints.
        if diagnostics::is_diagnostic(event.metadata().target()) {
            return;
        }
        let level = *event.metadata().level();
        if !self.admits(&level) {
            return;
        }

        #[cfg(feature = "tracing-log")]
        let normalized_meta = event.normalized_metadata();
        #[cfg(feature = "tracing-log")]
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());
        #[cfg(not(feature = "tracing-log"))]
        let meta = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.log_at(
            level,
            visitor.message.as_deref().unwrap_or_default(),
            visitor.fields,
            CallSite {
                function: meta.module_path().unwrap_or(meta.target()).to_owned(),
                file: meta.file().unwrap_or_default().to_owned(),
                line: meta.line(),
                column: None,
            },
        );
    }
}
