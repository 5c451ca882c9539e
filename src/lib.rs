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
//! A [`tracing-subscriber`] [`Layer`] that fans [`tracing`] [`Event`]s out to log files that
//! rotate themselves, and to HTTP(S) services through an outbox that survives restarts.
//!
//! [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
//! [`Event`]: https://docs.rs/tracing/latest/tracing/struct.Event.html
//!
//! # Introduction
//!
//! [`tracing`] separates the producers of events from their consumers; [`tracing-subscriber`]
//! goes further & lets consumers be stacked up, [`Layer`] by [`Layer`]. This crate provides one
//! such layer, [`Logger`](logger::Logger), which knows nothing about where entries end up: it
//! builds one [`Entry`](entry::Entry) per event & hands it to each of its
//! [`Endpoint`](endpoint::Endpoint)s whose minimum level admits it. Each endpoint renders the entry
//! its own way & writes the result wherever it writes.
//!
//! Three families of endpoint are provided:
//!
//! - [`file`]: append to a log file, moving on to the next file when the current one gets too
//!   big ([`RotatingFileEndpoint`](file::RotatingFileEndpoint)), when the (UTC) day changes
//!   ([`DatedFileEndpoint`](file::DatedFileEndpoint)), or never
//!   ([`SingleFileEndpoint`](file::SingleFileEndpoint))
//!
//! - [`http`]: queue entries in an on-disk outbox & upload them, retrying until the server
//!   accepts them ([`HttpEndpoint`](http::HttpEndpoint))
//!
//! - [`endpoint::ConsoleEndpoint`]: stdout or stderr
//!
//! Logging never fails from the caller's point of view. Endpoints are checked when they're built
//! (a file that can't be opened is an error then); after that, anything that goes wrong is
//! reported on the [`diagnostics`] channel & the endpoint carries on as best it can.
//!
//! # Usage
//!
//! ```no_run
//! use tracing::info;
//! use tracing_endpoints::{file::RotatingFileEndpoint, http::HttpEndpoint, logger::Logger};
//! use tracing_subscriber::registry::Registry;
//! use tracing_subscriber::layer::SubscriberExt; // Needed to get `with()`
//!
//! // Five files of at most a MiB each, plus a collector that gets everything at INFO & above.
//! let logger = Logger::new()
//!     .with_endpoint(RotatingFileEndpoint::builder("/var/log/app/app.log").build().unwrap())
//!     .with_endpoint(
//!         HttpEndpoint::from_url("https://logs.example.com/ingest", "POST")
//!             .unwrap()
//!             .json()
//!             .minimum_level(tracing::Level::INFO)
//!             .cache_dir("/var/cache/app")
//!             .build()
//!             .unwrap(),
//!     );
//! let subscriber = Registry::default().with(logger);
//! let _guard = tracing::subscriber::set_default(subscriber);
//!
//! info!(user = "sp1ff", "Hello, world!");
//! ```

pub mod cache;
pub mod clock;
pub mod diagnostics;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod events;
pub mod file;
pub mod format;
pub mod http;
pub mod log_file;
pub mod logger;
pub mod queue;
pub mod rotation;
pub mod scheduler;
pub mod transport;

#[path = "byte-utils.rs"]
mod byte_utils;

pub use error::{Error, Result};
