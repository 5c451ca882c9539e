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

//! Send entries to an HTTP collector.
//!
//! Usage: `http-test [URL] [--json]` (default URL: `http://localhost:8080/logs`)
//!
//! Entries the collector doesn't accept stay in the outbox under the system temp directory & are
//! retried the next time this runs.

use tracing::{debug, error, info, trace, warn};
use tracing_endpoints::{http::HttpEndpoint, logger::Logger};
use tracing_subscriber::{
    layer::SubscriberExt, // Needed to get `with()`
    registry::Registry,
};

use std::{sync::Arc, time::Duration};

pub fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let url = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "http://localhost:8080/logs".to_owned());

    let mut builder = HttpEndpoint::from_url(&url, "POST")
        .unwrap()
        .cache_dir(std::env::temp_dir().join("http-test"))
        .request_timeout(Duration::from_secs(5));
    if json {
        builder = builder.json();
    }
    let endpoint = Arc::new(builder.build().unwrap());
    println!(
        "{} entries left over from last time in {}",
        endpoint.pending(),
        endpoint.cache_path().display()
    );

    let subscriber = Registry::default().with(Logger::new().with_shared_endpoint(endpoint.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);

    trace!("你好, HTTP.");
    debug!("你好, HTTP.");
    info!("你好, HTTP.");
    warn!("你好, HTTP.");
    error!("你好, HTTP.");

    // Uploads run in the background; give them a moment.
    for _ in 0..10 {
        if endpoint.pending() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(500));
        endpoint.drain();
    }
    println!("{} entries still pending", endpoint.pending());
}
