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

//! Write a few hundred entries through a small ring of rotating files.
//!
//! Usage: `rotating-test [DIRECTORY]` (default: `rotating-test` under the system temp directory)

use tracing::{debug, error, info, trace, warn};
use tracing_endpoints::{
    endpoint::{ConsoleEndpoint, Stream},
    events::RotationEvent,
    file::RotatingFileEndpoint,
    logger::Logger,
};
use tracing_subscriber::{
    layer::SubscriberExt, // Needed to get `with()`
    registry::Registry,
};

use std::sync::Arc;

pub fn main() {
    let dir = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("rotating-test"));

    // Three files of at most 4KiB each...
    let files = Arc::new(
        RotatingFileEndpoint::builder(dir.join("rotating-test.log"))
            .number_of_files(3)
            .max_file_size_kib(Some(4))
            .build()
            .unwrap(),
    );
    files.events().on_event(|event| match event {
        RotationEvent::WillRotate { current, next, .. } => {
            eprintln!("about to rotate {} => {}", current.display(), next.display())
        }
        RotationEvent::DidRotate { previous, .. } => {
            eprintln!("{} is sealed", previous.display())
        }
    });
    // plus warnings & errors on stderr.
    let subscriber = Registry::default().with(
        Logger::new()
            .with_shared_endpoint(files.clone())
            .with_endpoint(ConsoleEndpoint::new(Stream::Stderr, tracing::Level::WARN)),
    );
    let _guard = tracing::subscriber::set_default(subscriber);

    for i in 0..100 {
        trace!(i, "Hello, 世界!");
        debug!(i, "Hello, 世界!");
        info!(i, "Hello, 世界!");
        if i % 25 == 0 {
            warn!(i, "Hello, 世界!");
            error!(i, "Hello, 世界!");
        }
    }
    files.flush();
    println!("now writing to {}", files.current_path().display());
}
