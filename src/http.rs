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

//! HTTP(S) delivery.
//!
//! An [`HttpEndpoint`] never talks to the network on the logging thread's behalf. Each rendered
//! entry goes into a [`PersistedCache`] & the endpoint then runs a *drain*: reserve everything
//! available, start one upload per entry, and as each upload resolves either complete the entry
//! (the server answered with one of the configured success statuses) or cancel its reservation so
//! a later drain picks it up again. Drains happen after every write and on a timer, so entries
//! whose uploads failed are retried even when nothing new is being logged.
//!
//! Delivery is at-least-once: an entry leaves the outbox only on success, and the outbox survives
//! restarts.
//!
//! # Examples
//!
//! ```no_run
//! use tracing_endpoints::http::HttpEndpoint;
//!
//! let plain = HttpEndpoint::from_url("https://logs.example.com/ingest", "POST")
//!     .unwrap()
//!     .cache_dir("/var/cache/app")
//!     .build()
//!     .unwrap();
//! // Entries rendered as JSON, kept in their own outbox
//! let json = HttpEndpoint::from_url("https://logs.example.com/ingest.json", "POST")
//!     .unwrap()
//!     .json()
//!     .cache_dir("/var/cache/app")
//!     .build()
//!     .unwrap();
//! ```

use crate::{
    cache::PersistedCache,
    clock::{Clock, SystemClock},
    diagnostics,
    endpoint::Endpoint,
    error::Result,
    file::deserialize_level,
    format::{
        DateFormatter, EntryFormatter, JsonEntryFormatter, Rfc3339DateFormatter,
        TextEntryFormatter,
    },
    scheduler::{ScheduledTask, Scheduler, ThreadScheduler},
    transport::{HttpTransport, Outcome, Request, Transport},
};

use serde::Deserialize;

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    time::Duration,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub const DEFAULT_SUCCESS_CODES: [u16; 4] = [200, 201, 202, 204];
pub const DEFAULT_DRAIN_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_LEEWAY: Duration = Duration::from_secs(5);
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Outbox file name for plaintext endpoints
pub const CACHE_FILE_NAME: &str = "http-endpoint-cache.txt";
/// Outbox file name for JSON endpoints
pub const JSON_CACHE_FILE_NAME: &str = "json-http-endpoint-cache.txt";

fn default_method() -> String {
    "POST".to_owned()
}

fn default_success_codes() -> Vec<u16> {
    DEFAULT_SUCCESS_CODES.to_vec()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_lease_timeout_secs() -> u64 {
    DEFAULT_LEASE_TIMEOUT.as_secs()
}

fn default_drain_period_secs() -> u64 {
    DEFAULT_DRAIN_PERIOD.as_secs()
}

fn default_level() -> tracing::Level {
    tracing::Level::TRACE
}

/// Where outboxes go when no cache directory is given
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("tracing-endpoints")
}

/// Plain option values for an [`HttpEndpoint`], suitable for loading from a host's
/// configuration file:
///
/// ```toml
/// url = "https://logs.example.com/ingest"
/// json = true
/// cache_dir = "/var/cache/app"
/// minimum_level = "info"
///
/// [headers]
/// Authorization = "Bearer 0123"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct HttpOptions {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Render entries as JSON (& keep them in the JSON outbox)
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    #[serde(default = "default_drain_period_secs")]
    pub drain_period_secs: u64,
    #[serde(default = "default_level", deserialize_with = "deserialize_level")]
    pub minimum_level: tracing::Level,
}

/// Configure & construct an [`HttpEndpoint`].
pub struct HttpEndpointBuilder {
    request: Request,
    success: HashSet<u16>,
    json: bool,
    cache_dir: Option<PathBuf>,
    lease_timeout: Duration,
    drain_period: Duration,
    drain_leeway: Duration,
    minimum_level: tracing::Level,
    date_formatter: Box<dyn DateFormatter>,
    entry_formatter: Box<dyn EntryFormatter>,
    requires_newlines: bool,
    transport: Option<Arc<dyn Transport>>,
    scheduler: Box<dyn Scheduler>,
    clock: Arc<dyn Clock>,
}

impl HttpEndpointBuilder {
    fn new(request: Request) -> HttpEndpointBuilder {
        HttpEndpointBuilder {
            request,
            success: DEFAULT_SUCCESS_CODES.into_iter().collect(),
            json: false,
            cache_dir: None,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            drain_period: DEFAULT_DRAIN_PERIOD,
            drain_leeway: DEFAULT_DRAIN_LEEWAY,
            minimum_level: default_level(),
            date_formatter: Box::new(Rfc3339DateFormatter),
            entry_formatter: Box::new(TextEntryFormatter),
            requires_newlines: false,
            transport: None,
            scheduler: Box::new(ThreadScheduler),
            clock: Arc::new(SystemClock),
        }
    }
    /// Render entries as JSON, send them as `application/json` & keep them in their own outbox.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
    /// The statuses that mean "delivered"; anything else is retried.
    pub fn success_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.success = codes.into_iter().collect();
        self
    }
    /// Add a header to every upload.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        self.request = self.request.with_header(name, value)?;
        Ok(self)
    }
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request = self.request.with_timeout(timeout);
        self
    }
    /// The directory holding the outbox file; see [`default_cache_dir`].
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
    /// How long an entry handed to the transport stays reserved without word back.
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }
    pub fn drain_period(mut self, period: Duration, leeway: Duration) -> Self {
        self.drain_period = period;
        self.drain_leeway = leeway;
        self
    }
    pub fn minimum_level(mut self, level: tracing::Level) -> Self {
        self.minimum_level = level;
        self
    }
    pub fn date_formatter(mut self, dates: impl DateFormatter + 'static) -> Self {
        self.date_formatter = Box::new(dates);
        self
    }
    /// Has no effect on JSON endpoints.
    pub fn entry_formatter(mut self, entries: impl EntryFormatter + 'static) -> Self {
        self.entry_formatter = Box::new(entries);
        self
    }
    pub fn requires_newlines(mut self, requires_newlines: bool) -> Self {
        self.requires_newlines = requires_newlines;
        self
    }
    /// Upload through `transport` instead of a default [`HttpTransport`].
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
    /// Construct the endpoint, open (or create) its outbox & start its drain timer.
    ///
    /// Fails only if the network session can't be set up. An outbox that can't be opened is
    /// reported on the diagnostic channel & the endpoint runs without one (entries are kept in
    /// memory only).
    pub fn build(self) -> Result<HttpEndpoint> {
        let (content_type, file_name) = if self.json {
            ("application/json", JSON_CACHE_FILE_NAME)
        } else {
            ("text/plain", CACHE_FILE_NAME)
        };
        let mut request = self.request.with_header("Content-Type", content_type)?;
        if request.timeout().is_none() {
            request = request.with_timeout(DEFAULT_REQUEST_TIMEOUT);
        }
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let dir = self.cache_dir.unwrap_or_else(default_cache_dir);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!(
                target: diagnostics::TARGET,
                "couldn't create {}: {}",
                dir.display(),
                err
            );
        }
        let cache = PersistedCache::open(dir.join(file_name), self.lease_timeout, self.clock)?;

        let shared = Arc::new(Shared {
            cache,
            transport,
            request,
            success: Arc::new(self.success),
        });
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let timer = self.scheduler.schedule_repeating(
            self.drain_period,
            self.drain_leeway,
            Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.drain();
                }
            }),
        );
        let entry_formatter: Box<dyn EntryFormatter> = if self.json {
            Box::new(JsonEntryFormatter)
        } else {
            self.entry_formatter
        };
        Ok(HttpEndpoint {
            timer: Some(timer),
            shared,
            minimum_level: self.minimum_level,
            date_formatter: self.date_formatter,
            entry_formatter,
            requires_newlines: self.requires_newlines,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       struct HttpEndpoint                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Shared {
    cache: PersistedCache,
    transport: Arc<dyn Transport>,
    request: Request,
    success: Arc<HashSet<u16>>,
}

impl Shared {
    fn drain(&self) {
        let reserved = self.cache.reserve();
        if !reserved.is_empty() {
            tracing::trace!(
                target: diagnostics::TARGET,
                "draining {} entries to {}",
                reserved.len(),
                self.request.url()
            );
        }
        let token = reserved.token();
        for (id, blob) in reserved {
            // The completion holds the outbox, not the endpoint: an upload may well outlive the
            // endpoint that started it. Its answer only counts while its lease is still current.
            let cache = self.cache.clone();
            let success = self.success.clone();
            self.transport.send(
                &self.request,
                blob,
                Box::new(move |outcome| match outcome {
                    Outcome::Status(status) if success.contains(&status) => {
                        cache.complete_reserved(token, vec![id])
                    }
                    outcome => {
                        tracing::debug!(
                            target: diagnostics::TARGET,
                            "upload of entry {} failed ({:?}); will retry",
                            id,
                            outcome
                        );
                        cache.cancel_reserved(token, vec![id]);
                    }
                }),
            );
        }
    }
}

/// An endpoint that delivers entries to an HTTP(S) service through a durable outbox.
pub struct HttpEndpoint {
    timer: Option<ScheduledTask>,
    shared: Arc<Shared>,
    minimum_level: tracing::Level,
    date_formatter: Box<dyn DateFormatter>,
    entry_formatter: Box<dyn EntryFormatter>,
    requires_newlines: bool,
}

impl HttpEndpoint {
    pub fn builder(request: Request) -> HttpEndpointBuilder {
        HttpEndpointBuilder::new(request)
    }
    /// Start building an endpoint that sends entries to `url` with `method`.
    pub fn from_url(url: &str, method: &str) -> Result<HttpEndpointBuilder> {
        Ok(HttpEndpointBuilder::new(Request::new(url, method)?))
    }
    pub fn from_options(opts: &HttpOptions) -> Result<HttpEndpoint> {
        let mut builder = HttpEndpoint::from_url(&opts.url, &opts.method)?
            .success_codes(opts.success_codes.iter().copied())
            .request_timeout(Duration::from_secs(opts.request_timeout_secs))
            .lease_timeout(Duration::from_secs(opts.lease_timeout_secs))
            .drain_period(
                Duration::from_secs(opts.drain_period_secs),
                DEFAULT_DRAIN_LEEWAY,
            )
            .minimum_level(opts.minimum_level);
        for (name, value) in &opts.headers {
            builder = builder.header(name, value)?;
        }
        if let Some(dir) = &opts.cache_dir {
            builder = builder.cache_dir(dir);
        }
        if opts.json {
            builder = builder.json();
        }
        builder.build()
    }
    /// Run a drain now, rather than waiting for the timer.
    pub fn drain(&self) {
        self.shared.drain();
    }
    /// Entries not yet delivered (including those with uploads in flight)
    pub fn pending(&self) -> usize {
        self.shared.cache.len()
    }
    pub fn cache_path(&self) -> &Path {
        self.shared.cache.path()
    }
    pub fn request(&self) -> &Request {
        &self.shared.request
    }
}

impl Drop for HttpEndpoint {
    fn drop(&mut self) {
        // Stop the timer before anything else goes away.
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

impl Endpoint for HttpEndpoint {
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
        self.requires_newlines
    }
    fn write(&self, text: &str) {
        let mut blob = text.as_bytes().to_vec();
        if self.requires_newlines {
            blob.push(b'\n');
        }
        self.shared.cache.add(blob);
        self.shared.drain();
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::{
        clock::ManualClock,
        entry::Entry,
        scheduler::ManualScheduler,
        transport::{
            scripted::{ScriptedTransport, Sent},
            Completion,
        },
    };

    use chrono::prelude::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn endpoint(
        dir: &Path,
        transport: ScriptedTransport,
        scheduler: ManualScheduler,
    ) -> HttpEndpoint {
        HttpEndpoint::from_url("http://collector.test/logs", "POST")
            .unwrap()
            .cache_dir(dir)
            .transport(transport)
            .scheduler(scheduler)
            .build()
            .unwrap()
    }

    #[test]
    fn fail_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![Outcome::Status(500)], Outcome::Status(200));
        let ep = endpoint(dir.path(), transport.clone(), ManualScheduler::new());

        // The write's own drain is the first attempt...
        ep.write("hello");
        assert_eq!(ep.pending(), 1);
        // ...& the next one succeeds.
        ep.drain();
        assert_eq!(ep.pending(), 0);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            Sent {
                url: "http://collector.test/logs".to_owned(),
                method: "POST".to_owned(),
                content_type: Some("text/plain".to_owned()),
                body: b"hello".to_vec(),
            }
        );
        assert_eq!(std::fs::read_to_string(ep.cache_path()).unwrap(), "");
    }

    #[test]
    fn timer_retries_without_new_writes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(
            vec![Outcome::Failed("connection refused".to_owned()), Outcome::Status(503)],
            Outcome::Status(204),
        );
        let sched = ManualScheduler::new();
        let ep = endpoint(dir.path(), transport.clone(), sched.clone());
        assert_eq!(sched.active(), 1);

        ep.write("one");
        sched.fire();
        assert_eq!(ep.pending(), 1);
        sched.fire();
        assert_eq!(ep.pending(), 0);
        assert_eq!(transport.sent().len(), 3);

        drop(ep);
        assert_eq!(sched.active(), 0);
    }

    #[test]
    fn only_configured_statuses_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![Outcome::Status(200)], Outcome::Status(299));
        let ep = HttpEndpoint::from_url("http://collector.test/logs", "PUT")
            .unwrap()
            .success_codes([299])
            .cache_dir(dir.path())
            .transport(transport.clone())
            .scheduler(ManualScheduler::new())
            .build()
            .unwrap();
        ep.write("x");
        assert_eq!(ep.pending(), 1);
        ep.drain();
        assert_eq!(ep.pending(), 0);
        assert_eq!(transport.sent()[0].method, "PUT");
    }

    // Accepts uploads & never reports back.
    struct Blackhole(Arc<AtomicUsize>);

    impl Transport for Blackhole {
        fn send(&self, _request: &Request, _body: Vec<u8>, _done: Completion) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn hung_uploads_are_retried_after_the_lease() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let sent = Arc::new(AtomicUsize::new(0));
        let ep = HttpEndpoint::from_url("http://collector.test/logs", "POST")
            .unwrap()
            .cache_dir(dir.path())
            .lease_timeout(Duration::from_secs(60))
            .transport(Blackhole(sent.clone()))
            .scheduler(ManualScheduler::new())
            .clock(clock.clone())
            .build()
            .unwrap();
        ep.write("stuck");
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        ep.drain();
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        clock.advance(chrono::Duration::seconds(61));
        ep.drain();
        assert_eq!(sent.load(Ordering::SeqCst), 2);
        assert_eq!(ep.pending(), 1);
    }

    // Accepts uploads & holds on to their completions until told to answer.
    #[derive(Clone, Default)]
    struct Held(Arc<std::sync::Mutex<Vec<Option<Completion>>>>);

    impl Held {
        fn answer(&self, upload: usize, outcome: Outcome) {
            let done = self.0.lock().unwrap()[upload].take().unwrap();
            done(outcome);
        }
    }

    impl Transport for Held {
        fn send(&self, _request: &Request, _body: Vec<u8>, done: Completion) {
            self.0.lock().unwrap().push(Some(done));
        }
    }

    #[test]
    fn late_answers_from_lapsed_uploads_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let held = Held::default();
        let ep = HttpEndpoint::from_url("http://collector.test/logs", "POST")
            .unwrap()
            .cache_dir(dir.path())
            .lease_timeout(Duration::from_secs(60))
            .transport(held.clone())
            .scheduler(ManualScheduler::new())
            .clock(clock.clone())
            .build()
            .unwrap();

        // Upload 0 hangs past its lease, so upload 1 carries the same entry.
        ep.write("first");
        clock.advance(chrono::Duration::seconds(61));
        ep.drain();
        held.answer(1, Outcome::Status(200));
        assert_eq!(ep.pending(), 0);

        // The outbox emptied, so the next entry reuses the first one's id...
        ep.write("second");
        assert_eq!(ep.pending(), 1);
        // ...& upload 0 finally answering mustn't count as delivering it.
        held.answer(0, Outcome::Status(200));
        assert_eq!(ep.pending(), 1);
        held.answer(2, Outcome::Status(200));
        assert_eq!(ep.pending(), 0);
    }

    #[test]
    fn outbox_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let down = ScriptedTransport::new(vec![], Outcome::Status(502));
        let ep = endpoint(dir.path(), down, ManualScheduler::new());
        ep.write("first");
        ep.write("second");
        assert_eq!(ep.pending(), 2);
        drop(ep);

        let up = ScriptedTransport::new(vec![], Outcome::Status(201));
        let sched = ManualScheduler::new();
        let ep = endpoint(dir.path(), up.clone(), sched.clone());
        assert_eq!(ep.pending(), 2);
        sched.fire();
        assert_eq!(ep.pending(), 0);
        let mut bodies: Vec<Vec<u8>> = up.sent().into_iter().map(|s| s.body).collect();
        bodies.sort();
        assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn json_variant() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![], Outcome::Status(200));
        let plain = endpoint(dir.path(), transport.clone(), ManualScheduler::new());
        let json = HttpEndpoint::from_url("http://collector.test/logs", "POST")
            .unwrap()
            .json()
            .cache_dir(dir.path())
            .transport(transport.clone())
            .scheduler(ManualScheduler::new())
            .build()
            .unwrap();
        assert_eq!(plain.cache_path(), dir.path().join(CACHE_FILE_NAME));
        assert_eq!(json.cache_path(), dir.path().join(JSON_CACHE_FILE_NAME));

        let entry = Entry::new(
            tracing::Level::INFO,
            "hi",
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            "",
        );
        let text = json
            .entry_formatter()
            .format(&entry, json.date_formatter())
            .unwrap();
        json.write(&text);
        let sent = transport.sent();
        assert_eq!(sent[0].content_type.as_deref(), Some("application/json"));
        let v: serde_json::Value = serde_json::from_slice(&sent[0].body).unwrap();
        assert_eq!(v["entries"][0]["message"], "hi");
    }

    #[test]
    fn unusable_cache_dir_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let transport = ScriptedTransport::new(vec![Outcome::Status(500)], Outcome::Status(200));
        let ep = endpoint(&blocker.join("cache"), transport, ManualScheduler::new());
        ep.write("kept in memory");
        assert_eq!(ep.pending(), 1);
        ep.drain();
        assert_eq!(ep.pending(), 0);
    }

    #[test]
    fn options() {
        let opts: HttpOptions = serde_json::from_str(
            r#"{"url": "https://logs.example.com/ingest", "json": true,
                "headers": {"Authorization": "Bearer 0123"}, "minimum_level": "info"}"#,
        )
        .unwrap();
        assert_eq!(opts.method, "POST");
        assert_eq!(opts.success_codes, vec![200, 201, 202, 204]);
        assert_eq!(opts.request_timeout_secs, 30);
        assert_eq!(opts.lease_timeout_secs, 60);
        assert_eq!(opts.drain_period_secs, 30);
        assert_eq!(opts.cache_dir, None);
        assert_eq!(opts.minimum_level, tracing::Level::INFO);
        assert_eq!(opts.headers.get("Authorization").unwrap(), "Bearer 0123");
    }
}
