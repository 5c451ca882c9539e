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

//! File endpoints.
//!
//! [`FileEndpoint`] is the rotation engine: it keeps exactly one [`LogFile`] current, consults its
//! [`RotationPolicy`] before every write, and when told to, rotates:
//!
//! 1. open the next file, empty
//!
//! 2. tag it (an extended attribute naming the endpoint flavor & crate version)
//!
//! 3. publish [`RotationEvent::WillRotate`]
//!
//! 4. make the new file current
//!
//! 5. publish [`RotationEvent::DidRotate`]
//!
//! 6. close the old file
//!
//! If step 1 fails, nothing changes: the endpoint keeps writing to the file it has & tries again
//! on the next write.
//!
//! Three flavors are provided as type aliases: [`RotatingFileEndpoint`] (a ring of files bounded
//! by size), [`SingleFileEndpoint`] (one file, never rotated) & [`DatedFileEndpoint`] (a file per
//! UTC day).
//!
//! # Examples
//!
//! ```no_run
//! use tracing_endpoints::file::RotatingFileEndpoint;
//!
//! // Five files of at most 1MiB each: /var/log/app/0_app.log ... /var/log/app/4_app.log
//! let endpoint = RotatingFileEndpoint::builder("/var/log/app/app.log")
//!     .number_of_files(5)
//!     .max_file_size_kib(Some(1024))
//!     .build()
//!     .unwrap();
//! ```

use crate::{
    clock::{Clock, SystemClock},
    diagnostics,
    endpoint::Endpoint,
    error::{Error, Result},
    events::{RotationEvent, RotationEvents},
    format::{DateFormatter, EntryFormatter, Rfc3339DateFormatter, TextEntryFormatter},
    log_file::{self, LogFile, OpenMode},
    rotation::{self, DatedPolicy, RotationPolicy, SinglePolicy, SizePolicy, Slot},
};

use backtrace::Backtrace;
use chrono::prelude::*;
use serde::{Deserialize, Deserializer};

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub const DEFAULT_NUMBER_OF_FILES: usize = 5;
pub const DEFAULT_MAX_FILE_SIZE_KIB: u64 = 1024;

fn default_number_of_files() -> usize {
    DEFAULT_NUMBER_OF_FILES
}

fn default_max_file_size_kib() -> Option<u64> {
    Some(DEFAULT_MAX_FILE_SIZE_KIB)
}

fn default_level() -> tracing::Level {
    tracing::Level::TRACE
}

pub(crate) fn deserialize_level<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<tracing::Level, D::Error> {
    let s = String::deserialize(d)?;
    tracing::Level::from_str(&s).map_err(serde::de::Error::custom)
}

/// Plain option values for a [`RotatingFileEndpoint`], suitable for loading from a host's
/// configuration file:
///
/// ```toml
/// path = "/var/log/app/app.log"
/// number_of_files = 3
/// max_file_size_kib = 512
/// minimum_level = "info"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FileOptions {
    pub path: PathBuf,
    #[serde(default = "default_number_of_files")]
    pub number_of_files: usize,
    /// `null` disables size-based rotation
    #[serde(default = "default_max_file_size_kib")]
    pub max_file_size_kib: Option<u64>,
    #[serde(default = "default_level", deserialize_with = "deserialize_level")]
    pub minimum_level: tracing::Level,
}

impl FileOptions {
    pub fn new(path: impl Into<PathBuf>) -> FileOptions {
        FileOptions {
            path: path.into(),
            number_of_files: DEFAULT_NUMBER_OF_FILES,
            max_file_size_kib: Some(DEFAULT_MAX_FILE_SIZE_KIB),
            minimum_level: default_level(),
        }
    }
}

/// Configure & construct a [`FileEndpoint`].
pub struct FileEndpointBuilder<P: RotationPolicy> {
    path: PathBuf,
    policy: P,
    minimum_level: tracing::Level,
    date_formatter: Box<dyn DateFormatter>,
    entry_formatter: Box<dyn EntryFormatter>,
    requires_newlines: bool,
    clock: Arc<dyn Clock>,
}

impl<P: RotationPolicy> FileEndpointBuilder<P> {
    fn new(path: PathBuf, policy: P) -> FileEndpointBuilder<P> {
        FileEndpointBuilder {
            path,
            policy,
            minimum_level: default_level(),
            date_formatter: Box::new(Rfc3339DateFormatter),
            entry_formatter: Box::new(TextEntryFormatter),
            requires_newlines: true,
            clock: Arc::new(SystemClock),
        }
    }
    pub fn minimum_level(mut self, level: tracing::Level) -> Self {
        self.minimum_level = level;
        self
    }
    pub fn date_formatter(mut self, dates: impl DateFormatter + 'static) -> Self {
        self.date_formatter = Box::new(dates);
        self
    }
    pub fn entry_formatter(mut self, entries: impl EntryFormatter + 'static) -> Self {
        self.entry_formatter = Box::new(entries);
        self
    }
    pub fn requires_newlines(mut self, requires_newlines: bool) -> Self {
        self.requires_newlines = requires_newlines;
        self
    }
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
    /// Construct the endpoint.
    ///
    /// Creates the parent directory if need be, works out which file was current when the
    /// endpoint last ran (see [`rotation::recover`]) and opens it for append. Fails if the path
    /// is unusable or the file can't be opened.
    pub fn build(self) -> Result<FileEndpoint<P>> {
        let base = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| Error::BadPath {
                path: self.path.clone(),
                back: Backtrace::new(),
            })?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;

        let today = self.clock.now().date_naive();
        let slot = rotation::recover(&self.policy, &dir, &base, today);
        let path = dir.join(self.policy.file_name(&base, &slot));
        let existed = path.exists();
        let file = LogFile::open(&path, OpenMode::Append, self.clock.clone())?;

        let endpoint = FileEndpoint {
            source: format!("{}({})", self.policy.kind(), self.path.display()),
            dir,
            base,
            policy: self.policy,
            active: Mutex::new(Active { file, slot }),
            current: Mutex::new(path),
            events: RotationEvents::new(),
            minimum_level: self.minimum_level,
            date_formatter: self.date_formatter,
            entry_formatter: self.entry_formatter,
            requires_newlines: self.requires_newlines,
            clock: self.clock,
        };
        if !existed {
            endpoint.tag(&endpoint.lock().file);
        }
        Ok(endpoint)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       struct FileEndpoint                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Active {
    file: LogFile,
    slot: Slot,
}

thread_local! {
    // Addresses of the file endpoints this thread is currently writing to.
    static WRITING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks an endpoint as being written to by this thread for as long as it lives.
struct Reentry(usize);

impl Reentry {
    fn is_held(addr: usize) -> bool {
        WRITING.with(|w| w.borrow().contains(&addr))
    }
    fn enter(addr: usize) -> Option<Reentry> {
        WRITING.with(|w| {
            let mut w = w.borrow_mut();
            if w.contains(&addr) {
                None
            } else {
                w.push(addr);
                Some(Reentry(addr))
            }
        })
    }
}

impl Drop for Reentry {
    fn drop(&mut self) {
        WRITING.with(|w| w.borrow_mut().retain(|&a| a != self.0));
    }
}

/// A log file endpoint that rotates according to policy `P`.
pub struct FileEndpoint<P: RotationPolicy> {
    source: String,
    dir: PathBuf,
    base: String,
    policy: P,
    active: Mutex<Active>,
    // Mirrors `active.file`'s path, so it can be read without `active` (i.e. from a callback).
    current: Mutex<PathBuf>,
    events: RotationEvents,
    minimum_level: tracing::Level,
    date_formatter: Box<dyn DateFormatter>,
    entry_formatter: Box<dyn EntryFormatter>,
    requires_newlines: bool,
    clock: Arc<dyn Clock>,
}

/// A ring of files, rotated by size
pub type RotatingFileEndpoint = FileEndpoint<SizePolicy>;
/// One append-only file
pub type SingleFileEndpoint = FileEndpoint<SinglePolicy>;
/// One file per UTC day
pub type DatedFileEndpoint = FileEndpoint<DatedPolicy>;

impl FileEndpoint<SizePolicy> {
    /// Start building a ring of [`DEFAULT_NUMBER_OF_FILES`] files of at most
    /// [`DEFAULT_MAX_FILE_SIZE_KIB`] KiB each, named after `path`.
    pub fn builder(path: impl Into<PathBuf>) -> FileEndpointBuilder<SizePolicy> {
        FileEndpointBuilder::new(
            path.into(),
            SizePolicy::new(
                DEFAULT_NUMBER_OF_FILES,
                Some(DEFAULT_MAX_FILE_SIZE_KIB * 1024),
            ),
        )
    }
    /// Build straight from [`FileOptions`].
    pub fn from_options(opts: &FileOptions) -> Result<RotatingFileEndpoint> {
        RotatingFileEndpoint::builder(&opts.path)
            .number_of_files(opts.number_of_files)
            .max_file_size_kib(opts.max_file_size_kib)
            .minimum_level(opts.minimum_level)
            .build()
    }
}

impl FileEndpointBuilder<SizePolicy> {
    pub fn number_of_files(mut self, n: usize) -> Self {
        self.policy = SizePolicy::new(n, self.policy.max_file_size());
        self
    }
    /// `None` disables size-based rotation
    pub fn max_file_size_kib(mut self, kib: Option<u64>) -> Self {
        self.policy = SizePolicy::new(
            self.policy.number_of_files(),
            kib.map(|kib| kib.saturating_mul(1024)),
        );
        self
    }
}

impl FileEndpoint<SinglePolicy> {
    pub fn builder(path: impl Into<PathBuf>) -> FileEndpointBuilder<SinglePolicy> {
        FileEndpointBuilder::new(path.into(), SinglePolicy)
    }
}

impl FileEndpoint<DatedPolicy> {
    /// Start building a file-per-day endpoint keeping `retain` days' files (`None`: keep all).
    pub fn builder(
        path: impl Into<PathBuf>,
        retain: Option<usize>,
    ) -> FileEndpointBuilder<DatedPolicy> {
        FileEndpointBuilder::new(path.into(), DatedPolicy::new(retain))
    }
}

impl<P: RotationPolicy> FileEndpoint<P> {
    /// Where entries are being written right now
    pub fn current_path(&self) -> PathBuf {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
    /// Bytes in the current file, as of every write submitted so far
    ///
    /// `None` if the size can't be determined, or if called from one of this endpoint's own
    /// rotation callbacks.
    pub fn current_size(&self) -> Option<u64> {
        if self.in_callback() {
            return None;
        }
        self.lock().file.status().map(|status| status.size)
    }
    /// The rotation notifications for this endpoint
    pub fn events(&self) -> &RotationEvents {
        &self.events
    }
    pub fn policy(&self) -> &P {
        &self.policy
    }
    /// Rotate now, whatever the policy says (a no-op for policies with nowhere to go).
    pub fn rotate(&self) {
        let _reentry = match Reentry::enter(self as *const Self as usize) {
            Some(guard) => guard,
            None => return,
        };
        let today = self.clock.now().date_naive();
        let mut active = self.lock();
        self.rotate_locked(&mut active, today);
    }
    /// Empty the current file & start counting its size from zero.
    pub fn reset_current_file(&self) {
        if self.in_callback() {
            tracing::warn!(
                target: diagnostics::TARGET,
                "{}: can't reset the current file from inside one of its own rotation callbacks",
                self.source
            );
            return;
        }
        self.lock().file.truncate();
    }
    /// Wait until every write submitted so far has reached the OS.
    ///
    /// A no-op when called from one of this endpoint's own rotation callbacks; the rotation
    /// itself flushes the outgoing file.
    pub fn flush(&self) {
        if self.in_callback() {
            return;
        }
        self.lock().file.flush();
    }

    // Whether this thread is inside `write` or `rotate` on this endpoint, & so holds `active`.
    fn in_callback(&self) -> bool {
        Reentry::is_held(self as *const Self as usize)
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        // A panic mid-write leaves `Active` whole (it's swapped in one assignment), so a
        // poisoned lock is still usable.
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tag(&self, file: &LogFile) {
        let value = format!("{} {}", self.policy.kind(), env!("CARGO_PKG_VERSION"));
        if let Err(err) = file.tag(log_file::CREATOR_ATTRIBUTE, &value) {
            tracing::debug!(
                target: diagnostics::TARGET,
                "couldn't tag {}: {}",
                file.path().display(),
                err
            );
        }
    }

    fn rotate_locked(&self, active: &mut Active, today: NaiveDate) {
        let next = match self.policy.next(&active.slot, today) {
            Some(next) => next,
            None => return,
        };
        let next_path = self.dir.join(self.policy.file_name(&self.base, &next));
        // Anything still queued for the current file lands before we go on; this matters when
        // the "next" file is the current one (a ring of one).
        active.file.flush();
        let file = match LogFile::open(&next_path, OpenMode::Truncate, self.clock.clone()) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "{}: couldn't rotate to {} ({:?}); continuing with {}",
                    self.source,
                    next_path.display(),
                    err,
                    active.file.path().display()
                );
                return;
            }
        };
        self.tag(&file);

        self.events.publish(RotationEvent::WillRotate {
            source: self.source.clone(),
            current: active.file.path().to_path_buf(),
            next: next_path.clone(),
        });
        let previous = std::mem::replace(&mut active.file, file);
        active.slot = next;
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next_path.clone();
        self.events.publish(RotationEvent::DidRotate {
            source: self.source.clone(),
            current: next_path,
            previous: previous.path().to_path_buf(),
        });
        tracing::debug!(
            target: diagnostics::TARGET,
            "{}: rotated from {} to {}",
            self.source,
            previous.path().display(),
            active.file.path().display()
        );
        previous.close();
        self.retire(active.file.path(), today);
    }

    fn retire(&self, current: &Path, today: NaiveDate) {
        if !self.policy.retires_files() {
            return;
        }
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "couldn't list {}: {}",
                    self.dir.display(),
                    err
                );
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let retired = entry
                .file_name()
                .to_str()
                .map(|name| self.policy.is_retired(&self.base, name, today))
                .unwrap_or(false);
            if retired && path != current {
                if let Err(err) = std::fs::remove_file(&path) {
                    tracing::warn!(
                        target: diagnostics::TARGET,
                        "couldn't remove {}: {}",
                        path.display(),
                        err
                    );
                }
            }
        }
    }
}

impl<P: RotationPolicy> Endpoint for FileEndpoint<P> {
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
        // A rotation callback that logs back into this endpoint would otherwise deadlock on
        // `active`.
        let _reentry = match Reentry::enter(self as *const Self as usize) {
            Some(guard) => guard,
            None => {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "{}: dropping an entry written from inside one of its own rotation callbacks",
                    self.source
                );
                return;
            }
        };
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        if self.requires_newlines {
            buf.push(b'\n');
        }
        let today = self.clock.now().date_naive();
        let mut active = self.lock();
        let status = active.file.status();
        if self
            .policy
            .should_rotate(status.as_ref(), buf.len() as u64, today)
        {
            self.rotate_locked(&mut active, today);
        }
        active.file.write(buf);
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::clock::ManualClock;

    use std::sync::mpsc::TryRecvError;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn three_half_size_entries_rotate_once() {
        let dir = tempfile::tempdir().unwrap();
        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .number_of_files(2)
            .max_file_size_kib(Some(1))
            .build()
            .unwrap();
        let rx = ep.events().subscribe();
        let first = ep.current_path();
        assert_eq!(first, dir.path().join("0_app.log"));

        // 511 characters + newline: half the 1KiB limit
        let a = "a".repeat(511);
        let b = "b".repeat(511);
        let c = "c".repeat(511);
        ep.write(&a);
        ep.write(&b);
        ep.write(&c);
        ep.flush();

        let second = dir.path().join("1_app.log");
        assert_eq!(ep.current_path(), second);
        assert_eq!(
            rx.try_recv().unwrap(),
            RotationEvent::WillRotate {
                source: ep.source.clone(),
                current: first.clone(),
                next: second.clone(),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RotationEvent::DidRotate {
                source: ep.source.clone(),
                current: second.clone(),
                previous: first.clone(),
            }
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(read(&first), format!("{}\n{}\n", a, b));
        assert_eq!(read(&second), format!("{}\n", c));
    }

    #[test]
    fn no_file_exceeds_limit_by_more_than_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .number_of_files(3)
            .max_file_size_kib(Some(1))
            .build()
            .unwrap();
        let rx = ep.events().subscribe();
        for i in 0..200 {
            ep.write(&format!("entry number {:05} {}", i, "x".repeat(i % 37)));
            assert!(ep.current_size().unwrap() <= 1024);
        }
        ep.flush();
        assert!(rx.try_iter().count() >= 2);
        for i in 0..3 {
            let len = std::fs::metadata(dir.path().join(format!("{}_app.log", i)))
                .unwrap()
                .len();
            assert!(len <= 1024);
        }
    }

    #[test]
    fn rotating_n_times_comes_back_around() {
        let dir = tempfile::tempdir().unwrap();
        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .number_of_files(5)
            .build()
            .unwrap();
        let start = ep.current_path();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            ep.rotate();
            seen.insert(ep.current_path());
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(ep.current_path(), start);
    }

    #[test]
    fn rotation_truncates_the_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .number_of_files(2)
            .build()
            .unwrap();
        ep.write("one");
        ep.rotate();
        ep.write("two");
        ep.rotate();
        ep.write("three");
        ep.flush();
        assert_eq!(read(&dir.path().join("0_app.log")), "three\n");
        assert_eq!(read(&dir.path().join("1_app.log")), "two\n");
    }

    #[test]
    fn cold_start_resumes_newest() {
        let dir = tempfile::tempdir().unwrap();
        let now = std::time::SystemTime::now();
        for (i, age) in [(0, 30), (1, 10), (2, 20)] {
            let f = std::fs::File::create(dir.path().join(format!("{}_app.log", i))).unwrap();
            f.set_modified(now - std::time::Duration::from_secs(age))
                .unwrap();
        }
        std::fs::write(dir.path().join("1_app.log"), "kept\n").unwrap();
        let f = std::fs::File::options()
            .write(true)
            .open(dir.path().join("1_app.log"))
            .unwrap();
        f.set_modified(now - std::time::Duration::from_secs(10))
            .unwrap();
        drop(f);

        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .number_of_files(3)
            .build()
            .unwrap();
        assert_eq!(ep.current_path(), dir.path().join("1_app.log"));
        // Appends, doesn't truncate, on resumption.
        assert_eq!(ep.current_size(), Some(5));
        ep.write("more");
        ep.flush();
        assert_eq!(read(&dir.path().join("1_app.log")), "kept\nmore\n");
    }

    #[test]
    fn reset_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .build()
            .unwrap();
        ep.write("doomed");
        ep.reset_current_file();
        assert_eq!(ep.current_size(), Some(0));
        ep.write("fresh");
        ep.flush();
        assert_eq!(read(&ep.current_path()), "fresh\n");
    }

    #[test]
    fn without_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SingleFileEndpoint::builder(dir.path().join("app.log"))
            .requires_newlines(false)
            .build()
            .unwrap();
        ep.write("a");
        ep.write("b");
        ep.flush();
        assert_eq!(read(&dir.path().join("app.log")), "ab");
    }

    #[test]
    fn single_file_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SingleFileEndpoint::builder(dir.path().join("app.log"))
            .build()
            .unwrap();
        let rx = ep.events().subscribe();
        let path = ep.current_path();
        assert_eq!(path, dir.path().join("app.log"));
        ep.write("x");
        ep.rotate();
        ep.rotate();
        ep.write("y");
        ep.flush();
        assert_eq!(ep.current_path(), path);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(read(&path), "x\ny\n");
    }

    #[test]
    fn dated_rotates_on_day_change_only() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap());
        let ep = DatedFileEndpoint::builder(dir.path().join("app.log"), Some(2))
            .clock(clock.clone())
            .build()
            .unwrap();
        let day1 = dir.path().join("2024-03-01_app.log");
        assert_eq!(ep.current_path(), day1);
        ep.write("first");
        ep.rotate();
        assert_eq!(ep.current_path(), day1);

        clock.advance(chrono::Duration::minutes(59));
        ep.write("still the first");
        assert_eq!(ep.current_path(), day1);

        clock.advance(chrono::Duration::minutes(2));
        ep.write("second");
        let day2 = dir.path().join("2024-03-02_app.log");
        assert_eq!(ep.current_path(), day2);

        clock.advance(chrono::Duration::days(1));
        ep.rotate();
        let day3 = dir.path().join("2024-03-03_app.log");
        assert_eq!(ep.current_path(), day3);
        ep.write("third");
        ep.flush();

        // Only two days are retained.
        assert!(!day1.exists());
        assert_eq!(read(&day2), "second\n");
        assert_eq!(read(&day3), "third\n");
    }

    #[test]
    fn failed_rotation_keeps_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let ep = RotatingFileEndpoint::builder(dir.path().join("app.log"))
            .number_of_files(2)
            .build()
            .unwrap();
        // Make the next slot unopenable: a directory where the file should be.
        std::fs::create_dir(dir.path().join("1_app.log")).unwrap();
        ep.write("before");
        ep.rotate();
        ep.write("after");
        ep.flush();
        assert_eq!(ep.current_path(), dir.path().join("0_app.log"));
        assert_eq!(read(&dir.path().join("0_app.log")), "before\nafter\n");
    }

    #[test]
    fn construction_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RotatingFileEndpoint::builder("/").build(),
            Err(Error::BadPath { .. })
        ));
        // A regular file where the directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        assert!(RotatingFileEndpoint::builder(blocker.join("app.log"))
            .build()
            .is_err());
    }

    #[test]
    fn options() {
        let opts: FileOptions = serde_json::from_str(r#"{"path": "/tmp/x/app.log"}"#).unwrap();
        assert_eq!(opts, FileOptions::new("/tmp/x/app.log"));
        let opts: FileOptions = serde_json::from_str(
            r#"{"path": "app.log", "number_of_files": 2, "max_file_size_kib": null,
                "minimum_level": "warn"}"#,
        )
        .unwrap();
        assert_eq!(opts.number_of_files, 2);
        assert_eq!(opts.max_file_size_kib, None);
        assert_eq!(opts.minimum_level, tracing::Level::WARN);

        let dir = tempfile::tempdir().unwrap();
        let mut opts = FileOptions::new(dir.path().join("app.log"));
        opts.number_of_files = 2;
        let ep = RotatingFileEndpoint::from_options(&opts).unwrap();
        assert_eq!(ep.policy().number_of_files(), 2);
        assert_eq!(ep.policy().max_file_size(), Some(1024 * 1024));
    }

    #[test]
    fn callbacks_may_use_their_own_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let ep = Arc::new(
            RotatingFileEndpoint::builder(dir.path().join("app.log"))
                .number_of_files(3)
                .build()
                .unwrap(),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&ep);
        let log = seen.clone();
        ep.events().on_event(move |event| {
            if let Some(ep) = weak.upgrade() {
                ep.flush();
                ep.reset_current_file();
                ep.rotate();
                ep.write("from a callback");
                let will = matches!(event, RotationEvent::WillRotate { .. });
                log.lock().unwrap().push((will, ep.current_path(), ep.current_size()));
            }
        });

        ep.write("before");
        ep.rotate();
        ep.write("after");
        ep.flush();

        let first = dir.path().join("0_app.log");
        let second = dir.path().join("1_app.log");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(true, first.clone(), None), (false, second.clone(), None)]
        );
        assert_eq!(ep.current_path(), second);
        assert_eq!(ep.current_size(), Some(6));
        assert_eq!(read(&first), "before\n");
        assert_eq!(read(&second), "after\n");
    }

    #[test]
    fn concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let ep = Arc::new(
            RotatingFileEndpoint::builder(dir.path().join("app.log"))
                .number_of_files(50)
                .max_file_size_kib(Some(4))
                .build()
                .unwrap(),
        );
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let ep = ep.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        ep.write(&format!("thread {} line {:03} {}", t, i, "-".repeat(40)));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        ep.flush();
        let mut lines = 0;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let text = read(&entry.unwrap().path());
            assert!(text.len() <= 4096);
            for line in text.lines() {
                assert!(line.starts_with("thread ") && line.ends_with(&"-".repeat(40)));
                lines += 1;
            }
        }
        assert_eq!(lines, 400);
    }
}
