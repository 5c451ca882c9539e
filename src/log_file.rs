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

//! One open log file.
//!
//! A [`LogFile`] owns exactly one file handle, along with the two facts rotation decisions are
//! made on: how many bytes the file holds & when it was last written. Both are tracked in memory
//! (seeded from the filesystem once, at open) so that deciding whether to rotate doesn't cost a
//! `stat` per entry.
//!
//! The handle & the counters live on the file's own [`SerialQueue`]. Writes are queued & return
//! immediately; [`LogFile::status`] is a round-trip through the same queue, so it always reflects
//! every write submitted before it.

use crate::{
    clock::Clock,
    diagnostics,
    error::{Error, Result},
    queue::SerialQueue,
};

use chrono::prelude::*;

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Extended attribute naming the endpoint that created a log file
pub const CREATOR_ATTRIBUTE: &str = "user.tracing-endpoints.creator";

/// How [`LogFile::open`] treats existing content
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Keep what's there & write after it
    Append,
    /// Start from empty
    Truncate,
}

/// A snapshot of a [`LogFile`]'s counters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStatus {
    /// Bytes in the file
    pub size: u64,
    /// When the file was last written, if known
    pub modified: Option<DateTime<Utc>>,
}

struct State {
    path: PathBuf,
    file: File,
    status: FileStatus,
    clock: Arc<dyn Clock>,
}

impl State {
    fn write(&mut self, buf: &[u8]) {
        match self.file.write_all(buf) {
            Ok(()) => {
                self.status.size += buf.len() as u64;
                self.status.modified = Some(self.clock.now());
            }
            Err(err) => tracing::warn!(
                target: diagnostics::TARGET,
                "failed to write {} bytes to {}: {}",
                buf.len(),
                self.path.display(),
                err
            ),
        }
    }
    fn truncate(&mut self) {
        // The handle is opened for append, so after this the next write lands at offset zero.
        match self.file.set_len(0) {
            Ok(()) => {
                self.status.size = 0;
                self.status.modified = Some(self.clock.now());
            }
            Err(err) => tracing::warn!(
                target: diagnostics::TARGET,
                "failed to truncate {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if let Err(err) = self.file.flush() {
            tracing::warn!(
                target: diagnostics::TARGET,
                "failed to flush {} on close: {}",
                self.path.display(),
                err
            );
        }
    }
}

/// An open log file with its own single-writer queue.
pub struct LogFile {
    path: PathBuf,
    queue: SerialQueue<State>,
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile").field("path", &self.path).finish()
    }
}

impl LogFile {
    /// Open (creating if need be) the file at `path`.
    pub fn open(
        path: impl Into<PathBuf>,
        mode: OpenMode,
        clock: Arc<dyn Clock>,
    ) -> Result<LogFile> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| Error::io(&path, err))?;
        let status = match mode {
            OpenMode::Truncate => {
                file.set_len(0).map_err(|err| Error::io(&path, err))?;
                FileStatus {
                    size: 0,
                    modified: Some(clock.now()),
                }
            }
            OpenMode::Append => {
                let meta = file.metadata().map_err(|err| Error::io(&path, err))?;
                FileStatus {
                    size: meta.len(),
                    modified: meta.modified().ok().map(DateTime::<Utc>::from),
                }
            }
        };
        let queue = SerialQueue::new(
            format!("log-file:{}", path.display()),
            State {
                path: path.clone(),
                file,
                status,
                clock,
            },
        )
        .map_err(|err| Error::io(&path, err))?;
        Ok(LogFile { path, queue })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `buf`; returns before the bytes are written.
    pub fn write(&self, buf: Vec<u8>) {
        self.queue.exec(move |state| state.write(&buf));
    }

    /// Empty the file & reset its byte count; returns before that happens.
    pub fn truncate(&self) {
        self.queue.exec(State::truncate);
    }

    /// The file's counters as of every operation submitted so far. `None` means the state
    /// couldn't be determined.
    pub fn status(&self) -> Option<FileStatus> {
        self.queue.exec_sync(|state| state.status)
    }

    /// Wait until everything submitted so far has been handed to the OS.
    pub fn flush(&self) {
        let _ = self.queue.exec_sync(|state| {
            if let Err(err) = state.file.flush() {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "failed to flush {}: {}",
                    state.path.display(),
                    err
                );
            }
        });
    }

    /// Mark the file with an extended attribute; see [`set_tag`].
    pub fn tag(&self, name: &str, value: &str) -> std::io::Result<()> {
        let (name, value) = (name.to_owned(), value.to_owned());
        self.queue
            .exec_sync(move |state| set_tag(&state.path, &name, &value))
            .unwrap_or_else(|| {
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "file closed",
                ))
            })
    }

    /// Flush & release the handle. Waits for the queue to drain.
    pub fn close(self) {
        // Dropping the only queue handle drains the backlog, drops `State` (flushing) & joins.
        drop(self.queue);
    }
}

/// Set the extended attribute `name` on `path` to `value`.
///
/// Only the `user.` namespace is writable by unprivileged processes on Linux; not every
/// filesystem supports extended attributes at all, so callers should treat failure as
/// informational.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn set_tag(path: &Path, name: &str, value: &str) -> std::io::Result<()> {
    let path = crate::byte_utils::c_path(path)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "NUL in path"))?;
    let name = std::ffi::CString::new(name)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    // SAFETY: both strings are NUL-terminated & outlive the call; `value` is read for exactly
    // `value.len()` bytes.
    #[cfg(target_os = "linux")]
    let rc = unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    #[cfg(target_os = "macos")]
    let rc = unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
            0,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn set_tag(_path: &Path, _name: &str, _value: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "extended attributes are not supported on this platform",
    ))
}

/// Read the extended attribute `name` from `path`.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn get_tag(path: &Path, name: &str) -> std::io::Result<String> {
    let path = crate::byte_utils::c_path(path)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "NUL in path"))?;
    let name = std::ffi::CString::new(name)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let mut buf = vec![0u8; 256];
    // SAFETY: both strings are NUL-terminated; `buf` is writable for `buf.len()` bytes.
    #[cfg(target_os = "linux")]
    let rc = unsafe {
        libc::getxattr(
            path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    #[cfg(target_os = "macos")]
    let rc = unsafe {
        libc::getxattr(
            path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            0,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    buf.truncate(rc as usize);
    String::from_utf8(buf).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn get_tag(_path: &Path, _name: &str) -> std::io::Result<String> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "extended attributes are not supported on this platform",
    ))
}

#[cfg(test)]
mod test {

    use super::*;

    use crate::clock::{ManualClock, SystemClock};

    #[test]
    fn counts_bytes_without_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let f = LogFile::open(&path, OpenMode::Append, Arc::new(SystemClock)).unwrap();
        assert_eq!(f.status().unwrap().size, 0);
        f.write(b"hello\n".to_vec());
        f.write(b"world\n".to_vec());
        assert_eq!(f.status().unwrap().size, 12);
        f.close();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\nworld\n");
    }

    #[test]
    fn append_vs_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "old\n").unwrap();

        let f = LogFile::open(&path, OpenMode::Append, Arc::new(SystemClock)).unwrap();
        assert_eq!(f.status().unwrap().size, 4);
        assert!(f.status().unwrap().modified.is_some());
        f.write(b"new\n".to_vec());
        f.close();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");

        let f = LogFile::open(&path, OpenMode::Truncate, Arc::new(SystemClock)).unwrap();
        assert_eq!(f.status().unwrap().size, 0);
        f.write(b"fresh\n".to_vec());
        f.close();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn truncate_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let f = LogFile::open(&path, OpenMode::Append, Arc::new(clock.clone())).unwrap();
        f.write(b"0123456789".to_vec());
        clock.advance(chrono::Duration::hours(1));
        f.truncate();
        let status = f.status().unwrap();
        assert_eq!(status.size, 0);
        assert_eq!(
            status.modified,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap())
        );
        f.write(b"abc".to_vec());
        f.close();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abc");
    }

    #[test]
    fn open_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("a.log");
        assert!(LogFile::open(&path, OpenMode::Append, Arc::new(SystemClock)).is_err());
    }

    #[test]
    fn tagging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let f = LogFile::open(&path, OpenMode::Append, Arc::new(SystemClock)).unwrap();
        // Not every filesystem a test might run on supports user xattrs.
        if f.tag(CREATOR_ATTRIBUTE, "RotatingFileEndpoint 1.0").is_ok() {
            assert_eq!(
                get_tag(&path, CREATOR_ATTRIBUTE).unwrap(),
                "RotatingFileEndpoint 1.0"
            );
        }
    }
}
