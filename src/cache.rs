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

//! A restart-safe outbox.
//!
//! [`PersistedCache`] holds byte blobs awaiting delivery, keyed by increasing numeric ids &
//! mirrored to a flat file, one line per blob:
//!
//! ```text
//! <decimal id> <standard base64 of the blob>\n
//! ```
//!
//! Delivery is at-least-once. [`PersistedCache::reserve`] hands out every blob not already out on
//! loan & leases each for the cache's timeout; the borrower then either [`complete`]s the ids
//! (they're gone for good) or [`cancel`]s them (they're available again at once). A borrower that
//! does neither simply lets the lease lapse: expired leases aren't swept, they're just ignored by
//! the next `reserve`.
//!
//! Ids are reused once the cache empties, so a borrower that may report back late should use
//! [`complete_reserved`] & [`cancel_reserved`]: they only touch ids still leased under the
//! [`Reservation`] the borrower was handed.
//!
//! New blobs are appended to the file; every completion rewrites it from scratch.
//!
//! [`complete`]: PersistedCache::complete
//! [`cancel`]: PersistedCache::cancel
//! [`complete_reserved`]: PersistedCache::complete_reserved
//! [`cancel_reserved`]: PersistedCache::cancel_reserved

use crate::{
    clock::Clock,
    diagnostics,
    error::{Error, Result},
    queue::SerialQueue,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{BufMut, BytesMut};
use chrono::prelude::*;

use std::{
    collections::{BTreeMap, HashMap},
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

fn put_line(buf: &mut BytesMut, id: u64, blob: &[u8]) {
    buf.put_slice(id.to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(STANDARD.encode(blob).as_bytes());
    buf.put_u8(b'\n');
}

fn parse_line(line: &[u8]) -> Option<(u64, Vec<u8>)> {
    let (id, blob) = std::str::from_utf8(line).ok()?.split_once(' ')?;
    Some((id.parse().ok()?, STANDARD.decode(blob).ok()?))
}

/// Blobs handed out by one [`PersistedCache::reserve`], leased under a common token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reservation {
    token: u64,
    blobs: BTreeMap<u64, Vec<u8>>,
}

impl Reservation {
    pub fn token(&self) -> u64 {
        self.token
    }
    pub fn len(&self) -> usize {
        self.blobs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
    /// The reserved ids, in ascending order
    pub fn ids(&self) -> Vec<u64> {
        self.blobs.keys().copied().collect()
    }
    pub fn get(&self, id: u64) -> Option<&[u8]> {
        self.blobs.get(&id).map(Vec::as_slice)
    }
}

impl IntoIterator for Reservation {
    type Item = (u64, Vec<u8>);
    type IntoIter = std::collections::btree_map::IntoIter<u64, Vec<u8>>;
    fn into_iter(self) -> Self::IntoIter {
        self.blobs.into_iter()
    }
}

#[derive(Clone, Copy, Debug)]
struct Lease {
    until: DateTime<Utc>,
    token: u64,
}

struct State {
    path: PathBuf,
    // `None` if the cache file couldn't be opened; we carry on in memory.
    file: Option<File>,
    items: BTreeMap<u64, Vec<u8>>,
    leases: HashMap<u64, Lease>,
    current_max_id: u64,
    last_token: u64,
    lease: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl State {
    fn persist(&mut self, buf: &[u8], truncate: bool) {
        if let Some(file) = self.file.as_mut() {
            let res = if truncate {
                // The handle appends, so writing after `set_len(0)` starts at offset zero.
                file.set_len(0).and_then(|_| file.write_all(buf))
            } else {
                file.write_all(buf)
            };
            if let Err(err) = res {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "failed to persist the outbox to {}: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }
    fn rewrite(&mut self) {
        let mut buf = BytesMut::new();
        for (id, blob) in &self.items {
            put_line(&mut buf, *id, blob);
        }
        self.persist(&buf, true);
    }
    fn add(&mut self, blob: Vec<u8>) {
        self.current_max_id += 1;
        let id = self.current_max_id;
        let mut buf = BytesMut::with_capacity(blob.len() * 4 / 3 + 24);
        put_line(&mut buf, id, &blob);
        self.items.insert(id, blob);
        self.persist(&buf, false);
    }
    fn reserve(&mut self) -> Reservation {
        let now = self.clock.now();
        self.last_token += 1;
        let lease = Lease {
            until: now + self.lease,
            token: self.last_token,
        };
        let mut blobs = BTreeMap::new();
        for (id, blob) in &self.items {
            let available = self.leases.get(id).map_or(true, |held| held.until <= now);
            if available {
                self.leases.insert(*id, lease);
                blobs.insert(*id, blob.clone());
            }
        }
        Reservation {
            token: lease.token,
            blobs,
        }
    }
    // The subset of `ids` currently leased under `token`
    fn held(&self, token: u64, ids: &[u64]) -> Vec<u64> {
        ids.iter()
            .copied()
            .filter(|id| self.leases.get(id).map_or(false, |held| held.token == token))
            .collect()
    }
    fn complete(&mut self, ids: &[u64]) {
        for id in ids {
            self.items.remove(id);
            self.leases.remove(id);
        }
        if self.items.is_empty() {
            self.current_max_id = 0;
        }
        self.rewrite();
    }
    fn complete_reserved(&mut self, token: u64, ids: &[u64]) {
        let held = self.held(token, ids);
        if held.len() < ids.len() {
            tracing::debug!(
                target: diagnostics::TARGET,
                "ignoring {} stale completion(s) from reservation {}",
                ids.len() - held.len(),
                token
            );
        }
        if !held.is_empty() {
            self.complete(&held);
        }
    }
    fn cancel(&mut self, ids: &[u64]) {
        for id in ids {
            self.leases.remove(id);
        }
    }
    fn cancel_reserved(&mut self, token: u64, ids: &[u64]) {
        let held = self.held(token, ids);
        self.cancel(&held);
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

/// Read the cache file at `path` (creating it if need be) & replay it into memory.
fn load(path: &Path) -> std::io::Result<(File, BTreeMap<u64, Vec<u8>>, bool)> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    let mut items = BTreeMap::new();
    // A torn last line would swallow the next append; any damage means we rewrite.
    let mut damaged = !raw.is_empty() && !raw.ends_with(b"\n");
    let body = raw.strip_suffix(b"\n").unwrap_or(&raw);
    let lines = body.split(|b| *b == b'\n').filter(|_| !body.is_empty());
    for (n, line) in lines.enumerate() {
        match parse_line(line) {
            Some((id, blob)) => {
                items.insert(id, blob);
            }
            None => {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "{}:{}: skipping a corrupt outbox line",
                    path.display(),
                    n + 1
                );
                damaged = true;
            }
        }
    }
    Ok((file, items, damaged))
}

/// A disk-backed outbox of blobs awaiting delivery.
///
/// Clones share the same cache. All state lives on the cache's own [`SerialQueue`]: [`add`],
/// [`complete`] & [`cancel`] are queued & return immediately, while [`reserve`] (and the
/// introspection methods) wait their turn & so see every operation submitted before them.
///
/// [`add`]: PersistedCache::add
/// [`complete`]: PersistedCache::complete
/// [`cancel`]: PersistedCache::cancel
/// [`reserve`]: PersistedCache::reserve
#[derive(Clone)]
pub struct PersistedCache {
    path: PathBuf,
    queue: SerialQueue<State>,
}

impl std::fmt::Debug for PersistedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedCache")
            .field("path", &self.path)
            .finish()
    }
}

impl PersistedCache {
    /// Open the cache backed by `path`, leasing reserved blobs for `timeout`.
    ///
    /// A missing file is created; corrupt lines are skipped. If the file can't be opened at all,
    /// the cache still works but holds its contents in memory only.
    pub fn open(
        path: impl Into<PathBuf>,
        timeout: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<PersistedCache> {
        let path = path.into();
        let (file, items, damaged) = match load(&path) {
            Ok((file, items, damaged)) => (Some(file), items, damaged),
            Err(err) => {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "couldn't open the outbox at {} ({}); pending entries will not survive a \
                     restart",
                    path.display(),
                    err
                );
                (None, BTreeMap::new(), false)
            }
        };
        let current_max_id = items.keys().next_back().copied().unwrap_or(0);
        let mut state = State {
            path: path.clone(),
            file,
            items,
            leases: HashMap::new(),
            current_max_id,
            last_token: 0,
            // Out of range means "effectively forever".
            lease: chrono::Duration::from_std(timeout)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100)),
            clock,
        };
        if damaged {
            state.rewrite();
        }
        let queue = SerialQueue::new(format!("outbox:{}", path.display()), state)
            .map_err(|err| Error::io(&path, err))?;
        Ok(PersistedCache { path, queue })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add `blob` to the outbox.
    pub fn add(&self, blob: Vec<u8>) {
        self.queue.exec(move |state| state.add(blob));
    }

    /// Lease & return every blob not currently leased.
    ///
    /// There's no upper bound on how many blobs one call hands out.
    pub fn reserve(&self) -> Reservation {
        self.queue.exec_sync(State::reserve).unwrap_or_default()
    }

    /// Remove `ids` for good.
    pub fn complete(&self, ids: Vec<u64>) {
        self.queue.exec(move |state| state.complete(&ids));
    }

    /// Remove those of `ids` still leased under reservation `token`; the rest are left alone.
    pub fn complete_reserved(&self, token: u64, ids: Vec<u64>) {
        self.queue.exec(move |state| state.complete_reserved(token, &ids));
    }

    /// Release the leases on `ids`, making them available to the next [`reserve`].
    ///
    /// [`reserve`]: PersistedCache::reserve
    pub fn cancel(&self, ids: Vec<u64>) {
        self.queue.exec(move |state| state.cancel(&ids));
    }

    /// Release those of `ids` still leased under reservation `token`.
    pub fn cancel_reserved(&self, token: u64, ids: Vec<u64>) {
        self.queue.exec(move |state| state.cancel_reserved(token, &ids));
    }

    /// The number of blobs in the outbox, leased or not
    pub fn len(&self) -> usize {
        self.queue
            .exec_sync(|state| state.items.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every blob in the outbox, leased or not, without touching any lease
    pub fn snapshot(&self) -> BTreeMap<u64, Vec<u8>> {
        self.queue
            .exec_sync(|state| state.items.clone())
            .unwrap_or_default()
    }

    /// The largest id handed out since the cache was last empty
    pub fn current_max_id(&self) -> u64 {
        self.queue
            .exec_sync(|state| state.current_max_id)
            .unwrap_or_default()
    }
}
