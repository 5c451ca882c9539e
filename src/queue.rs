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

//! Single-writer execution contexts.
//!
//! A [`SerialQueue`] owns one value on one dedicated thread. Nobody else ever holds a reference to
//! that value: the only way to read or change it is to submit a closure, which the queue's thread
//! runs against the value in submission order. That gives each resource (an open log file, an
//! outbox) mutual exclusion without a lock, and two different resources never contend with one
//! another.
//!
//! Two submission flavors are offered:
//!
//! - [`SerialQueue::exec`]: fire-and-forget; returns as soon as the closure is queued
//! - [`SerialQueue::exec_sync`]: blocks until the closure has run & hands back its result; since
//!   the queue is FIFO, the result reflects every job submitted before it
//!
//! Handles are cheap to clone. When the last one goes away, the thread finishes whatever is still
//! queued, drops the owned value & exits.

use crate::diagnostics;

use std::{
    sync::{mpsc, Arc},
    thread::JoinHandle,
};

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

struct Inner<S> {
    label: String,
    tx: Option<mpsc::Sender<Job<S>>>,
    thread: Option<JoinHandle<()>>,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        // Closing the channel lets the worker fall out of its loop once the backlog is done...
        self.tx.take();
        // and we wait for it, so that (for instance) a log file is flushed & closed by the time
        // its owner is gone. The last handle can be dropped *on* the worker (a job holding a
        // clone of its own queue); joining ourselves would never return, so don't.
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!(target: diagnostics::TARGET, "queue {} panicked", self.label);
            }
        }
    }
}

/// A handle on a single-writer execution context owning a value of type `S`.
pub struct SerialQueue<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SerialQueue<S> {
    fn clone(&self) -> Self {
        SerialQueue {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Send + 'static> SerialQueue<S> {
    /// Spawn a new queue named `label` that takes ownership of `state`.
    pub fn new(label: impl Into<String>, state: S) -> std::io::Result<SerialQueue<S>> {
        let label = label.into();
        let (tx, rx) = mpsc::channel::<Job<S>>();
        let handle = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                let mut state = state;
                while let Ok(job) = rx.recv() {
                    job(&mut state);
                }
            })?;
        Ok(SerialQueue {
            inner: Arc::new(Inner {
                label,
                tx: Some(tx),
                thread: Some(handle),
            }),
        })
    }

    /// The name this queue was given at construction
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Submit `f` to run against the owned value; returns immediately.
    pub fn exec<F>(&self, f: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if let Some(tx) = &self.inner.tx {
            if tx.send(Box::new(f)).is_err() {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "queue {} is gone; job dropped",
                    self.inner.label
                );
            }
        }
    }

    /// Submit `f` to run against the owned value & wait for its result.
    ///
    /// Returns `None` only if the worker has died (a previous job panicked).
    ///
    /// Must not be called from a job running on this same queue.
    pub fn exec_sync<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.exec(move |state| {
            let _ = tx.send(f(state));
        });
        rx.recv().ok()
    }
}
