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

//! Rotation notifications.
//!
//! Each file endpoint owns a [`RotationEvents`] bus & publishes two events per rotation: one just
//! before the switch ([`RotationEvent::WillRotate`]) and one just after
//! ([`RotationEvent::DidRotate`]). By the time a `DidRotate` arrives, the previous file will take
//! no more writes; that makes it a natural trigger for, say, shipping the sealed file somewhere.
//!
//! Notifications are just that: nothing is retried or acknowledged.

use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
};

/// Something that happened to a file endpoint's rotation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RotationEvent {
    /// `source` is about to move from `current` to `next`
    WillRotate {
        source: String,
        current: PathBuf,
        next: PathBuf,
    },
    /// `source` has moved from `previous` to `current`
    DidRotate {
        source: String,
        current: PathBuf,
        previous: PathBuf,
    },
}

type Callback = Arc<dyn Fn(&RotationEvent) + Send + Sync + 'static>;

#[derive(Default)]
struct Subscribers {
    channels: Vec<mpsc::Sender<RotationEvent>>,
    callbacks: Vec<Callback>,
}

/// A publish/subscribe point for [`RotationEvent`]s, owned by one endpoint.
#[derive(Default)]
pub struct RotationEvents {
    subscribers: Mutex<Subscribers>,
}

impl RotationEvents {
    pub fn new() -> RotationEvents {
        RotationEvents::default()
    }

    /// Receive every event published from now on. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::Receiver<RotationEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.channels.push(tx);
        }
        rx
    }

    /// Invoke `f` on the publishing thread for every event published from now on.
    ///
    /// File endpoints publish while holding their own lock. From inside `f`, the publishing
    /// endpoint's `current_path` works as usual, but entries written to it are dropped,
    /// `current_size` yields `None` and `rotate`, `flush` & `reset_current_file` do nothing.
    /// Observers that need more should [`subscribe`](RotationEvents::subscribe) instead.
    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&RotationEvent) + Send + Sync + 'static,
    {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.callbacks.push(Arc::new(f));
        }
    }

    pub fn publish(&self, event: RotationEvent) {
        let callbacks = match self.subscribers.lock() {
            Ok(mut subs) => {
                subs.channels.retain(|tx| tx.send(event.clone()).is_ok());
                subs.callbacks.clone()
            }
            Err(_) => return,
        };
        // Outside the lock, so a callback may itself subscribe.
        for cb in callbacks {
            cb(&event);
        }
    }
}
