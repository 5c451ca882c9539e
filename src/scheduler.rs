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

//! Recurring timers.
//!
//! Each [`HttpEndpoint`](crate::http::HttpEndpoint) drains its outbox on a timer. Rather than
//! reaching for some process-wide timer facility, the endpoint is handed a [`Scheduler`] at
//! construction: [`ThreadScheduler`] in production, [`ManualScheduler`] in tests (where the test
//! decides when a "tick" happens).

use crate::diagnostics;

use std::{
    sync::{mpsc, Arc, Mutex},
    time::{Duration, Instant},
};

/// The callback a [`Scheduler`] invokes on every tick
pub type Tick = Arc<dyn Fn() + Send + Sync + 'static>;

/// A scheduled, recurring task. Dropping it cancels the task.
pub struct ScheduledTask {
    cancel: Option<Box<dyn FnOnce() + Send + Sync + 'static>>,
}

impl ScheduledTask {
    pub fn new<F: FnOnce() + Send + Sync + 'static>(cancel: F) -> ScheduledTask {
        ScheduledTask {
            cancel: Some(Box::new(cancel)),
        }
    }
    /// Stop the task now; equivalent to dropping it.
    pub fn cancel(mut self) {
        self.run_cancel();
    }
    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

/// Something that can run a closure every so often.
pub trait Scheduler: Send + Sync {
    /// Invoke `tick` every `period`. Implementations may deliver a tick up to `leeway` late, and
    /// may coalesce ticks that were missed entirely into one.
    fn schedule_repeating(&self, period: Duration, leeway: Duration, tick: Tick) -> ScheduledTask;
}

/// A [`Scheduler`] that gives each task its own thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule_repeating(&self, period: Duration, leeway: Duration, tick: Tick) -> ScheduledTask {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("tracing-endpoints-timer".to_owned())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            tick();
                            deadline += period;
                            // If the tick (or the host) kept us busy past the next deadline plus
                            // the leeway, collapse the missed ticks into the one just delivered.
                            let now = Instant::now();
                            if now > deadline + leeway {
                                deadline = now + period;
                            }
                        }
                        // Either an explicit stop, or the task handle is gone
                        _ => break,
                    }
                }
            });
        match spawned {
            Ok(handle) => ScheduledTask::new(move || {
                drop(stop_tx);
                if handle.thread().id() != std::thread::current().id() {
                    let _ = handle.join();
                }
            }),
            Err(err) => {
                tracing::warn!(
                    target: diagnostics::TARGET,
                    "couldn't start a timer thread ({}); periodic ticks are disabled",
                    err
                );
                ScheduledTask::new(|| ())
            }
        }
    }
}

/// A [`Scheduler`] whose ticks are delivered by calling [`ManualScheduler::fire`].
#[derive(Clone, Default)]
pub struct ManualScheduler {
    tasks: Arc<Mutex<Vec<(u64, Tick)>>>,
    next_id: Arc<Mutex<u64>>,
}

impl ManualScheduler {
    pub fn new() -> ManualScheduler {
        ManualScheduler::default()
    }
    /// Deliver one tick to every live task.
    pub fn fire(&self) {
        // Don't hold the lock while ticking; a tick may well schedule or cancel.
        let ticks: Vec<Tick> = self
            .tasks
            .lock()
            .map(|tasks| tasks.iter().map(|(_, t)| t.clone()).collect())
            .unwrap_or_default();
        for tick in ticks {
            tick();
        }
    }
    /// Number of live (not yet cancelled) tasks
    pub fn active(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        _period: Duration,
        _leeway: Duration,
        tick: Tick,
    ) -> ScheduledTask {
        let id = match self.next_id.lock() {
            Ok(mut next) => {
                *next += 1;
                *next
            }
            Err(_) => 0,
        };
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push((id, tick));
        }
        let tasks = self.tasks.clone();
        ScheduledTask::new(move || {
            if let Ok(mut tasks) = tasks.lock() {
                tasks.retain(|(i, _)| *i != id);
            }
        })
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_ticks_until_cancelled() {
        let sched = ManualScheduler::new();
        let n = Arc::new(AtomicUsize::new(0));
        let n2 = n.clone();
        let task = sched.schedule_repeating(
            Duration::from_secs(30),
            Duration::from_secs(5),
            Arc::new(move || {
                n2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        sched.fire();
        sched.fire();
        assert_eq!(n.load(Ordering::SeqCst), 2);
        assert_eq!(sched.active(), 1);
        drop(task);
        assert_eq!(sched.active(), 0);
        sched.fire();
        assert_eq!(n.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn thread_scheduler_ticks_and_stops() {
        let n = Arc::new(AtomicUsize::new(0));
        let n2 = n.clone();
        let task = ThreadScheduler.schedule_repeating(
            Duration::from_millis(10),
            Duration::from_millis(5),
            Arc::new(move || {
                n2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(200));
        task.cancel();
        let seen = n.load(Ordering::SeqCst);
        assert!(seen >= 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(n.load(Ordering::SeqCst), seen);
    }
}
