/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Rate limiting primitives: debounce, throttle and a per-frame batch queue.
//!
//! All three must be used from inside a tokio runtime; timers are tokio timers
//! so tests can drive them with paused time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// ~60 Hz, the cadence a browser animation frame would give.
pub const DEFAULT_FRAME: Duration = Duration::from_millis(16);

/// Runs `f` once `delay` has passed without another call. Only the last
/// argument survives.
pub struct Debouncer<T> {
    delay: Duration,
    f: Arc<dyn Fn(T) + Send + Sync>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            delay,
            f: Arc::new(f),
            pending: Mutex::new(None),
        }
    }

    pub fn call(&self, arg: T) {
        let f = self.f.clone();
        let delay = self.delay;
        let mut g = self.pending.lock().unwrap();
        if let Some(prev) = g.take() {
            prev.abort();
        }
        *g = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f(arg);
        }));
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.pending.lock().unwrap().take() {
            prev.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Ok(mut g) = self.pending.lock() {
            if let Some(h) = g.take() {
                h.abort();
            }
        }
    }
}

/// Runs `f` on the first call of every `interval` window and drops the rest.
pub struct Throttle<T> {
    interval: Duration,
    f: Arc<dyn Fn(T) + Send + Sync>,
    last: Mutex<Option<Instant>>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            interval,
            f: Arc::new(f),
            last: Mutex::new(None),
        }
    }

    /// Returns whether `f` ran.
    pub fn call(&self, arg: T) -> bool {
        let now = Instant::now();
        {
            let mut g = self.last.lock().unwrap();
            if let Some(last) = *g {
                if now.saturating_duration_since(last) < self.interval {
                    return false;
                }
            }
            *g = Some(now);
        }
        (self.f)(arg);
        true
    }
}

type FrameTask = Box<dyn FnOnce() + Send>;

struct FrameInner {
    frame: Duration,
    queue: Mutex<Vec<FrameTask>>,
    scheduled: AtomicBool,
    frames: AtomicU64,
}

impl FrameInner {
    fn run_frame(&self) -> usize {
        // Clear the queue before running anything: work scheduled by a task
        // lands on the next frame.
        let tasks = {
            let mut q = self.queue.lock().unwrap();
            self.scheduled.store(false, Ordering::SeqCst);
            std::mem::take(&mut *q)
        };
        if tasks.is_empty() {
            return 0;
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        let n = tasks.len();
        for task in tasks {
            task();
        }
        n
    }
}

/// Coalesces view mutations into one drain per frame, in enqueue order.
#[derive(Clone)]
pub struct FrameBatcher {
    inner: Arc<FrameInner>,
}

impl FrameBatcher {
    pub fn new(frame: Duration) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                frame,
                queue: Mutex::new(Vec::new()),
                scheduled: AtomicBool::new(false),
                frames: AtomicU64::new(0),
            }),
        }
    }

    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        let need_frame = {
            let mut q = self.inner.queue.lock().unwrap();
            q.push(Box::new(task));
            !self.inner.scheduled.swap(true, Ordering::SeqCst)
        };
        if need_frame {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(inner.frame).await;
                inner.run_frame();
            });
        }
    }

    /// Drains the queue now, for hosts that own a real frame clock.
    pub fn flush(&self) -> usize {
        self.inner.run_frame()
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn frames_run(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }
}

impl Default for FrameBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME)
    }
}
