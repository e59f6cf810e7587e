// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The bounded worker-pool dispatcher (spec.md C9, §4.8): a wait queue
//! with per-connection admission timeouts feeding a pool of Handlers
//! capped at `max-routines`.

use super::connection::ServConn;
use super::handler::Handler;
use crate::storage::Engine;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_SHORT: Duration = Duration::from_millis(50);
const BACKOFF_LONG: Duration = Duration::from_millis(500);
const BACKOFF_ESCALATE_AFTER: u32 = 100;

/// Bounded FIFO of pending connections awaiting a Handler, capacity
/// `max_routines * 10` (spec.md §4.8).
struct WaitQueue {
    capacity: usize,
    entries: Mutex<VecDeque<ServConn>>,
}

impl WaitQueue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        })
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Push a connection, spawning its 10 s admission timer. Returns
    /// `false` (and leaves the conn for the caller to close) if the
    /// queue is saturated — explicit load shedding (spec.md §4.8).
    fn push(self: &Arc<Self>, conn: ServConn) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return false;
        }
        let seq = conn.seq;
        let cancelled = conn.admission_cancelled.clone();
        entries.push_back(conn);
        drop(entries);

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ADMISSION_TIMEOUT).await;
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            if queue.remove_if_present(seq) {
                tracing::info!(seq, "connection timed out in wait queue");
            }
        });
        true
    }

    fn remove_if_present(&self, seq: u64) -> bool {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|c| c.seq == seq) {
            entries.remove(pos);
            true
        } else {
            false
        }
    }

    fn pop(&self) -> Option<ServConn> {
        self.entries.lock().pop_front()
    }
}

/// FIFO of idle Handlers, bounded by `max_routines` members total.
struct ReadyHandlers {
    max_routines: usize,
    pool: Mutex<Vec<Arc<Handler>>>,
    ready: Mutex<VecDeque<Arc<Handler>>>,
}

impl ReadyHandlers {
    fn new(max_routines: usize) -> Self {
        Self {
            max_routines,
            pool: Mutex::new(Vec::new()),
            ready: Mutex::new(VecDeque::new()),
        }
    }

    fn push_ready(&self, handler: Arc<Handler>) {
        self.ready.lock().push_back(handler);
    }

    /// Pop an idle Handler, or create a new one if the pool has room
    /// (spec.md §9: index assigned as the pool's current length before
    /// append, not `count − 1`).
    fn take_or_spawn(&self) -> Option<Arc<Handler>> {
        if let Some(h) = self.ready.lock().pop_front() {
            return Some(h);
        }
        let mut pool = self.pool.lock();
        if pool.len() >= self.max_routines {
            return None;
        }
        let handler = Arc::new(Handler::new(pool.len()));
        pool.push(handler.clone());
        Some(handler)
    }
}

/// Accepts [`ServConn`]s, pairs them with pooled [`Handler`]s, and runs
/// the admission/backoff loop described in spec.md §4.8.
pub struct Dispatcher {
    wait_queue: Arc<WaitQueue>,
    ready: Arc<ReadyHandlers>,
    ready_notify: Arc<Notify>,
    seq_counter: AtomicU64,
    engine: Arc<Engine>,
    min_expiration: i64,
    quit_tx: mpsc::Sender<()>,
    quit_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Dispatcher {
    pub fn new(max_routines: usize, engine: Arc<Engine>, min_expiration: i64) -> Arc<Self> {
        let (quit_tx, quit_rx) = mpsc::channel(1);
        Arc::new(Self {
            wait_queue: WaitQueue::new(max_routines * 10),
            ready: Arc::new(ReadyHandlers::new(max_routines)),
            ready_notify: Arc::new(Notify::new()),
            seq_counter: AtomicU64::new(0),
            engine,
            min_expiration,
            quit_tx,
            quit_rx: Mutex::new(Some(quit_rx)),
        })
    }

    pub fn next_seq(&self) -> u64 {
        self.seq_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// `Handle(conn)`: enqueue or shed (spec.md §4.8).
    pub fn handle(&self, conn: ServConn) {
        if !self.wait_queue.push(conn) {
            tracing::warn!("wait queue saturated, connection shed");
        }
    }

    pub async fn stop(&self) {
        let _ = self.quit_tx.send(()).await;
    }

    /// The dispatcher's single main loop (spec.md §4.8).
    pub async fn run(self: Arc<Self>) {
        let mut quit_rx = self
            .quit_rx
            .lock()
            .take()
            .expect("run() called more than once");
        let mut no_progress_rounds: u32 = 0;

        loop {
            tokio::select! {
                _ = quit_rx.recv() => {
                    tracing::info!("dispatcher received quit signal");
                    return;
                }
                _ = self.ready_notify.notified() => {}
                _ = tokio::time::sleep(Self::backoff(no_progress_rounds)) => {}
            }

            let mut progressed = false;
            while self.wait_queue.len() > 0 {
                match self.handle_next() {
                    true => progressed = true,
                    false => break,
                }
            }

            no_progress_rounds = if progressed { 0 } else { no_progress_rounds + 1 };
        }
    }

    fn backoff(no_progress_rounds: u32) -> Duration {
        if no_progress_rounds >= BACKOFF_ESCALATE_AFTER {
            BACKOFF_LONG
        } else {
            BACKOFF_SHORT
        }
    }

    /// One step: pair a ready Handler with a pending connection and
    /// spawn its processing (spec.md §4.8 `handle_next`).
    fn handle_next(&self) -> bool {
        let handler = match self.ready.take_or_spawn() {
            Some(h) => h,
            None => return false, // all handlers busy
        };
        let conn = match self.wait_queue.pop() {
            Some(c) => c,
            None => {
                self.ready.push_ready(handler);
                return false; // no conn waiting
            }
        };

        let engine = self.engine.clone();
        let min_expiration = self.min_expiration;
        let ready = self.ready.clone();
        let notify = self.ready_notify.clone();

        tokio::spawn(async move {
            let seq = conn.seq;
            let join = tokio::spawn({
                let handler = handler.clone();
                async move {
                    handler.process(conn, engine, min_expiration).await;
                }
            });
            if join.await.is_err() {
                tracing::error!(seq, handler = handler.id, "handler panicked; recovering to ready");
            }
            ready.push_ready(handler);
            notify.notify_one();
        });
        true
    }
}
