//! Write-buffering cache controller.
//!
//! The [`CacheController`] is the save hook every context reports to. It
//! collects dirty contexts and decides, per [`CacheMode`], when to hand
//! them to the backend.
//!
//! # Modes
//!
//! | mode | flushes |
//! |---|---|
//! | `Immediate` | on every save |
//! | `Manual` | only on an explicit [`flush`](CacheController::flush) |
//! | `Timer` | on a save arriving more than `timeout` after the last flush |
//! | `OnShutdown` | once, when the controller is closed |
//!
//! `Timer` has no background thread: a quiet engine never flushes until
//! the next save or an explicit flush.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tether_types::EntityId;

use crate::backend::{Backend, Persisted};
use crate::context::{Context, SaveHook};
use crate::error::{CoreError, CoreResult};

/// When buffered writes reach the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    Immediate,
    Manual,
    Timer,
    OnShutdown,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Immediate => "immediate",
            Self::Manual => "manual",
            Self::Timer => "timer",
            Self::OnShutdown => "on_shutdown",
        };
        f.write_str(name)
    }
}

/// Millisecond time source for timer decisions.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time since the Unix epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

struct CacheState {
    mode: CacheMode,
    timeout: Duration,
    last_flush_ms: u64,
    pending: BTreeMap<EntityId, Context>,
    shutdown_armed: bool,
    closed: bool,
}

/// Batches dirty contexts and flushes them to a [`Backend`].
pub struct CacheController {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    /// Serializes flushes. Never taken while `state` is held.
    flush_lock: Mutex<()>,
}

impl CacheController {
    pub fn new(backend: Arc<dyn Backend>, mode: CacheMode, timeout: Duration) -> Self {
        Self::with_clock(backend, mode, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn Backend>,
        mode: CacheMode,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_flush_ms = clock.now_ms();
        Self {
            backend,
            clock,
            state: Mutex::new(CacheState {
                mode,
                timeout,
                last_flush_ms,
                pending: BTreeMap::new(),
                shutdown_armed: mode == CacheMode::OnShutdown,
                closed: false,
            }),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn mode(&self) -> CacheMode {
        self.state.lock().expect("cache lock poisoned").mode
    }

    pub fn timeout(&self) -> Duration {
        self.state.lock().expect("cache lock poisoned").timeout
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").pending.len()
    }

    pub fn is_shutdown_armed(&self) -> bool {
        self.state.lock().expect("cache lock poisoned").shutdown_armed
    }

    /// Switch modes. Entering `OnShutdown` arms the shutdown flush;
    /// leaving it disarms it. Pending contexts stay pending.
    pub fn change_mode(&self, mode: CacheMode) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let old = state.mode;
        state.mode = mode;
        if !state.closed {
            state.shutdown_armed = mode == CacheMode::OnShutdown;
        }
        info!(from = %old, to = %mode, "cache mode changed");
    }

    /// Change the `Timer` mode timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        self.state.lock().expect("cache lock poisoned").timeout = timeout;
        debug!(timeout_ms = timeout.as_millis() as u64, "cache timeout changed");
    }

    /// Write every pending context and commit.
    ///
    /// Returns how many pending contexts were written. With nothing pending
    /// this only restarts the timer. If a write fails, the failed context
    /// and every context not yet written go back to the pending set still
    /// dirty; contexts already written are committed.
    pub fn flush(&self) -> CoreResult<usize> {
        let _flushing = self.flush_lock.lock().expect("flush lock poisoned");
        let batch: Vec<Context> = {
            let mut state = self.state.lock().expect("cache lock poisoned");
            if state.pending.is_empty() {
                state.last_flush_ms = self.clock.now_ms();
                return Ok(0);
            }
            std::mem::take(&mut state.pending).into_values().collect()
        };

        let mut written: Persisted = Vec::with_capacity(batch.len());
        let mut count = 0usize;
        let mut batch = batch.into_iter();
        let mut failure = None;
        for ctx in batch.by_ref() {
            match self.backend.set(&ctx) {
                Ok(persisted) => {
                    written.extend(persisted);
                    count += 1;
                }
                Err(e) => {
                    failure = Some((ctx, e));
                    break;
                }
            }
        }

        if let Some((failed, error)) = failure {
            warn!(entity = %failed.id(), error = %error, "flush failed, requeueing");
            self.requeue(std::iter::once(failed).chain(batch));
            if let Err(commit_error) = self.backend.commit() {
                warn!(error = %commit_error, "commit after failed flush also failed");
                self.restore(written);
            }
            return Err(error);
        }

        if let Err(error) = self.backend.commit() {
            warn!(error = %error, "commit failed, requeueing");
            self.restore(written);
            return Err(error);
        }

        let mut state = self.state.lock().expect("cache lock poisoned");
        state.last_flush_ms = self.clock.now_ms();
        info!(count, remaining = state.pending.len(), "flushed");
        Ok(count)
    }

    /// Put contexts back in the pending set. Entries saved during the
    /// flush already hold the same context and are kept.
    fn requeue(&self, contexts: impl IntoIterator<Item = Context>) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        for ctx in contexts {
            state.pending.entry(ctx.id()).or_insert(ctx);
        }
    }

    /// Undo the synchronization of written-but-uncommitted contexts,
    /// nested aggregates included.
    fn restore(&self, written: Persisted) {
        let mut contexts = Vec::with_capacity(written.len());
        for (ctx, dirty) in written {
            ctx.restore_dirty(dirty);
            contexts.push(ctx);
        }
        self.requeue(contexts);
    }

    /// Flush once if the shutdown hook is armed, then refuse further saves.
    ///
    /// Safe to call more than once; only the first call can flush.
    pub fn close(&self) -> CoreResult<usize> {
        let (armed, pending) = {
            let mut state = self.state.lock().expect("cache lock poisoned");
            if state.closed {
                return Ok(0);
            }
            (std::mem::replace(&mut state.shutdown_armed, false), state.pending.len())
        };

        let result = if armed {
            self.flush()
        } else {
            if pending > 0 {
                warn!(pending, "closing with unflushed changes");
            }
            Ok(0)
        };
        self.state.lock().expect("cache lock poisoned").closed = true;
        result
    }
}

impl SaveHook for CacheController {
    fn save(&self, ctx: &Context) -> CoreResult<()> {
        let should_flush = {
            let mut state = self.state.lock().expect("cache lock poisoned");
            if state.closed {
                return Err(CoreError::Shutdown);
            }
            state
                .pending
                .entry(ctx.id())
                .or_insert_with(|| ctx.clone());
            match state.mode {
                CacheMode::Immediate => true,
                CacheMode::Timer => {
                    let elapsed = self.clock.now_ms().saturating_sub(state.last_flush_ms);
                    u128::from(elapsed) > state.timeout.as_millis()
                }
                CacheMode::Manual | CacheMode::OnShutdown => false,
            }
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("cache lock poisoned");
        f.debug_struct("CacheController")
            .field("mode", &state.mode)
            .field("timeout", &state.timeout)
            .field("pending", &state.pending.len())
            .field("shutdown_armed", &state.shutdown_armed)
            .field("closed", &state.closed)
            .finish()
    }
}
