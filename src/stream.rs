//! Stream engine for continuous bulk IN capture.
//!
//! [`StreamEngine`] keeps every buffer of a [`TransferPool`] in flight,
//! decodes each completion, hands the payload to the consumer, and resubmits
//! the same buffer. [`StreamControl`] stops a running engine from another
//! thread.
//!
//! # Session Phases
//!
//! ```text
//! Init -> SubmitInitial -> Streaming -> Draining -> Cleanup -> Done
//!              |                           ^
//!              +---- submit failure -------+
//! ```
//!
//! - **Init**: validate the configuration and allocate the pool.
//! - **SubmitInitial**: submit every buffer.
//! - **Streaming**: completion -> strip headers -> `Data` callback -> resubmit.
//!   `Periodical` callbacks fire on a fixed interval.
//! - **Draining**: cancel everything in flight and wait for each buffer to come
//!   back. No resubmissions and no `Data` or `Periodical` callbacks happen here.
//! - **Cleanup**: one `Cleanup` callback, then the pool is released.
//!
//! # Callback Contract
//!
//! The consumer runs on the thread driving [`StreamEngine::run`], inside the
//! completion path, so it must not block for long. Returning
//! [`CallbackResult::Stop`] is a request: transfers already queued are
//! cancelled and drained before `run` returns. A panicking callback is caught
//! and treated as a stop request.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{Completion, RawBuffer, Rejected, TransferBackend};
use crate::connection::SessionToken;
use crate::error::{Error, Result};
use crate::pool::TransferPool;
use crate::progress::{ProgressInfo, ProgressTracker};
use crate::types::{CallbackResult, RunExit, StreamConfig, StreamEvent, StreamStats};

// =============================================================================
// Stream Control
// =============================================================================

/// Thread-safe handle for stopping a running stream.
///
/// The engine checks the flag between completions, so a stop takes effect
/// within one periodic interval even when no data is arriving.
#[derive(Clone, Debug, Default)]
pub struct StreamControl {
    stop_requested: Arc<AtomicBool>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the stream to stop; `run()` returns `RunExit::Stopped`.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Check if a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Stream Engine
// =============================================================================

/// Session phase, see the module documentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    SubmitInitial,
    Streaming,
    Draining,
    Cleanup,
    Done,
}

enum Termination {
    Exit(RunExit),
    Failed(Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verdict {
    Continue,
    Stop,
    Panicked,
}

impl Verdict {
    fn exit(self) -> RunExit {
        match self {
            Verdict::Panicked => RunExit::CallbackPanicked,
            Verdict::Continue | Verdict::Stop => RunExit::CallbackEnded,
        }
    }
}

/// Drives a transfer pool through submit, complete, decode, callback, resubmit.
pub struct StreamEngine<T: TransferBackend> {
    backend: T,
    config: StreamConfig,
    control: StreamControl,
    stats: StreamStats,
    phase: Phase,
    /// Keeps the owning connection claimed while the engine exists.
    _token: Option<SessionToken>,
}

impl<T: TransferBackend> StreamEngine<T> {
    /// Create an engine over a transport.
    pub fn new(backend: T, config: StreamConfig) -> Self {
        Self {
            backend,
            config,
            control: StreamControl::new(),
            stats: StreamStats::default(),
            phase: Phase::Init,
            _token: None,
        }
    }

    pub(crate) fn with_token(mut self, token: SessionToken) -> Self {
        self._token = Some(token);
        self
    }

    /// Returns a thread-safe control handle.
    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Counters from the current or most recent session.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    /// Consume the engine, returning the transport.
    pub fn into_backend(self) -> T {
        self.backend
    }

    fn set_phase(&mut self, phase: Phase) {
        log::debug!("stream phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        if phase == Phase::Done {
            // The stop request belonged to this session.
            self.control.stop_requested.store(false, Ordering::SeqCst);
        }
    }

    /// Run one streaming session to completion.
    ///
    /// Blocks until the callback returns [`CallbackResult::Stop`], a stop is
    /// requested through [`StreamControl`], or a transfer fails. The callback
    /// receives `Data` for every non-empty decoded transfer, `Periodical` once
    /// per `periodic_interval`, and `Cleanup` exactly once at the end.
    ///
    /// A stop requested before `run` applies to that run; once the session
    /// ends the request is cleared and the engine can run again.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` / `ResourceExhausted`: before anything is submitted;
    ///   no callbacks are made.
    /// - `SubmitFailed`, `Transfer`, `Framing`: the session was drained and
    ///   `Cleanup` delivered.
    /// - `DrainTimeout`: cancelled transfers never came back.
    pub fn run<F>(&mut self, mut callback: F) -> Result<RunExit>
    where
        F: FnMut(StreamEvent<'_>, &ProgressInfo) -> CallbackResult,
    {
        self.stats = StreamStats::default();
        self.set_phase(Phase::Init);
        if let Err(e) = self.config.validate(self.backend.max_transfer_size()) {
            self.set_phase(Phase::Done);
            return Err(e);
        }

        let depth = self.config.num_transfers;
        let transfer_size = self.config.transfer_size();
        let backend = &mut self.backend;
        let mut pool = match TransferPool::allocate(depth, transfer_size, |len| backend.allocate(len)) {
            Ok(pool) => pool,
            Err(e) => {
                self.set_phase(Phase::Done);
                return Err(e);
            }
        };
        log::info!(
            "starting stream: {} transfers of {} bytes ({} packets)",
            depth,
            transfer_size,
            self.config.packets_per_transfer
        );

        let mut progress = ProgressTracker::new();
        let termination = match self.submit_initial(&mut pool) {
            Some(termination) => termination,
            None => self.stream(&mut pool, &mut progress, &mut callback),
        };

        let drained = self.drain(&mut pool);

        self.set_phase(Phase::Cleanup);
        if invoke(&mut callback, StreamEvent::Cleanup, progress.info()) == Verdict::Panicked {
            log::error!("stream callback panicked during cleanup");
        }
        let released = match drained {
            Ok(()) => pool.destroy().map(drop),
            // Outstanding buffers stay with the transport; free ones drop here.
            Err(e) => Err(e),
        };
        self.set_phase(Phase::Done);

        log::info!(
            "stream finished: {} transfers, {} payload bytes",
            self.stats.transfers_completed,
            self.stats.payload_bytes
        );

        match termination {
            Termination::Failed(e) => Err(e),
            Termination::Exit(exit) => released.map(|()| exit),
        }
    }

    fn submit_initial(&mut self, pool: &mut TransferPool<T::Buffer>) -> Option<Termination> {
        self.set_phase(Phase::SubmitInitial);
        while pool.free_len() > 0 {
            let (slot, buffer) = match pool.acquire_free() {
                Ok(entry) => entry,
                Err(e) => return Some(Termination::Failed(e)),
            };
            if let Err(Rejected { buffer, error }) = self.backend.submit(slot, buffer) {
                log::warn!("initial submission of slot {} failed: {}", slot, error);
                return Some(retire(
                    pool,
                    slot,
                    buffer,
                    Termination::Failed(Error::SubmitFailed(Box::new(error))),
                ));
            }
        }
        None
    }

    fn stream<F>(
        &mut self,
        pool: &mut TransferPool<T::Buffer>,
        progress: &mut ProgressTracker,
        callback: &mut F,
    ) -> Termination
    where
        F: FnMut(StreamEvent<'_>, &ProgressInfo) -> CallbackResult,
    {
        self.set_phase(Phase::Streaming);
        let interval = self.config.periodic_interval;
        let mut next_tick = Instant::now() + interval;

        loop {
            if self.control.is_stop_requested() {
                log::debug!("stop requested via control handle");
                return Termination::Exit(RunExit::Stopped);
            }

            let now = Instant::now();
            if now >= next_tick {
                progress.tick_at(now);
                self.stats.periodic_callbacks += 1;
                let verdict = invoke(callback, StreamEvent::Periodical, progress.info());
                if verdict != Verdict::Continue {
                    return Termination::Exit(verdict.exit());
                }
                next_tick = now + interval;
            }

            let timeout = next_tick.saturating_duration_since(Instant::now());
            if let Some(completion) = self.backend.wait_completion(timeout) {
                if let Some(termination) = self.on_completion(completion, pool, progress, callback) {
                    return termination;
                }
            }
        }
    }

    fn on_completion<F>(
        &mut self,
        completion: Completion<T::Buffer>,
        pool: &mut TransferPool<T::Buffer>,
        progress: &mut ProgressTracker,
        callback: &mut F,
    ) -> Option<Termination>
    where
        F: FnMut(StreamEvent<'_>, &ProgressInfo) -> CallbackResult,
    {
        let Completion {
            slot,
            mut buffer,
            actual_len,
            status,
        } = completion;

        if let Err(e) = pool.complete(slot) {
            return Some(Termination::Failed(e));
        }

        if let Err(failure) = status {
            log::warn!("transfer in slot {} failed: {}", slot, failure);
            return Some(retire(
                pool,
                slot,
                buffer,
                Termination::Failed(Error::Transfer(failure)),
            ));
        }

        let layout = self.config.layout;
        let bytes = buffer.bytes_mut();
        if actual_len > bytes.len() {
            return Some(retire(
                pool,
                slot,
                buffer,
                Termination::Failed(Error::ProtocolViolation(
                    "completion longer than its buffer",
                )),
            ));
        }

        let raw = &mut bytes[..actual_len];
        let status = layout.last_status(raw);
        let payload_len = match layout.strip_in_place(raw) {
            Ok(n) => n,
            Err(e) => {
                log::error!("framing error in slot {}: {}", slot, e);
                return Some(retire(pool, slot, buffer, Termination::Failed(e)));
            }
        };

        progress.on_bytes(actual_len);
        self.stats.transfers_completed += 1;
        self.stats.raw_bytes += actual_len as u64;
        if status.is_some() {
            self.stats.last_status = status;
        }

        if payload_len > 0 {
            self.stats.data_callbacks += 1;
            self.stats.payload_bytes += payload_len as u64;
            let event = StreamEvent::Data {
                payload: &raw[..payload_len],
                status,
            };
            let verdict = invoke(callback, event, progress.info());
            if verdict != Verdict::Continue {
                return Some(retire(pool, slot, buffer, Termination::Exit(verdict.exit())));
            }
        }

        match self.backend.submit(slot, buffer) {
            Ok(()) => None,
            Err(Rejected { buffer, error }) => {
                log::warn!("resubmission of slot {} failed: {}", slot, error);
                Some(retire(
                    pool,
                    slot,
                    buffer,
                    Termination::Failed(Error::SubmitFailed(Box::new(error))),
                ))
            }
        }
    }

    fn drain(&mut self, pool: &mut TransferPool<T::Buffer>) -> Result<()> {
        self.set_phase(Phase::Draining);
        if pool.in_flight() == 0 {
            return Ok(());
        }

        log::debug!("cancelling {} in-flight transfers", pool.in_flight());
        self.backend.cancel_all();

        let deadline = Instant::now() + self.config.drain_timeout;
        while pool.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::error!(
                    "{} transfers did not return after cancellation",
                    pool.in_flight()
                );
                return Err(Error::DrainTimeout {
                    outstanding: pool.in_flight(),
                });
            }

            let Some(Completion {
                slot,
                buffer,
                status,
                ..
            }) = self.backend.wait_completion(remaining)
            else {
                continue;
            };

            pool.complete(slot)?;
            match status {
                Ok(()) => self.stats.discarded_transfers += 1,
                Err(failure) => log::trace!("slot {} drained: {}", slot, failure),
            }
            pool.release(slot, buffer)?;
        }
        Ok(())
    }
}

/// Return a buffer the engine holds to the free list, then terminate.
fn retire<B>(
    pool: &mut TransferPool<B>,
    slot: usize,
    buffer: B,
    termination: Termination,
) -> Termination {
    match pool.release(slot, buffer) {
        Ok(()) => termination,
        Err(e) => Termination::Failed(e),
    }
}

/// Call the consumer without letting a panic unwind into the transport.
fn invoke<F>(callback: &mut F, event: StreamEvent<'_>, progress: &ProgressInfo) -> Verdict
where
    F: FnMut(StreamEvent<'_>, &ProgressInfo) -> CallbackResult,
{
    match panic::catch_unwind(AssertUnwindSafe(|| callback(event, progress))) {
        Ok(CallbackResult::Continue) => Verdict::Continue,
        Ok(CallbackResult::Stop) => Verdict::Stop,
        Err(_) => {
            log::error!("stream callback panicked; stopping");
            Verdict::Panicked
        }
    }
}
